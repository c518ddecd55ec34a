// src/resolve/mod.rs

//! Effective configuration resolution.
//!
//! Precedence, highest first:
//! 1. explicit request values,
//! 2. persisted defaults (fully flooded only for local-machine configs),
//! 3. host auto-detection through an [`EnvProbe`],
//! 4. hard-coded fallbacks.
//!
//! [`resolve`] is pure with respect to its inputs: values that had to be
//! defaulted are returned as warnings instead of being logged here.

pub mod merge;
pub mod request;
pub mod resolved;

use tracing::debug;

use crate::config::model::PersistedDefaults;
use crate::errors::{LaunchError, Result};
use crate::gpu_ids::GpuIds;
use crate::probe::EnvProbe;
use crate::types::{ComputeEnvironment, DistributedMode, DynamoBackend, MixedPrecision};

pub use request::RawRequest;
pub use resolved::{LaunchTarget, Provenance, ResolvedConfig};

/// Environment variables consulted (in order) for the number of local ranks.
pub const LOCAL_SIZE_VARS: [&str; 3] = [
    "MPI_LOCALNRANKS",
    "OMPI_COMM_WORLD_LOCAL_SIZE",
    "MV2_COMM_WORLD_LOCAL_SIZE",
];

/// Environment variable naming the interpreter when `--python` is not given.
pub const PYTHON_ENV: &str = "TRAINLAUNCH_PYTHON";

/// Interpreter used when neither `--python` nor [`PYTHON_ENV`] is set.
pub const DEFAULT_PYTHON: &str = "python3";

/// Result of a successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub config: ResolvedConfig,
    /// Values that were not passed and had defaults used instead, in the
    /// order they were defaulted.
    pub warnings: Vec<String>,
}

impl Resolution {
    /// Single human-readable message covering every warning, if any.
    pub fn warning_message(&self) -> Option<String> {
        if self.warnings.is_empty() {
            return None;
        }
        let mut message = String::from(
            "The following values were not passed to `trainlaunch` and had defaults used instead:\n",
        );
        message.push_str(&self.warnings.join("\n"));
        message.push_str(
            "\nTo avoid this warning pass in values for each of the problematic parameters or save a config file.",
        );
        Some(message)
    }
}

/// Merge `raw`, `persisted` and host signals into one [`ResolvedConfig`].
///
/// Fails with the first violated invariant; nothing partial is returned.
pub fn resolve(
    raw: &RawRequest,
    persisted: Option<&PersistedDefaults>,
    probe: &dyn EnvProbe,
) -> Result<Resolution> {
    let mut raw = raw.clone();
    let mut warnings = Vec::new();

    reject_exclusive_modes(&raw)?;
    if raw.tpu_opts.no_tpu_cluster {
        raw.tpu_opts.tpu_use_cluster = Some(false);
    }

    let compute_environment = persisted
        .map(|p| p.compute_environment)
        .unwrap_or(ComputeEnvironment::LocalMachine);

    let mut mode = mode_from_flags(&raw);
    let mut tpu_use_cluster = raw.tpu_opts.tpu_use_cluster;
    let mut mp_from_config = false;

    let mixed_precision = match persisted {
        Some(p) => {
            let force_cpu = raw.cpu == Some(true);
            if !force_cpu && raw.no_mode_requested() {
                mode = DistributedMode::from_persisted(p.distributed_type);
                tpu_use_cluster = if mode == DistributedMode::AcceleratorPod {
                    tpu_use_cluster.or(p.tpu_use_cluster)
                } else {
                    Some(false)
                };
                debug!(?mode, "adopted distributed mode from persisted config");
            }

            if raw.distributed.gpu_ids.is_none() {
                raw.distributed.gpu_ids = Some(p.gpu_ids.clone().unwrap_or(GpuIds::All));
            }

            if mode == DistributedMode::MultiGpu && raw.num_machines.is_none() {
                raw.num_machines = Some(p.num_machines.ok_or_else(|| {
                    LaunchError::config(
                        "multi-GPU mode needs `num_machines`, but neither `--num_machines` nor the config file sets it",
                    )
                })?);
            }

            check_gpu_id_cardinality(
                mode,
                raw.distributed.gpu_ids.as_ref(),
                raw.num_machines.unwrap_or(1),
            )?;

            if p.is_local_machine() {
                merge::flood_from_persisted(&mut raw, p)?;
            }
            if raw.debug != Some(true) {
                raw.debug = Some(p.debug.unwrap_or(false));
            }
            if raw.num_processes.is_none() {
                raw.num_processes = p.num_processes;
            }

            let mixed_precision = match raw.mixed_precision {
                Some(explicit) => explicit,
                None => match p.mixed_precision {
                    Some(saved) => {
                        mp_from_config = true;
                        saved
                    }
                    None => MixedPrecision::No,
                },
            };

            if raw.dynamo.dynamo_backend.is_none() {
                raw.dynamo.dynamo_backend = Some(DynamoBackend::No);
            }
            mixed_precision
        }
        None => {
            auto_detect(&mut raw, &mut mode, probe, &mut warnings);
            raw.mixed_precision.unwrap_or_default()
        }
    };

    if raw.mixed_precision == Some(MixedPrecision::Bf16) {
        check_bf16_capability(&raw, mode, probe)?;
    }

    let use_cpu = raw.cpu.unwrap_or(false);
    let num_processes = match raw.num_processes {
        Some(n) => n,
        None => {
            let detected = probed_device_count(&raw, probe).max(1);
            warnings.push(format!("\t`--num_processes` was set to a value of `{detected}`"));
            detected
        }
    };
    let num_machines = raw.num_machines.unwrap_or(1);

    let num_cpu_threads_per_process = match raw.num_cpu_threads_per_process {
        Some(n) => n,
        None if compute_environment.is_managed_cloud() => 1,
        None => cpu_threads_per_process(use_cpu, num_processes, probe, &mut warnings),
    };

    let deepspeed_fields_from_config = match (mode, persisted) {
        (DistributedMode::GradientSharding, Some(p)) => {
            let mut fields: Vec<String> = p.deepspeed_config.keys().cloned().collect();
            if mp_from_config {
                fields.push("mixed_precision".to_string());
            }
            fields
        }
        _ => Vec::new(),
    };

    let python = raw
        .python
        .clone()
        .or_else(|| probe.var(PYTHON_ENV))
        .unwrap_or_else(|| DEFAULT_PYTHON.to_string());

    let config = ResolvedConfig {
        compute_environment,
        mode,
        use_cpu,
        use_xpu: raw.use_xpu.unwrap_or(false),
        ipex: raw.ipex.unwrap_or(false),
        tpu_use_cluster: mode == DistributedMode::AcceleratorPod && tpu_use_cluster.unwrap_or(false),
        num_processes,
        num_machines,
        num_cpu_threads_per_process,
        mixed_precision,
        gpu_ids: raw.distributed.gpu_ids.clone().unwrap_or_default(),
        debug: raw.debug.unwrap_or(false),
        quiet: raw.quiet,
        topology: raw.distributed.clone().into(),
        dynamo: raw.dynamo.clone().into(),
        tpu: raw.tpu_opts.clone().into(),
        container: raw.container.clone().into(),
        deepspeed: raw.deepspeed.clone().into(),
        fsdp: raw.fsdp.clone().into(),
        megatron: raw.megatron.clone().into(),
        aws: raw.aws.clone().into(),
        cloud: persisted.map(|p| p.cloud.clone()).unwrap_or_default(),
        target: LaunchTarget {
            training_script: raw.training_script.clone(),
            script_args: raw.training_script_args.clone(),
            module: raw.module,
            no_python: raw.no_python,
            python,
        },
        provenance: Provenance {
            mixed_precision_from_config: mp_from_config,
            deepspeed_fields_from_config,
        },
    };

    check_invariants(&config)?;
    check_launch_preconditions(&config)?;

    if config.debug {
        debug!("running in debug mode, expect distributed operations to be slightly slower");
    }

    Ok(Resolution { config, warnings })
}

fn reject_exclusive_modes(raw: &RawRequest) -> Result<()> {
    let modes = raw.explicit_modes();
    if modes.len() > 1 {
        return Err(LaunchError::config(format!(
            "You can only use one of `--cpu`, `--multi_gpu`, `--tpu`, `--use_deepspeed`, `--use_fsdp`, `--use_megatron_lm` at a time (got {})",
            modes.join(", ")
        )));
    }
    if raw.multi_gpu == Some(true) && raw.num_processes.is_some_and(|n| n < 2) {
        return Err(LaunchError::config(
            "You need to use at least 2 processes to use `--multi_gpu`.",
        ));
    }
    Ok(())
}

fn mode_from_flags(raw: &RawRequest) -> DistributedMode {
    if raw.use_deepspeed == Some(true) {
        DistributedMode::GradientSharding
    } else if raw.use_fsdp == Some(true) {
        DistributedMode::ModelSharding
    } else if raw.use_megatron_lm == Some(true) {
        DistributedMode::ModelParallel
    } else if raw.multi_gpu == Some(true) {
        DistributedMode::MultiGpu
    } else if raw.tpu == Some(true) || raw.tpu_opts.tpu_use_cluster == Some(true) {
        DistributedMode::AcceleratorPod
    } else {
        DistributedMode::SingleDevice
    }
}

fn check_gpu_id_cardinality(mode: DistributedMode, gpu_ids: Option<&GpuIds>, num_machines: u32) -> Result<()> {
    let Some(count) = gpu_ids.and_then(GpuIds::count) else {
        return Ok(());
    };
    if count < 2 && mode == DistributedMode::MultiGpu && num_machines <= 1 {
        return Err(LaunchError::config(format!(
            "Less than two GPU ids were configured ({}) and tried to run on multiple GPUs on a single machine. \
             Please ensure at least two are specified for `--gpu_ids`, or use `--gpu_ids=all`.",
            gpu_ids.map(ToString::to_string).unwrap_or_default()
        )));
    }
    Ok(())
}

/// Auto-detection branch used when no persisted config applies.
fn auto_detect(
    raw: &mut RawRequest,
    mode: &mut DistributedMode,
    probe: &dyn EnvProbe,
    warnings: &mut Vec<String>,
) {
    if raw.debug.is_none() {
        raw.debug = Some(false);
    }

    let counts = probe.device_counts();
    let many_devices = (raw.use_xpu == Some(true) && counts.xpu > 1) || counts.npu > 1 || counts.cuda > 1;
    let single_process_requested = raw.cpu == Some(true) || raw.num_processes == Some(1);
    if *mode == DistributedMode::SingleDevice
        && raw.multi_gpu.is_none()
        && !single_process_requested
        && many_devices
    {
        warnings.push(
            "\t\tMore than one GPU was found, enabling multi-GPU training.\n\
             \t\tIf this was unintended please pass in `--num_processes=1`."
                .to_string(),
        );
        *mode = DistributedMode::MultiGpu;
    }

    if raw.num_machines.is_none() {
        warnings.push("\t`--num_machines` was set to a value of `1`".to_string());
        raw.num_machines = Some(1);
    }
    if raw.mixed_precision.is_none() {
        warnings.push("\t`--mixed_precision` was set to a value of `'no'`".to_string());
        raw.mixed_precision = Some(MixedPrecision::No);
    }
    if raw.dynamo.dynamo_backend.is_none() {
        warnings.push("\t`--dynamo_backend` was set to a value of `'no'`".to_string());
        raw.dynamo.dynamo_backend = Some(DynamoBackend::No);
    }
}

/// Device count in probe priority order: extension accelerator, neural
/// processor, default accelerator.
fn probed_device_count(raw: &RawRequest, probe: &dyn EnvProbe) -> u32 {
    let counts = probe.device_counts();
    if raw.use_xpu == Some(true) && counts.xpu > 0 {
        counts.xpu
    } else if counts.npu > 0 {
        counts.npu
    } else {
        counts.cuda
    }
}

fn check_bf16_capability(raw: &RawRequest, mode: DistributedMode, probe: &dyn EnvProbe) -> Result<()> {
    let caps = probe.capabilities();
    if mode == DistributedMode::AcceleratorPod && caps.tpu {
        return Ok(());
    }

    let xpu_available = probe.device_counts().xpu > 0;
    let native_amp = if raw.cpu == Some(true) || (raw.use_xpu == Some(true) && xpu_available) {
        caps.cpu_amp
    } else {
        caps.bf16
    };
    if !native_amp {
        return Err(LaunchError::config(
            "bf16 mixed precision requires a runtime with native mixed-precision support (torch >= 1.10) and a supported device.",
        ));
    }
    Ok(())
}

fn cpu_threads_per_process(
    use_cpu: bool,
    num_processes: u32,
    probe: &dyn EnvProbe,
    warnings: &mut Vec<String>,
) -> u32 {
    if !use_cpu || num_processes < 1 {
        return 1;
    }

    let local_size = LOCAL_SIZE_VARS
        .iter()
        .find_map(|name| probe.var(name).and_then(|v| v.trim().parse::<usize>().ok()))
        .filter(|n| *n > 0)
        .unwrap_or(1);

    let cores = probe.physical_cores().unwrap_or(1);
    let threads = cores / local_size;
    if threads > 1 {
        let threads = u32::try_from(threads).unwrap_or(u32::MAX);
        warnings.push(format!(
            "\t`--num_cpu_threads_per_process` was set to `{threads}` to improve out-of-box performance when training on CPUs"
        ));
        threads
    } else {
        1
    }
}

fn check_invariants(cfg: &ResolvedConfig) -> Result<()> {
    if cfg.num_processes == 0 {
        return Err(LaunchError::config("`num_processes` must be >= 1"));
    }
    if cfg.num_machines == 0 {
        return Err(LaunchError::config("`num_machines` must be >= 1"));
    }
    if cfg.num_cpu_threads_per_process == 0 {
        return Err(LaunchError::config("`num_cpu_threads_per_process` must be >= 1"));
    }
    if cfg.topology.machine_rank >= cfg.num_machines {
        return Err(LaunchError::config(format!(
            "`machine_rank` ({}) must be smaller than `num_machines` ({})",
            cfg.topology.machine_rank, cfg.num_machines
        )));
    }
    if cfg.mode == DistributedMode::MultiGpu && cfg.num_processes < 2 {
        return Err(LaunchError::config(format!(
            "You need to use at least 2 processes to use multi-GPU mode (resolved `num_processes` = {}).",
            cfg.num_processes
        )));
    }
    check_gpu_id_cardinality(cfg.mode, Some(&cfg.gpu_ids), cfg.num_machines)
}

/// Target-shape checks that would otherwise only fail inside a backend.
fn check_launch_preconditions(cfg: &ResolvedConfig) -> Result<()> {
    let target = &cfg.target;
    if target.training_script.trim().is_empty() {
        return Err(LaunchError::config("no training script was given"));
    }
    if target.module && target.no_python {
        return Err(LaunchError::config(
            "`--module` and `--no_python` cannot be used together",
        ));
    }
    if cfg.compute_environment.is_managed_cloud() && (target.module || target.no_python) {
        return Err(LaunchError::config(
            "managed-cloud training requires a python training script file and cannot be used with `--module` or `--no_python`",
        ));
    }
    if cfg.mode == DistributedMode::AcceleratorPod && !cfg.use_cpu && target.no_python {
        return Err(LaunchError::EntryPoint(
            "`--no_python` cannot be used with the accelerator-pod launcher: it must import a training function from the script".to_string(),
        ));
    }
    Ok(())
}
