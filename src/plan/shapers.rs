// src/plan/shapers.rs

//! Default per-backend shaping.
//!
//! Each shaper turns a [`ResolvedConfig`] into the backend-specific part of
//! a [`LaunchPlan`](super::LaunchPlan): a program prefix, extra fields for
//! the backend's own flag parser, environment overrides and the target kind.

use std::collections::BTreeMap;

use crate::backend::BackendId;
use crate::errors::{LaunchError, Result};
use crate::fs::FileSystem;
use crate::plan::cloud;
use crate::plan::filter::{field, filter_args, resolved_fields, Field, FieldValue};
use crate::plan::PlanTarget;
use crate::resolve::ResolvedConfig;
use crate::types::{DistributedMode, MixedPrecision, MultinodeLauncher, RdzvBackend};

/// Rendezvous port used when none was configured.
pub const DEFAULT_MASTER_PORT: u16 = 29500;

/// Executable name remote pod hosts run to re-enter the launcher.
pub const LAUNCHER_BIN: &str = env!("CARGO_PKG_NAME");

/// Flags accepted by the distributed process-group runtime.
pub const DISTRIBUTED_RUNTIME_FLAGS: &[&str] = &[
    "nnodes",
    "nproc_per_node",
    "node_rank",
    "master_addr",
    "master_port",
    "rdzv_backend",
    "rdzv_endpoint",
    "rdzv_conf",
    "max_restarts",
    "monitor_interval",
    "tee",
    "role",
    "module",
    "no_python",
];

/// Flags accepted by the multi-node gradient-sharding launcher.
pub const GRADIENT_SHARDING_LAUNCHER_FLAGS: &[&str] = &[
    "no_local_rank",
    "hostfile",
    "launcher",
    "include",
    "exclude",
    "num_gpus",
    "master_addr",
    "master_port",
    "module",
    "no_python",
];

/// Flags accepted by the pod-cluster distribution tool.
pub const POD_CLUSTER_FLAGS: &[&str] = &["tpu", "vm", "restart-tpuvm-pod-server"];

/// Inputs a shaper may need besides the configuration itself.
pub struct ShapeContext<'a> {
    pub fs: &'a dyn FileSystem,
}

/// Backend-specific part of a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Shaped {
    /// Leading argv entries before the filtered flags.
    pub program: Vec<String>,
    /// Computed fields, appended after the resolved ones so they win.
    pub fields: Vec<Field>,
    /// Overrides layered on top of the base environment.
    pub env: BTreeMap<String, String>,
    pub target: PlanTarget,
    /// Whether the training script and its arguments close the argv.
    pub append_script: bool,
}

impl Shaped {
    fn new(target: PlanTarget) -> Self {
        Self {
            program: Vec::new(),
            fields: Vec::new(),
            env: BTreeMap::new(),
            target,
            append_script: true,
        }
    }
}

pub trait BackendShaper: Send + Sync {
    /// Names the backend's own parser accepts; anything else is dropped.
    fn accepted_flags(&self, cfg: &ResolvedConfig) -> &'static [&'static str];

    fn shape(&self, cfg: &ResolvedConfig, ctx: &ShapeContext<'_>) -> Result<Shaped>;
}

/// One child process running the script directly.
#[derive(Debug, Default)]
pub struct SimpleShaper;

impl BackendShaper for SimpleShaper {
    fn accepted_flags(&self, _cfg: &ResolvedConfig) -> &'static [&'static str] {
        &[]
    }

    fn shape(&self, cfg: &ResolvedConfig, _ctx: &ShapeContext<'_>) -> Result<Shaped> {
        let mut shaped = Shaped::new(PlanTarget::Process);
        if !cfg.target.no_python {
            shaped.program.push(cfg.target.python.clone());
            if cfg.target.module {
                shaped.program.push("-m".to_string());
            }
        }

        let env = &mut shaped.env;
        env.extend(common_env(cfg));
        set(env, "TRAINLAUNCH_USE_CPU", cfg.use_cpu);
        if cfg.num_processes > 1 {
            set(env, "MASTER_ADDR", master_addr(cfg));
            set(env, "MASTER_PORT", master_port(cfg));
        }
        Ok(shaped)
    }
}

/// Generic distributed process-group runtime.
#[derive(Debug, Default)]
pub struct MultiProcessShaper;

impl BackendShaper for MultiProcessShaper {
    fn accepted_flags(&self, _cfg: &ResolvedConfig) -> &'static [&'static str] {
        DISTRIBUTED_RUNTIME_FLAGS
    }

    fn shape(&self, cfg: &ResolvedConfig, _ctx: &ShapeContext<'_>) -> Result<Shaped> {
        let mut shaped = Shaped::new(PlanTarget::DistributedRuntime);
        shaped.fields = distributed_runtime_fields(cfg);
        shaped.env = common_env(cfg);
        match cfg.mode {
            DistributedMode::ModelSharding => shaped.env.extend(fsdp_env(cfg)),
            DistributedMode::ModelParallel => shaped.env.extend(megatron_env(cfg)),
            _ => {}
        }
        Ok(shaped)
    }
}

/// Gradient-sharding runtime.
///
/// Multi-node launches through a non-standard launcher go through the
/// sharding tool's own command line; everything else uses the process-group
/// runtime.
#[derive(Debug, Default)]
pub struct GradientShardingShaper;

impl GradientShardingShaper {
    fn uses_own_launcher(cfg: &ResolvedConfig) -> bool {
        cfg.is_multi_node() && cfg.deepspeed.multinode_launcher != MultinodeLauncher::Standard
    }
}

impl BackendShaper for GradientShardingShaper {
    fn accepted_flags(&self, cfg: &ResolvedConfig) -> &'static [&'static str] {
        if Self::uses_own_launcher(cfg) {
            GRADIENT_SHARDING_LAUNCHER_FLAGS
        } else {
            DISTRIBUTED_RUNTIME_FLAGS
        }
    }

    fn shape(&self, cfg: &ResolvedConfig, _ctx: &ShapeContext<'_>) -> Result<Shaped> {
        let mut shaped = if Self::uses_own_launcher(cfg) {
            let mut shaped = Shaped::new(PlanTarget::Process);
            shaped.program.push("deepspeed".to_string());
            shaped.fields = launcher_fields(cfg);
            shaped
        } else {
            let mut shaped = Shaped::new(PlanTarget::DistributedRuntime);
            shaped.fields = distributed_runtime_fields(cfg);
            shaped
        };
        shaped.env = common_env(cfg);
        shaped.env.extend(deepspeed_env(cfg));
        Ok(shaped)
    }
}

/// Single-host accelerator pod.
#[derive(Debug, Default)]
pub struct PodShaper;

impl BackendShaper for PodShaper {
    fn accepted_flags(&self, _cfg: &ResolvedConfig) -> &'static [&'static str] {
        &[]
    }

    fn shape(&self, cfg: &ResolvedConfig, _ctx: &ShapeContext<'_>) -> Result<Shaped> {
        let mut shaped = Shaped::new(PlanTarget::PodWorkers {
            script: cfg.target.training_script.clone(),
            module: cfg.target.module,
            function: cfg.tpu.main_training_function.clone(),
            num_processes: cfg.num_processes,
        });
        shaped.env = common_env(cfg);
        shaped.env.extend(xla_env(cfg));
        Ok(shaped)
    }
}

/// Multi-host accelerator pod: every host re-enters this launcher with
/// cluster mode disabled.
#[derive(Debug, Default)]
pub struct PodClusterShaper;

impl BackendShaper for PodClusterShaper {
    fn accepted_flags(&self, _cfg: &ResolvedConfig) -> &'static [&'static str] {
        // The re-entrant command is fixed; filtering applies to the
        // cluster tool's own arguments instead.
        &[]
    }

    fn shape(&self, cfg: &ResolvedConfig, _ctx: &ShapeContext<'_>) -> Result<Shaped> {
        let tpu_name = cfg.tpu.name.clone().ok_or_else(|| {
            LaunchError::config("launching on an accelerator pod cluster requires `--tpu_name`")
        })?;

        let mut fields = resolved_fields(cfg);
        fields.push(field("tpu", FieldValue::Text(tpu_name)));
        fields.push(field("restart-tpuvm-pod-server", FieldValue::Flag(true)));
        let runtime_args = filter_args(&fields, POD_CLUSTER_FLAGS);

        let mut remote_env: Vec<String> = xla_env(cfg)
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        remote_env.extend(cfg.tpu.env.iter().cloned());
        remote_env.push("TRAINLAUNCH_IN_TPU_POD=1".to_string());

        let mut shaped = Shaped::new(PlanTarget::PodCluster { runtime_args, remote_env });
        if cfg.tpu.use_sudo {
            shaped.program.push("sudo".to_string());
        }
        shaped.program.extend(
            [
                LAUNCHER_BIN,
                "--tpu",
                "--no_tpu_cluster",
                "--num_machines",
                "1",
                "--mixed_precision",
                "no",
                "--dynamo_backend",
                "no",
                "--num_processes",
            ]
            .map(String::from),
        );
        shaped.program.push(cfg.num_processes.to_string());
        shaped.program.push("--main_training_function".to_string());
        shaped.program.push(cfg.tpu.main_training_function.clone());
        Ok(shaped)
    }
}

/// Managed-cloud training job.
#[derive(Debug, Default)]
pub struct ManagedCloudShaper;

impl BackendShaper for ManagedCloudShaper {
    fn accepted_flags(&self, _cfg: &ResolvedConfig) -> &'static [&'static str] {
        &[]
    }

    fn shape(&self, cfg: &ResolvedConfig, ctx: &ShapeContext<'_>) -> Result<Shaped> {
        let mut job_env = BTreeMap::new();
        set(&mut job_env, "TRAINLAUNCH_USE_MANAGED_CLOUD", true);
        set(&mut job_env, "TRAINLAUNCH_MIXED_PRECISION", cfg.mixed_precision);
        job_env.extend(dynamo_env(cfg));

        let descriptor = cloud::job_descriptor(cfg, job_env, ctx.fs)?;
        let mut shaped = Shaped::new(PlanTarget::ManagedJob { descriptor });
        shaped.env = cloud::client_env(cfg);
        Ok(shaped)
    }
}

fn set(env: &mut BTreeMap<String, String>, key: &str, value: impl ToString) {
    env.insert(key.to_string(), value.to_string());
}

fn master_addr(cfg: &ResolvedConfig) -> String {
    cfg.topology
        .main_process_ip
        .clone()
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

fn master_port(cfg: &ResolvedConfig) -> u16 {
    cfg.topology.main_process_port.unwrap_or(DEFAULT_MASTER_PORT)
}

/// Variables every local backend sets.
pub fn common_env(cfg: &ResolvedConfig) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    set(&mut env, "TRAINLAUNCH_MIXED_PRECISION", cfg.mixed_precision);
    set(&mut env, "OMP_NUM_THREADS", cfg.num_cpu_threads_per_process);
    if cfg.debug {
        set(&mut env, "TRAINLAUNCH_DEBUG_MODE", true);
    }
    if !cfg.gpu_ids.is_all() {
        let var = if cfg.use_xpu { "ZE_AFFINITY_MASK" } else { "CUDA_VISIBLE_DEVICES" };
        set(&mut env, var, &cfg.gpu_ids);
    }
    if cfg.ipex {
        set(&mut env, "TRAINLAUNCH_USE_IPEX", true);
    }
    if cfg.use_xpu {
        set(&mut env, "TRAINLAUNCH_USE_XPU", true);
    }
    env.extend(dynamo_env(cfg));
    env
}

pub fn dynamo_env(cfg: &ResolvedConfig) -> BTreeMap<String, String> {
    let d = &cfg.dynamo;
    let mut env = BTreeMap::new();
    set(&mut env, "TRAINLAUNCH_DYNAMO_BACKEND", d.backend.as_str().to_uppercase());
    set(&mut env, "TRAINLAUNCH_DYNAMO_MODE", d.mode.as_str());
    set(&mut env, "TRAINLAUNCH_DYNAMO_USE_FULLGRAPH", d.use_fullgraph);
    set(&mut env, "TRAINLAUNCH_DYNAMO_USE_DYNAMIC", d.use_dynamic);
    env
}

fn fsdp_env(cfg: &ResolvedConfig) -> BTreeMap<String, String> {
    let f = &cfg.fsdp;
    let mut env = BTreeMap::new();
    set(&mut env, "TRAINLAUNCH_USE_FSDP", true);
    set(&mut env, "TRAINLAUNCH_FSDP_OFFLOAD_PARAMS", f.offload_params);
    set(&mut env, "TRAINLAUNCH_FSDP_MIN_NUM_PARAMS", f.min_num_params);
    set(&mut env, "TRAINLAUNCH_FSDP_SHARDING_STRATEGY", f.sharding_strategy);
    set(&mut env, "TRAINLAUNCH_FSDP_FORWARD_PREFETCH", f.forward_prefetch);
    set(&mut env, "TRAINLAUNCH_FSDP_USE_ORIG_PARAMS", f.use_orig_params);
    set(&mut env, "TRAINLAUNCH_FSDP_SYNC_MODULE_STATES", f.sync_module_states);
    let optional = [
        ("TRAINLAUNCH_FSDP_AUTO_WRAP_POLICY", &f.auto_wrap_policy),
        ("TRAINLAUNCH_FSDP_TRANSFORMER_CLS_TO_WRAP", &f.transformer_layer_cls_to_wrap),
        ("TRAINLAUNCH_FSDP_BACKWARD_PREFETCH", &f.backward_prefetch_policy),
        ("TRAINLAUNCH_FSDP_STATE_DICT_TYPE", &f.state_dict_type),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            set(&mut env, key, value);
        }
    }
    env
}

fn megatron_env(cfg: &ResolvedConfig) -> BTreeMap<String, String> {
    let m = &cfg.megatron;
    let mut env = BTreeMap::new();
    set(&mut env, "TRAINLAUNCH_USE_MEGATRON_LM", true);
    set(&mut env, "TRAINLAUNCH_MEGATRON_LM_TP_DEGREE", m.tp_degree);
    set(&mut env, "TRAINLAUNCH_MEGATRON_LM_PP_DEGREE", m.pp_degree);
    set(&mut env, "TRAINLAUNCH_MEGATRON_LM_GRADIENT_CLIPPING", m.gradient_clipping);
    if let Some(n) = m.num_micro_batches {
        set(&mut env, "TRAINLAUNCH_MEGATRON_LM_NUM_MICRO_BATCHES", n);
    }
    if let Some(v) = m.sequence_parallelism {
        set(&mut env, "TRAINLAUNCH_MEGATRON_LM_SEQUENCE_PARALLELISM", v);
    }
    if let Some(v) = m.recompute_activations {
        set(&mut env, "TRAINLAUNCH_MEGATRON_LM_RECOMPUTE_ACTIVATIONS", v);
    }
    if let Some(v) = m.use_distributed_optimizer {
        set(&mut env, "TRAINLAUNCH_MEGATRON_LM_USE_DISTRIBUTED_OPTIMIZER", v);
    }
    env
}

fn deepspeed_env(cfg: &ResolvedConfig) -> BTreeMap<String, String> {
    let ds = &cfg.deepspeed;
    let mut env = BTreeMap::new();
    set(&mut env, "TRAINLAUNCH_USE_DEEPSPEED", true);
    set(&mut env, "TRAINLAUNCH_DEEPSPEED_ZERO_STAGE", ds.zero_stage);
    set(&mut env, "TRAINLAUNCH_GRADIENT_ACCUMULATION_STEPS", ds.gradient_accumulation_steps);
    set(&mut env, "TRAINLAUNCH_GRADIENT_CLIPPING", ds.gradient_clipping);
    set(&mut env, "TRAINLAUNCH_DEEPSPEED_OFFLOAD_OPTIMIZER_DEVICE", ds.offload_optimizer_device.as_str());
    set(&mut env, "TRAINLAUNCH_DEEPSPEED_OFFLOAD_PARAM_DEVICE", ds.offload_param_device.as_str());
    set(&mut env, "TRAINLAUNCH_DEEPSPEED_OFFLOAD_OPTIMIZER_NVME_PATH", &ds.offload_optimizer_nvme_path);
    set(&mut env, "TRAINLAUNCH_DEEPSPEED_OFFLOAD_PARAM_NVME_PATH", &ds.offload_param_nvme_path);
    set(&mut env, "TRAINLAUNCH_DEEPSPEED_ZERO3_INIT", ds.zero3_init_flag);
    set(&mut env, "TRAINLAUNCH_DEEPSPEED_ZERO3_SAVE_16BIT_MODEL", ds.zero3_save_16bit_model);
    if let Some(path) = &ds.config_file {
        set(&mut env, "TRAINLAUNCH_DEEPSPEED_CONFIG_FILE", path);
    }
    set(
        &mut env,
        "TRAINLAUNCH_CONFIG_DS_FIELDS",
        cfg.provenance.deepspeed_fields_from_config.join(","),
    );
    env
}

fn xla_env(cfg: &ResolvedConfig) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    if cfg.mixed_precision == MixedPrecision::Bf16 {
        let var = if cfg.tpu.downcast_bf16 { "XLA_DOWNCAST_BF16" } else { "XLA_USE_BF16" };
        set(&mut env, var, 1);
    }
    env
}

/// Topology arguments for the process-group runtime.
fn distributed_runtime_fields(cfg: &ResolvedConfig) -> Vec<Field> {
    let t = &cfg.topology;
    let mut fields = vec![
        field("nnodes", FieldValue::text(cfg.num_machines)),
        field("nproc_per_node", FieldValue::text(cfg.processes_per_machine())),
        field("node_rank", FieldValue::text(t.machine_rank)),
    ];
    if cfg.is_multi_node() {
        fields.push(field("master_addr", FieldValue::text(master_addr(cfg))));
        fields.push(field("master_port", FieldValue::text(master_port(cfg))));
        if t.rdzv_backend == RdzvBackend::C10d {
            fields.push(field(
                "rdzv_endpoint",
                FieldValue::Text(format!("{}:{}", master_addr(cfg), master_port(cfg))),
            ));
        }
    } else if let Some(port) = t.main_process_port {
        fields.push(field("master_port", FieldValue::text(port)));
    }
    fields
}

/// Arguments for the gradient-sharding tool's own multi-node launcher.
fn launcher_fields(cfg: &ResolvedConfig) -> Vec<Field> {
    let ds = &cfg.deepspeed;
    let mut fields = vec![
        field("no_local_rank", FieldValue::Flag(true)),
        field("launcher", FieldValue::text(ds.multinode_launcher.as_str())),
    ];
    if let Some(hostfile) = &ds.hostfile {
        fields.push(field("hostfile", FieldValue::text(hostfile)));
    }
    if let Some(exclude) = &ds.exclusion_filter {
        fields.push(field("exclude", FieldValue::text(exclude)));
    } else if let Some(include) = &ds.inclusion_filter {
        fields.push(field("include", FieldValue::text(include)));
    } else {
        fields.push(field("num_gpus", FieldValue::text(cfg.processes_per_machine())));
    }
    fields.push(field("master_addr", FieldValue::text(master_addr(cfg))));
    fields.push(field("master_port", FieldValue::text(master_port(cfg))));
    fields
}

/// Default shaper for `backend`.
pub fn default_shaper(backend: BackendId) -> Box<dyn BackendShaper> {
    match backend {
        BackendId::Simple => Box::new(SimpleShaper),
        BackendId::MultiProcess => Box::new(MultiProcessShaper),
        BackendId::DeepGradientSharding => Box::new(GradientShardingShaper),
        BackendId::AcceleratorPod => Box::new(PodShaper),
        BackendId::AcceleratorPodCluster => Box::new(PodClusterShaper),
        BackendId::ManagedCloud => Box::new(ManagedCloudShaper),
    }
}
