// src/resolve/request.rs

//! The as-given run request.
//!
//! Every option is `Option<T>`: `None` means "not passed, defer to a
//! lower-precedence source", which is different from an explicit `false`.
//! Boolean switches accept `--flag` (true) and `--flag=false`.
//!
//! The same types double as the `clap` flag surface so there is exactly one
//! list of recognized options.

use std::path::PathBuf;

use clap::Args;

use crate::gpu_ids::GpuIds;
use crate::types::{
    DynamoBackend, DynamoMode, MixedPrecision, MultinodeLauncher, OffloadDevice, RdzvBackend,
};

#[derive(Debug, Clone, Default, PartialEq, Args)]
#[command(rename_all = "snake_case")]
pub struct RawRequest {
    /// Config file holding default values for the launch.
    #[arg(long, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Only report that the training process failed, without the launcher's
    /// own error detail.
    #[arg(long)]
    pub quiet: bool,

    /// Interpret the training script as a module name (`python -m`).
    #[arg(short = 'm', long)]
    pub module: bool,

    /// Execute the training script directly instead of through the interpreter.
    #[arg(long)]
    pub no_python: bool,

    /// Print backend error chains in full when something fails.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub debug: Option<bool>,

    /// Interpreter used for training scripts. Defaults to `TRAINLAUNCH_PYTHON`
    /// or `python3`.
    #[arg(long, value_name = "EXE")]
    pub python: Option<String>,

    /// Force training on the CPU.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub cpu: Option<bool>,

    /// Launch distributed multi-GPU training.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub multi_gpu: Option<bool>,

    /// Launch accelerator-pod training.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub tpu: Option<bool>,

    /// Enable the CPU extension plugin.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub ipex: Option<bool>,

    /// Use the extension plugin on XPU devices.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub use_xpu: Option<bool>,

    /// Use the gradient-sharding (DeepSpeed) backend.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub use_deepspeed: Option<bool>,

    /// Use the model-sharding (FSDP) backend.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub use_fsdp: Option<bool>,

    /// Use the model-parallel (Megatron-LM) backend.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub use_megatron_lm: Option<bool>,

    /// Mixed precision: no, fp16, bf16 or fp8.
    #[arg(long, value_name = "MODE")]
    pub mixed_precision: Option<MixedPrecision>,

    /// Total number of processes to launch.
    #[arg(long, value_name = "N")]
    pub num_processes: Option<u32>,

    /// Total number of machines used for training.
    #[arg(long, value_name = "N")]
    pub num_machines: Option<u32>,

    /// CPU threads per process.
    #[arg(long, value_name = "N")]
    pub num_cpu_threads_per_process: Option<u32>,

    #[command(flatten)]
    pub dynamo: DynamoOptions,

    #[command(flatten)]
    pub distributed: DistributedOptions,

    #[command(flatten)]
    pub tpu_opts: TpuOptions,

    #[command(flatten)]
    pub container: ContainerOptions,

    #[command(flatten)]
    pub deepspeed: DeepSpeedOptions,

    #[command(flatten)]
    pub fsdp: FsdpOptions,

    #[command(flatten)]
    pub megatron: MegatronOptions,

    #[command(flatten)]
    pub aws: AwsOptions,

    /// Script (or module) to launch.
    #[arg(value_name = "TRAINING_SCRIPT")]
    pub training_script: String,

    /// Arguments passed through to the training script.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
    pub training_script_args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Args)]
#[command(rename_all = "snake_case")]
pub struct DynamoOptions {
    #[arg(long, value_name = "BACKEND")]
    pub dynamo_backend: Option<DynamoBackend>,

    #[arg(long, value_name = "MODE")]
    pub dynamo_mode: Option<DynamoMode>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub dynamo_use_fullgraph: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub dynamo_use_dynamic: Option<bool>,
}

/// Machine topology and rendezvous settings.
#[derive(Debug, Clone, Default, PartialEq, Args)]
#[command(rename_all = "snake_case")]
pub struct DistributedOptions {
    /// Devices to use on this machine: `all` or a comma-separated id list.
    #[arg(long, value_name = "IDS")]
    pub gpu_ids: Option<GpuIds>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub same_network: Option<bool>,

    #[arg(long, value_name = "RANK")]
    pub machine_rank: Option<u32>,

    #[arg(long, value_name = "IP")]
    pub main_process_ip: Option<String>,

    #[arg(long, value_name = "PORT")]
    pub main_process_port: Option<u16>,

    #[arg(long, value_name = "STREAMS")]
    pub tee: Option<String>,

    #[arg(long, value_name = "ROLE")]
    pub role: Option<String>,

    #[arg(long, value_name = "BACKEND")]
    pub rdzv_backend: Option<RdzvBackend>,

    #[arg(long, value_name = "K=V,...")]
    pub rdzv_conf: Option<String>,

    #[arg(long, value_name = "N")]
    pub max_restarts: Option<u32>,

    #[arg(long, value_name = "SECONDS")]
    pub monitor_interval: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Args)]
#[command(rename_all = "snake_case")]
pub struct TpuOptions {
    /// Run on a multi-host pod.
    #[arg(long = "tpu_cluster", num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub tpu_use_cluster: Option<bool>,

    /// Internal: set by the pod re-entrant launch.
    #[arg(long, hide = true)]
    pub no_tpu_cluster: bool,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub tpu_use_sudo: Option<bool>,

    #[arg(long, value_name = "NAME")]
    pub tpu_name: Option<String>,

    #[arg(long, value_name = "ZONE")]
    pub tpu_zone: Option<String>,

    /// Compute VM instance names.
    #[arg(long, value_name = "VM")]
    pub vm: Vec<String>,

    /// Environment entries (`KEY=VALUE`) set on the pod hosts.
    #[arg(long, value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Function in the training script that the pod runtime calls.
    #[arg(long, value_name = "NAME")]
    pub main_training_function: Option<String>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub downcast_bf16: Option<bool>,
}

/// Container settings. Only meaningful for backends that run containers.
#[derive(Debug, Clone, Default, PartialEq, Args)]
#[command(rename_all = "snake_case")]
pub struct ContainerOptions {
    #[arg(long, value_name = "IMAGE")]
    pub docker_image: Option<String>,

    #[arg(long, value_name = "NAME")]
    pub docker_container: Option<String>,

    #[arg(long, value_name = "FLAGS")]
    pub docker_run_flag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Args)]
#[command(rename_all = "snake_case")]
pub struct DeepSpeedOptions {
    #[arg(long, value_name = "PATH")]
    pub deepspeed_config_file: Option<String>,

    #[arg(long, value_name = "STAGE")]
    pub zero_stage: Option<u8>,

    #[arg(long, value_name = "DEVICE")]
    pub offload_optimizer_device: Option<OffloadDevice>,

    #[arg(long, value_name = "DEVICE")]
    pub offload_param_device: Option<OffloadDevice>,

    #[arg(long, value_name = "PATH")]
    pub offload_optimizer_nvme_path: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub offload_param_nvme_path: Option<String>,

    #[arg(long, value_name = "N")]
    pub gradient_accumulation_steps: Option<u32>,

    #[arg(long, value_name = "VALUE")]
    pub gradient_clipping: Option<f64>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub zero3_init_flag: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub zero3_save_16bit_model: Option<bool>,

    #[arg(long, value_name = "PATH")]
    pub deepspeed_hostfile: Option<String>,

    #[arg(long, value_name = "FILTER")]
    pub deepspeed_exclusion_filter: Option<String>,

    #[arg(long, value_name = "FILTER")]
    pub deepspeed_inclusion_filter: Option<String>,

    #[arg(long, value_name = "LAUNCHER")]
    pub deepspeed_multinode_launcher: Option<MultinodeLauncher>,
}

#[derive(Debug, Clone, Default, PartialEq, Args)]
#[command(rename_all = "snake_case")]
pub struct FsdpOptions {
    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub fsdp_offload_params: Option<bool>,

    #[arg(long, value_name = "N")]
    pub fsdp_min_num_params: Option<u64>,

    #[arg(long, value_name = "N")]
    pub fsdp_sharding_strategy: Option<u8>,

    #[arg(long, value_name = "POLICY")]
    pub fsdp_auto_wrap_policy: Option<String>,

    #[arg(long, value_name = "CLASS")]
    pub fsdp_transformer_layer_cls_to_wrap: Option<String>,

    #[arg(long, value_name = "POLICY")]
    pub fsdp_backward_prefetch_policy: Option<String>,

    #[arg(long, value_name = "TYPE")]
    pub fsdp_state_dict_type: Option<String>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub fsdp_forward_prefetch: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub fsdp_use_orig_params: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub fsdp_sync_module_states: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Args)]
#[command(rename_all = "snake_case")]
pub struct MegatronOptions {
    #[arg(long, value_name = "N")]
    pub megatron_lm_tp_degree: Option<u32>,

    #[arg(long, value_name = "N")]
    pub megatron_lm_pp_degree: Option<u32>,

    #[arg(long, value_name = "N")]
    pub megatron_lm_num_micro_batches: Option<u32>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub megatron_lm_sequence_parallelism: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub megatron_lm_recompute_activations: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true", require_equals = true)]
    pub megatron_lm_use_distributed_optimizer: Option<bool>,

    #[arg(long, value_name = "VALUE")]
    pub megatron_lm_gradient_clipping: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Args)]
#[command(rename_all = "snake_case")]
pub struct AwsOptions {
    #[arg(long, value_name = "KEY")]
    pub aws_access_key_id: Option<String>,

    #[arg(long, value_name = "SECRET")]
    pub aws_secret_access_key: Option<String>,
}

impl RawRequest {
    /// Distributed-mode switches that were explicitly set to `true`, by flag name.
    pub fn explicit_modes(&self) -> Vec<&'static str> {
        [
            ("--cpu", self.cpu),
            ("--multi_gpu", self.multi_gpu),
            ("--tpu", self.tpu),
            ("--use_deepspeed", self.use_deepspeed),
            ("--use_fsdp", self.use_fsdp),
            ("--use_megatron_lm", self.use_megatron_lm),
        ]
        .into_iter()
        .filter(|(_, v)| *v == Some(true))
        .map(|(name, _)| name)
        .collect()
    }

    /// True when no distributed-mode switch (including pod cluster mode) was
    /// explicitly turned on.
    pub fn no_mode_requested(&self) -> bool {
        self.multi_gpu != Some(true)
            && self.tpu != Some(true)
            && self.tpu_opts.tpu_use_cluster != Some(true)
            && self.use_deepspeed != Some(true)
            && self.use_fsdp != Some(true)
            && self.use_megatron_lm != Some(true)
    }
}
