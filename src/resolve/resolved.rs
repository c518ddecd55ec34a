// src/resolve/resolved.rs

//! The fully determined launch configuration.

use crate::config::model::CloudSection;
use crate::gpu_ids::GpuIds;
use crate::resolve::request::{
    AwsOptions, ContainerOptions, DeepSpeedOptions, DistributedOptions, DynamoOptions, FsdpOptions,
    MegatronOptions, TpuOptions,
};
use crate::types::{
    ComputeEnvironment, DistributedMode, DynamoBackend, DynamoMode, MixedPrecision,
    MultinodeLauncher, OffloadDevice, RdzvBackend,
};

/// Single source of truth after merging flags, persisted defaults and
/// auto-detection. No field is left unset.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub compute_environment: ComputeEnvironment,
    pub mode: DistributedMode,
    pub use_cpu: bool,
    pub use_xpu: bool,
    pub ipex: bool,
    /// Only meaningful when `mode` is `AcceleratorPod`.
    pub tpu_use_cluster: bool,

    pub num_processes: u32,
    pub num_machines: u32,
    pub num_cpu_threads_per_process: u32,
    pub mixed_precision: MixedPrecision,
    pub gpu_ids: GpuIds,

    pub debug: bool,
    pub quiet: bool,

    pub topology: Topology,
    pub dynamo: DynamoSettings,
    pub tpu: TpuSettings,
    pub container: ContainerSettings,
    pub deepspeed: DeepSpeedSettings,
    pub fsdp: FsdpSettings,
    pub megatron: MegatronSettings,
    pub aws: AwsSettings,
    pub cloud: CloudSection,

    pub target: LaunchTarget,
    pub provenance: Provenance,
}

impl ResolvedConfig {
    pub fn is_multi_node(&self) -> bool {
        self.num_machines > 1
    }

    /// Processes started on this machine.
    pub fn processes_per_machine(&self) -> u32 {
        (self.num_processes / self.num_machines.max(1)).max(1)
    }
}

/// What the backend ultimately runs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LaunchTarget {
    pub training_script: String,
    pub script_args: Vec<String>,
    pub module: bool,
    pub no_python: bool,
    pub python: String,
}

/// Which values came from the persisted configuration rather than flags.
///
/// The gradient-sharding backend is told which of its fields were inherited
/// so it does not treat them as user overrides.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Provenance {
    pub mixed_precision_from_config: bool,
    pub deepspeed_fields_from_config: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    pub machine_rank: u32,
    pub main_process_ip: Option<String>,
    pub main_process_port: Option<u16>,
    pub same_network: bool,
    pub tee: String,
    pub role: String,
    pub rdzv_backend: RdzvBackend,
    pub rdzv_conf: String,
    pub max_restarts: u32,
    pub monitor_interval: f64,
}

impl From<DistributedOptions> for Topology {
    fn from(o: DistributedOptions) -> Self {
        Self {
            machine_rank: o.machine_rank.unwrap_or(0),
            main_process_ip: o.main_process_ip,
            main_process_port: o.main_process_port,
            same_network: o.same_network.unwrap_or(false),
            tee: o.tee.unwrap_or_else(|| "0".to_string()),
            role: o.role.unwrap_or_else(|| "default".to_string()),
            rdzv_backend: o.rdzv_backend.unwrap_or_default(),
            rdzv_conf: o.rdzv_conf.unwrap_or_default(),
            max_restarts: o.max_restarts.unwrap_or(0),
            monitor_interval: o.monitor_interval.unwrap_or(5.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DynamoSettings {
    pub backend: DynamoBackend,
    pub mode: DynamoMode,
    pub use_fullgraph: bool,
    pub use_dynamic: bool,
}

impl From<DynamoOptions> for DynamoSettings {
    fn from(o: DynamoOptions) -> Self {
        Self {
            backend: o.dynamo_backend.unwrap_or_default(),
            mode: o.dynamo_mode.unwrap_or_default(),
            use_fullgraph: o.dynamo_use_fullgraph.unwrap_or(false),
            use_dynamic: o.dynamo_use_dynamic.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TpuSettings {
    pub use_sudo: bool,
    pub name: Option<String>,
    pub zone: Option<String>,
    pub vm: Vec<String>,
    pub env: Vec<String>,
    pub main_training_function: String,
    pub downcast_bf16: bool,
}

impl From<TpuOptions> for TpuSettings {
    fn from(o: TpuOptions) -> Self {
        Self {
            use_sudo: o.tpu_use_sudo.unwrap_or(false),
            name: o.tpu_name,
            zone: o.tpu_zone,
            vm: o.vm,
            env: o.env,
            main_training_function: o
                .main_training_function
                .unwrap_or_else(|| "main".to_string()),
            downcast_bf16: o.downcast_bf16.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSettings {
    pub docker_image: Option<String>,
    pub docker_container: Option<String>,
    pub docker_run_flag: Option<String>,
}

impl ContainerSettings {
    /// `(name, value)` for every container field that is set to a
    /// non-empty value.
    pub fn non_empty(&self) -> Vec<(&'static str, &str)> {
        [
            ("docker_image", self.docker_image.as_deref()),
            ("docker_container", self.docker_container.as_deref()),
            ("docker_run_flag", self.docker_run_flag.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.filter(|v| !v.is_empty()).map(|v| (name, v)))
        .collect()
    }
}

impl From<ContainerOptions> for ContainerSettings {
    fn from(o: ContainerOptions) -> Self {
        Self {
            docker_image: o.docker_image,
            docker_container: o.docker_container,
            docker_run_flag: o.docker_run_flag,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeepSpeedSettings {
    pub config_file: Option<String>,
    pub zero_stage: u8,
    pub offload_optimizer_device: OffloadDevice,
    pub offload_param_device: OffloadDevice,
    pub offload_optimizer_nvme_path: String,
    pub offload_param_nvme_path: String,
    pub gradient_accumulation_steps: u32,
    pub gradient_clipping: f64,
    pub zero3_init_flag: bool,
    pub zero3_save_16bit_model: bool,
    pub hostfile: Option<String>,
    pub exclusion_filter: Option<String>,
    pub inclusion_filter: Option<String>,
    pub multinode_launcher: MultinodeLauncher,
}

impl From<DeepSpeedOptions> for DeepSpeedSettings {
    fn from(o: DeepSpeedOptions) -> Self {
        Self {
            config_file: o.deepspeed_config_file,
            zero_stage: o.zero_stage.unwrap_or(2),
            offload_optimizer_device: o.offload_optimizer_device.unwrap_or_default(),
            offload_param_device: o.offload_param_device.unwrap_or_default(),
            offload_optimizer_nvme_path: o
                .offload_optimizer_nvme_path
                .unwrap_or_else(|| "none".to_string()),
            offload_param_nvme_path: o
                .offload_param_nvme_path
                .unwrap_or_else(|| "none".to_string()),
            gradient_accumulation_steps: o.gradient_accumulation_steps.unwrap_or(1),
            gradient_clipping: o.gradient_clipping.unwrap_or(1.0),
            zero3_init_flag: o.zero3_init_flag.unwrap_or(true),
            zero3_save_16bit_model: o.zero3_save_16bit_model.unwrap_or(false),
            hostfile: o.deepspeed_hostfile,
            exclusion_filter: o.deepspeed_exclusion_filter,
            inclusion_filter: o.deepspeed_inclusion_filter,
            multinode_launcher: o.deepspeed_multinode_launcher.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FsdpSettings {
    pub offload_params: bool,
    pub min_num_params: u64,
    pub sharding_strategy: u8,
    pub auto_wrap_policy: Option<String>,
    pub transformer_layer_cls_to_wrap: Option<String>,
    pub backward_prefetch_policy: Option<String>,
    pub state_dict_type: Option<String>,
    pub forward_prefetch: bool,
    pub use_orig_params: bool,
    pub sync_module_states: bool,
}

impl From<FsdpOptions> for FsdpSettings {
    fn from(o: FsdpOptions) -> Self {
        Self {
            offload_params: o.fsdp_offload_params.unwrap_or(false),
            min_num_params: o.fsdp_min_num_params.unwrap_or(100_000_000),
            sharding_strategy: o.fsdp_sharding_strategy.unwrap_or(1),
            auto_wrap_policy: o.fsdp_auto_wrap_policy,
            transformer_layer_cls_to_wrap: o.fsdp_transformer_layer_cls_to_wrap,
            backward_prefetch_policy: o.fsdp_backward_prefetch_policy,
            state_dict_type: o.fsdp_state_dict_type,
            forward_prefetch: o.fsdp_forward_prefetch.unwrap_or(false),
            use_orig_params: o.fsdp_use_orig_params.unwrap_or(false),
            sync_module_states: o.fsdp_sync_module_states.unwrap_or(true),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MegatronSettings {
    pub tp_degree: u32,
    pub pp_degree: u32,
    pub num_micro_batches: Option<u32>,
    pub sequence_parallelism: Option<bool>,
    pub recompute_activations: Option<bool>,
    pub use_distributed_optimizer: Option<bool>,
    pub gradient_clipping: f64,
}

impl From<MegatronOptions> for MegatronSettings {
    fn from(o: MegatronOptions) -> Self {
        Self {
            tp_degree: o.megatron_lm_tp_degree.unwrap_or(1),
            pp_degree: o.megatron_lm_pp_degree.unwrap_or(1),
            num_micro_batches: o.megatron_lm_num_micro_batches,
            sequence_parallelism: o.megatron_lm_sequence_parallelism,
            recompute_activations: o.megatron_lm_recompute_activations,
            use_distributed_optimizer: o.megatron_lm_use_distributed_optimizer,
            gradient_clipping: o.megatron_lm_gradient_clipping.unwrap_or(1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AwsSettings {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl From<AwsOptions> for AwsSettings {
    fn from(o: AwsOptions) -> Self {
        Self {
            access_key_id: o.aws_access_key_id,
            secret_access_key: o.aws_secret_access_key,
        }
    }
}
