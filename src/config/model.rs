// src/config/model.rs

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::gpu_ids::GpuIds;
use crate::types::{ComputeEnvironment, DistributedType, MixedPrecision, RdzvBackend};

/// Flat scalar stored in one of the nested per-backend maps.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::Int(i) => Some(*i != 0),
            ConfigValue::Str(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            ConfigValue::Float(_) => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ConfigValue::Int(i) => u64::try_from(*i).ok(),
            // YAML writes `1e8` style values as floats.
            ConfigValue::Float(f) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as u64),
            ConfigValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Int(i) => Some(*i as f64),
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Str(s) => s.trim().parse().ok(),
            ConfigValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{b}"),
            ConfigValue::Int(i) => write!(f, "{i}"),
            ConfigValue::Float(x) => write!(f, "{x}"),
            ConfigValue::Str(s) => f.write_str(s),
        }
    }
}

/// One nested per-backend map. `null` entries deserialize to `None`.
pub type SubConfig = BTreeMap<String, Option<ConfigValue>>;

/// A previously saved launch configuration.
///
/// Typical YAML:
///
/// ```yaml
/// compute_environment: LOCAL_MACHINE
/// distributed_type: MULTI_GPU
/// mixed_precision: fp16
/// num_machines: 1
/// num_processes: 2
/// gpu_ids: all
/// deepspeed_config: {}
/// fsdp_config:
///   fsdp_offload_params: false
/// ```
///
/// Only `compute_environment` and `distributed_type` are required.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PersistedDefaults {
    pub compute_environment: ComputeEnvironment,
    pub distributed_type: DistributedType,

    #[serde(default)]
    pub mixed_precision: Option<MixedPrecision>,
    #[serde(default)]
    pub use_cpu: Option<bool>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub gpu_ids: Option<GpuIds>,

    #[serde(default)]
    pub num_processes: Option<u32>,
    #[serde(default)]
    pub num_machines: Option<u32>,
    #[serde(default)]
    pub num_cpu_threads_per_process: Option<u32>,
    #[serde(default)]
    pub machine_rank: Option<u32>,
    #[serde(default)]
    pub main_process_ip: Option<String>,
    #[serde(default)]
    pub main_process_port: Option<u16>,
    #[serde(default)]
    pub rdzv_backend: Option<RdzvBackend>,
    #[serde(default)]
    pub same_network: Option<bool>,

    #[serde(default)]
    pub main_training_function: Option<String>,
    #[serde(default)]
    pub downcast_bf16: Option<bool>,
    #[serde(default)]
    pub tpu_use_cluster: Option<bool>,
    #[serde(default)]
    pub tpu_use_sudo: Option<bool>,
    #[serde(default)]
    pub tpu_name: Option<String>,
    #[serde(default)]
    pub tpu_zone: Option<String>,

    #[serde(default)]
    pub deepspeed_config: SubConfig,
    #[serde(default)]
    pub fsdp_config: SubConfig,
    #[serde(default)]
    pub megatron_lm_config: SubConfig,
    #[serde(default)]
    pub dynamo_config: SubConfig,
    #[serde(default)]
    pub ipex_config: SubConfig,

    #[serde(flatten)]
    pub cloud: CloudSection,
}

/// Managed-cloud submission settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CloudSection {
    #[serde(default)]
    pub ec2_instance_type: Option<String>,
    #[serde(default)]
    pub iam_role_name: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub base_job_name: Option<String>,
    #[serde(default)]
    pub pytorch_version: Option<String>,
    #[serde(default)]
    pub transformers_version: Option<String>,
    #[serde(default)]
    pub py_version: Option<String>,
    #[serde(default)]
    pub sagemaker_inputs_file: Option<String>,
    #[serde(default)]
    pub sagemaker_metrics_file: Option<String>,
    #[serde(default)]
    pub additional_args: BTreeMap<String, ConfigValue>,
}

impl PersistedDefaults {
    pub fn is_local_machine(&self) -> bool {
        self.compute_environment == ComputeEnvironment::LocalMachine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_accept_loose_spellings() {
        assert_eq!(ConfigValue::Str("yes".into()).as_bool(), Some(true));
        assert_eq!(ConfigValue::Int(0).as_bool(), Some(false));
        assert_eq!(ConfigValue::Float(1e8).as_u64(), Some(100_000_000));
        assert_eq!(ConfigValue::Float(1.5).as_u64(), None);
        assert_eq!(ConfigValue::Int(-1).as_u64(), None);
        assert_eq!(ConfigValue::Str(" 2.5 ".into()).as_f64(), Some(2.5));
    }

    #[test]
    fn nested_maps_keep_nulls() {
        let map: SubConfig = serde_json::from_str(r#"{"zero_stage": 2, "offload": null}"#).unwrap();
        assert_eq!(map["zero_stage"], Some(ConfigValue::Int(2)));
        assert_eq!(map["offload"], None);
    }
}
