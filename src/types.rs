use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Mixed-precision mode handed to the training process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MixedPrecision {
    #[default]
    No,
    Fp16,
    Bf16,
    Fp8,
}

impl MixedPrecision {
    pub fn as_str(self) -> &'static str {
        match self {
            MixedPrecision::No => "no",
            MixedPrecision::Fp16 => "fp16",
            MixedPrecision::Bf16 => "bf16",
            MixedPrecision::Fp8 => "fp8",
        }
    }
}

impl fmt::Display for MixedPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MixedPrecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "no" => Ok(MixedPrecision::No),
            "fp16" => Ok(MixedPrecision::Fp16),
            "bf16" => Ok(MixedPrecision::Bf16),
            "fp8" => Ok(MixedPrecision::Fp8),
            other => Err(format!(
                "invalid mixed_precision: {other} (expected one of no, fp16, bf16, fp8)"
            )),
        }
    }
}

/// Where the persisted configuration expects training to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComputeEnvironment {
    #[default]
    LocalMachine,
    AmazonSagemaker,
}

impl ComputeEnvironment {
    pub fn is_managed_cloud(self) -> bool {
        matches!(self, ComputeEnvironment::AmazonSagemaker)
    }
}

/// Distributed type as saved in a persisted configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributedType {
    #[default]
    No,
    MultiCpu,
    MultiGpu,
    MultiNpu,
    MultiXpu,
    Tpu,
    Deepspeed,
    Fsdp,
    MegatronLm,
    /// Managed-cloud data parallelism.
    DataParallel,
    /// Managed-cloud model parallelism.
    ModelParallel,
}

/// The single execution strategy of a resolved configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistributedMode {
    #[default]
    SingleDevice,
    MultiGpu,
    AcceleratorPod,
    GradientSharding,
    ModelSharding,
    ModelParallel,
}

impl DistributedMode {
    pub fn from_persisted(kind: DistributedType) -> Self {
        match kind {
            DistributedType::Deepspeed => DistributedMode::GradientSharding,
            DistributedType::MultiGpu | DistributedType::MultiNpu | DistributedType::MultiXpu => {
                DistributedMode::MultiGpu
            }
            DistributedType::Tpu => DistributedMode::AcceleratorPod,
            DistributedType::Fsdp => DistributedMode::ModelSharding,
            DistributedType::MegatronLm => DistributedMode::ModelParallel,
            DistributedType::No
            | DistributedType::MultiCpu
            | DistributedType::DataParallel
            | DistributedType::ModelParallel => DistributedMode::SingleDevice,
        }
    }
}

/// Graph-compilation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamoBackend {
    #[default]
    No,
    Eager,
    AotEager,
    Inductor,
    Nvfuser,
    AotNvfuser,
    AotCudagraphs,
    Ofi,
    Fx2trt,
    Onnxrt,
    Ipex,
}

impl DynamoBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            DynamoBackend::No => "no",
            DynamoBackend::Eager => "eager",
            DynamoBackend::AotEager => "aot_eager",
            DynamoBackend::Inductor => "inductor",
            DynamoBackend::Nvfuser => "nvfuser",
            DynamoBackend::AotNvfuser => "aot_nvfuser",
            DynamoBackend::AotCudagraphs => "aot_cudagraphs",
            DynamoBackend::Ofi => "ofi",
            DynamoBackend::Fx2trt => "fx2trt",
            DynamoBackend::Onnxrt => "onnxrt",
            DynamoBackend::Ipex => "ipex",
        }
    }
}

impl FromStr for DynamoBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            DynamoBackend::No,
            DynamoBackend::Eager,
            DynamoBackend::AotEager,
            DynamoBackend::Inductor,
            DynamoBackend::Nvfuser,
            DynamoBackend::AotNvfuser,
            DynamoBackend::AotCudagraphs,
            DynamoBackend::Ofi,
            DynamoBackend::Fx2trt,
            DynamoBackend::Onnxrt,
            DynamoBackend::Ipex,
        ];
        let wanted = s.trim().to_lowercase();
        all.into_iter()
            .find(|b| b.as_str() == wanted)
            .ok_or_else(|| format!("invalid dynamo_backend: {wanted}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DynamoMode {
    #[default]
    Default,
    ReduceOverhead,
    MaxAutotune,
}

impl DynamoMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DynamoMode::Default => "default",
            DynamoMode::ReduceOverhead => "reduce-overhead",
            DynamoMode::MaxAutotune => "max-autotune",
        }
    }
}

impl FromStr for DynamoMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(DynamoMode::Default),
            "reduce-overhead" => Ok(DynamoMode::ReduceOverhead),
            "max-autotune" => Ok(DynamoMode::MaxAutotune),
            other => Err(format!("invalid dynamo_mode: {other}")),
        }
    }
}

/// Multi-node launcher used by the gradient-sharding backend.
///
/// `Standard` relies on cluster rendezvous and does not need the auxiliary
/// environment file; every other launcher ships the environment through it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MultinodeLauncher {
    #[default]
    Pdsh,
    Standard,
    Openmpi,
    Mvapich,
    Mpich,
}

impl MultinodeLauncher {
    pub fn as_str(self) -> &'static str {
        match self {
            MultinodeLauncher::Pdsh => "pdsh",
            MultinodeLauncher::Standard => "standard",
            MultinodeLauncher::Openmpi => "openmpi",
            MultinodeLauncher::Mvapich => "mvapich",
            MultinodeLauncher::Mpich => "mpich",
        }
    }

    pub fn propagates_env_file(self) -> bool {
        !matches!(self, MultinodeLauncher::Standard)
    }
}

impl FromStr for MultinodeLauncher {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pdsh" => Ok(MultinodeLauncher::Pdsh),
            "standard" => Ok(MultinodeLauncher::Standard),
            "openmpi" => Ok(MultinodeLauncher::Openmpi),
            "mvapich" => Ok(MultinodeLauncher::Mvapich),
            "mpich" => Ok(MultinodeLauncher::Mpich),
            other => Err(format!(
                "invalid deepspeed_multinode_launcher: {other} (expected pdsh, standard, openmpi, mvapich or mpich)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RdzvBackend {
    #[default]
    Static,
    C10d,
}

impl RdzvBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            RdzvBackend::Static => "static",
            RdzvBackend::C10d => "c10d",
        }
    }
}

impl FromStr for RdzvBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "static" => Ok(RdzvBackend::Static),
            "c10d" => Ok(RdzvBackend::C10d),
            other => Err(format!("invalid rdzv_backend: {other} (expected static or c10d)")),
        }
    }
}

/// Offload target for optimizer state or parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OffloadDevice {
    #[default]
    None,
    Cpu,
    Nvme,
}

impl OffloadDevice {
    pub fn as_str(self) -> &'static str {
        match self {
            OffloadDevice::None => "none",
            OffloadDevice::Cpu => "cpu",
            OffloadDevice::Nvme => "nvme",
        }
    }
}

impl FromStr for OffloadDevice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(OffloadDevice::None),
            "cpu" => Ok(OffloadDevice::Cpu),
            "nvme" => Ok(OffloadDevice::Nvme),
            other => Err(format!("invalid offload device: {other} (expected none, cpu or nvme)")),
        }
    }
}
