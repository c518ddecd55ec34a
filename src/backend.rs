// src/backend.rs

//! Backend selection.
//!
//! [`select`] is a total function over [`ResolvedConfig`]: every
//! configuration maps to exactly one [`BackendId`], most specific first.

use std::fmt;

use crate::errors::{LaunchError, Result};
use crate::probe::{EnvProbe, Integration};
use crate::resolve::ResolvedConfig;
use crate::types::DistributedMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendId {
    /// One child process running the script directly.
    Simple,
    /// Generic distributed process-group runtime (multi-GPU, model
    /// sharding, model parallel).
    MultiProcess,
    /// Gradient-sharding runtime.
    DeepGradientSharding,
    /// Single-host accelerator pod.
    AcceleratorPod,
    /// Multi-host accelerator pod.
    AcceleratorPodCluster,
    /// Managed-cloud training job.
    ManagedCloud,
}

impl BackendId {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendId::Simple => "simple",
            BackendId::MultiProcess => "multi-process",
            BackendId::DeepGradientSharding => "deep-gradient-sharding",
            BackendId::AcceleratorPod => "accelerator-pod",
            BackendId::AcceleratorPodCluster => "accelerator-pod-cluster",
            BackendId::ManagedCloud => "managed-cloud",
        }
    }

    /// External integration this backend hands off to, if any.
    pub fn required_integration(self) -> Option<Integration> {
        match self {
            BackendId::DeepGradientSharding => Some(Integration::Deepspeed),
            BackendId::AcceleratorPod | BackendId::AcceleratorPodCluster => {
                Some(Integration::TorchXla)
            }
            BackendId::ManagedCloud => Some(Integration::Sagemaker),
            BackendId::Simple | BackendId::MultiProcess => None,
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the backend for a resolved configuration.
///
/// Forcing CPU execution always falls through to [`BackendId::Simple`]
/// unless the compute environment is managed-cloud.
pub fn select(cfg: &ResolvedConfig) -> BackendId {
    let on_device = !cfg.use_cpu;

    match cfg.mode {
        DistributedMode::GradientSharding if on_device => BackendId::DeepGradientSharding,
        DistributedMode::ModelSharding if on_device => BackendId::MultiProcess,
        DistributedMode::ModelParallel if on_device => BackendId::MultiProcess,
        DistributedMode::MultiGpu if on_device => BackendId::MultiProcess,
        DistributedMode::AcceleratorPod if on_device => {
            if cfg.tpu_use_cluster {
                BackendId::AcceleratorPodCluster
            } else {
                BackendId::AcceleratorPod
            }
        }
        _ if cfg.compute_environment.is_managed_cloud() => BackendId::ManagedCloud,
        _ => BackendId::Simple,
    }
}

/// Fail early when the selected backend's integration is not installed.
pub fn ensure_available(backend: BackendId, probe: &dyn EnvProbe) -> Result<()> {
    match backend.required_integration() {
        Some(integration) if !probe.has_integration(integration) => {
            Err(LaunchError::DependencyMissing {
                integration: integration.name().to_string(),
                hint: integration.install_hint().to_string(),
            })
        }
        _ => Ok(()),
    }
}
