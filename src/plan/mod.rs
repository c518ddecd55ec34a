// src/plan/mod.rs

//! Launch plans.
//!
//! [`CommandEnvBuilder`] turns a [`ResolvedConfig`] and the selected
//! [`BackendId`] into a [`LaunchPlan`]: the exact argv, the complete child
//! environment and what kind of runtime consumes them. Backend-specific
//! shaping is delegated to a [`BackendShaper`]; argument filtering, the
//! pod-cluster container check and the auxiliary env file are handled here.

pub mod aux_env;
pub mod cloud;
pub mod env_patch;
pub mod filter;
pub mod shapers;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use tracing::debug;

use crate::backend::BackendId;
use crate::errors::{LaunchError, Result};
use crate::fs::FileSystem;
use crate::resolve::ResolvedConfig;

pub use aux_env::AUX_ENV_FILE;
pub use cloud::JobDescriptor;
pub use env_patch::{EnvPatch, PatchGuard};
pub use shapers::{default_shaper, BackendShaper, ShapeContext, Shaped};

/// What consumes a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanTarget {
    /// Spawn `argv` as a child process with `env`.
    Process,
    /// Hand `argv` to the distributed process-group runtime inside a scoped
    /// environment patch.
    DistributedRuntime,
    /// Spawn `num_processes` pod workers calling `function` from `script`.
    /// `argv` becomes the workers' argument vector.
    PodWorkers {
        script: String,
        module: bool,
        function: String,
        num_processes: u32,
    },
    /// Run `argv` on every host of the pod through the cluster tool.
    PodCluster {
        runtime_args: Vec<String>,
        remote_env: Vec<String>,
    },
    /// Submit a managed-cloud training job.
    ManagedJob { descriptor: JobDescriptor },
}

/// How the child's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioPolicy {
    /// Pass the launcher's stdin/stdout/stderr straight through.
    Inherit,
    /// Close stdin and capture stdout. Managed jobs carry this; their
    /// client pipes its own streams.
    Capture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunFlags {
    pub quiet: bool,
    pub debug: bool,
}

/// Everything the supervisor needs to start a backend. Consumed by value.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
    pub backend: BackendId,
    pub argv: Vec<String>,
    /// Complete child environment, not a diff.
    pub env: BTreeMap<String, String>,
    pub stdio: StdioPolicy,
    pub flags: RunFlags,
    pub target: PlanTarget,
}

impl LaunchPlan {
    /// `argv` as a single shell-like line for logs and error messages.
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

pub struct CommandEnvBuilder<'a> {
    fs: &'a dyn FileSystem,
    base_env: BTreeMap<String, String>,
    aux_env_path: PathBuf,
    shapers: HashMap<BackendId, Box<dyn BackendShaper>>,
}

impl<'a> CommandEnvBuilder<'a> {
    /// `base_env` is the environment the plan's env starts from, normally
    /// the launcher's own.
    pub fn new(fs: &'a dyn FileSystem, base_env: BTreeMap<String, String>) -> Self {
        Self {
            fs,
            base_env,
            aux_env_path: PathBuf::from(AUX_ENV_FILE),
            shapers: HashMap::new(),
        }
    }

    /// Replace the default shaper for one backend.
    pub fn with_shaper(mut self, backend: BackendId, shaper: Box<dyn BackendShaper>) -> Self {
        self.shapers.insert(backend, shaper);
        self
    }

    pub fn with_aux_env_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.aux_env_path = path.into();
        self
    }

    pub fn build(&self, cfg: &ResolvedConfig, backend: BackendId) -> Result<LaunchPlan> {
        if backend == BackendId::AcceleratorPodCluster {
            reject_container_fields(cfg)?;
        }

        let fallback;
        let shaper: &dyn BackendShaper = match self.shapers.get(&backend) {
            Some(custom) => custom.as_ref(),
            None => {
                fallback = default_shaper(backend);
                fallback.as_ref()
            }
        };

        let Shaped {
            program,
            fields: extra,
            env: overrides,
            target,
            append_script,
        } = shaper.shape(cfg, &ShapeContext { fs: self.fs })?;

        let mut fields = filter::resolved_fields(cfg);
        fields.extend(extra);

        let mut argv = program;
        argv.extend(filter::filter_args(&fields, shaper.accepted_flags(cfg)));
        if append_script {
            argv.push(cfg.target.training_script.clone());
            argv.extend(cfg.target.script_args.iter().cloned());
        }

        let mut env = self.base_env.clone();
        env.extend(overrides);

        if backend == BackendId::DeepGradientSharding
            && cfg.is_multi_node()
            && cfg.deepspeed.multinode_launcher.propagates_env_file()
        {
            aux_env::append_aux_env(self.fs, &self.aux_env_path, &env)?;
            debug!(path = %self.aux_env_path.display(), "auxiliary env file appended");
        }

        let stdio = match target {
            PlanTarget::ManagedJob { .. } => StdioPolicy::Capture,
            _ => StdioPolicy::Inherit,
        };

        debug!(%backend, argc = argv.len(), env_len = env.len(), "launch plan built");

        Ok(LaunchPlan {
            backend,
            argv,
            env,
            stdio,
            flags: RunFlags {
                quiet: cfg.quiet,
                debug: cfg.debug,
            },
            target,
        })
    }
}

/// The pod-cluster tool cannot run inside containers; name every offending
/// field at once.
fn reject_container_fields(cfg: &ResolvedConfig) -> Result<()> {
    let offending = cfg.container.non_empty();
    if offending.is_empty() {
        return Ok(());
    }
    let listed: Vec<String> = offending
        .iter()
        .map(|(name, value)| format!("{name}=\"{value}\""))
        .collect();
    Err(LaunchError::UnsupportedCombination(format!(
        "Docker containers are not supported for the accelerator pod cluster launcher, please remove the following flags:\n{}",
        listed.join("\n")
    )))
}
