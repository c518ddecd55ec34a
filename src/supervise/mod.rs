// src/supervise/mod.rs

//! Running a [`LaunchPlan`] to completion.
//!
//! The [`Supervisor`] never talks to the host directly; it dispatches on the
//! plan's target to one of the runtime traits below.
//!
//! - [`ProcessRunner`] spawns a child process and reports its exit code.
//! - [`DistributedRuntime`] runs the process-group runtime inside the scoped
//!   environment patch.
//! - [`PodRuntime`] spawns accelerator-pod workers for a resolved
//!   [`EntryPoint`].
//! - [`PodClusterExecutor`] hands the re-entrant command to the pod-cluster
//!   tool.
//! - [`ManagedTrainingClient`] submits a managed-cloud job.
//!
//! Production implementations live in [`runtimes`]; tests swap in fakes.

pub mod entry_point;
pub mod runtimes;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use tracing::{error, info};

use crate::backend::BackendId;
use crate::errors::{LaunchError, Result};
use crate::plan::{EnvPatch, JobDescriptor, LaunchPlan, PlanTarget, RunFlags, StdioPolicy};

pub use entry_point::{EntryPoint, EntryPointResolver, FsEntryPointResolver};
pub use runtimes::Runtimes;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait ProcessRunner: Send + Sync {
    /// Run `argv` with exactly `env` and return the exit code.
    fn run<'a>(
        &'a self,
        argv: &'a [String],
        env: &'a BTreeMap<String, String>,
        stdio: StdioPolicy,
    ) -> BoxFuture<'a, anyhow::Result<i32>>;
}

pub trait DistributedRuntime: Send + Sync {
    /// Run the process group with `args` (runtime flags, script, script
    /// args). Reads its settings from the current process environment.
    fn run<'a>(&'a self, args: &'a [String]) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Work for [`PodRuntime::spawn`].
#[derive(Debug, Clone, PartialEq)]
pub struct PodJob {
    pub entry: EntryPoint,
    /// Argument vector each worker sees.
    pub argv: Vec<String>,
    pub num_processes: u32,
}

pub trait PodRuntime: Send + Sync {
    fn spawn<'a>(&'a self, job: PodJob) -> BoxFuture<'a, anyhow::Result<()>>;
}

pub trait PodClusterExecutor: Send + Sync {
    /// Run `command` on every host of the pod.
    fn execute<'a>(
        &'a self,
        runtime_args: &'a [String],
        remote_env: &'a [String],
        command: &'a [String],
    ) -> BoxFuture<'a, anyhow::Result<()>>;
}

pub trait ManagedTrainingClient: Send + Sync {
    /// Submit the job, wait for it and return where the model data went.
    fn submit<'a>(
        &'a self,
        descriptor: &'a JobDescriptor,
        env: &'a BTreeMap<String, String>,
    ) -> BoxFuture<'a, anyhow::Result<String>>;
}

/// How a launch ended when it did not fail with an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    /// The child failed under quiet mode; exit with status 1 and no detail.
    QuietFailure,
    JobCompleted { model_data: String },
}

impl ExitOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitOutcome::QuietFailure => 1,
            _ => 0,
        }
    }
}

pub struct Supervisor {
    runtimes: Runtimes,
}

impl Supervisor {
    pub fn new(runtimes: Runtimes) -> Self {
        Self { runtimes }
    }

    pub async fn run(&self, plan: LaunchPlan) -> Result<ExitOutcome> {
        let LaunchPlan {
            backend,
            argv,
            env,
            stdio,
            flags,
            target,
        } = plan;
        info!(%backend, cmd = %argv.join(" "), "launching");

        match target {
            PlanTarget::Process => {
                let code = self
                    .runtimes
                    .process
                    .run(&argv, &env, stdio)
                    .await
                    .map_err(|e| backend_failure(backend, flags, e))?;
                process_outcome(code, &argv, flags)
            }

            PlanTarget::DistributedRuntime => {
                let patch = EnvPatch::apply(&env);
                let result = self.runtimes.distributed.run(&argv).await;
                drop(patch);
                result.map_err(|e| backend_failure(backend, flags, e))?;
                Ok(ExitOutcome::Success)
            }

            PlanTarget::PodWorkers {
                script,
                module,
                function,
                num_processes,
            } => {
                let entry = self.runtimes.entry_points.resolve(&script, module, &function)?;
                let job = PodJob {
                    entry,
                    argv,
                    num_processes,
                };
                let patch = EnvPatch::apply(&env);
                let result = self.runtimes.pod.spawn(job).await;
                drop(patch);
                result.map_err(|e| backend_failure(backend, flags, e))?;
                Ok(ExitOutcome::Success)
            }

            PlanTarget::PodCluster {
                runtime_args,
                remote_env,
            } => {
                self.runtimes
                    .pod_cluster
                    .execute(&runtime_args, &remote_env, &argv)
                    .await
                    .map_err(|e| backend_failure(backend, flags, e))?;
                Ok(ExitOutcome::Success)
            }

            PlanTarget::ManagedJob { descriptor } => {
                let model_data = self
                    .runtimes
                    .managed
                    .submit(&descriptor, &env)
                    .await
                    .map_err(|e| backend_failure(backend, flags, e))?;
                info!("You can find your model data at: {model_data}");
                Ok(ExitOutcome::JobCompleted { model_data })
            }
        }
    }
}

fn process_outcome(code: i32, argv: &[String], flags: RunFlags) -> Result<ExitOutcome> {
    if code == 0 {
        return Ok(ExitOutcome::Success);
    }
    if flags.quiet {
        return Ok(ExitOutcome::QuietFailure);
    }
    Err(LaunchError::SubprocessFailed {
        code,
        cmd: argv.join(" "),
    })
}

/// Classify an error raised by a runtime.
///
/// A program that could not be found becomes a missing dependency. Anything
/// else gets the supervisor's own context frame; under debug mode the chain
/// below that frame is printed before propagating.
fn backend_failure(backend: BackendId, flags: RunFlags, err: anyhow::Error) -> LaunchError {
    if let Some(missing) = missing_program(&err) {
        return missing;
    }

    let err = err.context(format!("{backend} backend failed"));
    if flags.debug {
        error!("Using --debug, {backend} backend trace:");
        for line in debug_trace(&err) {
            error!("{line}");
        }
    }
    LaunchError::BackendRuntime(err)
}

/// Error chain without the outermost (supervisor) frame.
pub fn debug_trace(err: &anyhow::Error) -> Vec<String> {
    err.chain()
        .skip(1)
        .enumerate()
        .map(|(depth, cause)| format!("{depth:>3}: {cause}"))
        .collect()
}

fn missing_program(err: &anyhow::Error) -> Option<LaunchError> {
    let spawn = err
        .chain()
        .find_map(|c| c.downcast_ref::<runtimes::SpawnError>())?;
    if spawn.source.kind() != std::io::ErrorKind::NotFound {
        return None;
    }
    Some(LaunchError::DependencyMissing {
        integration: format!("`{}`", spawn.program),
        hint: "make sure it is installed and on PATH".to_string(),
    })
}
