// src/supervise/runtimes.rs

//! Host runtimes backed by `tokio::process`.
//!
//! Every runtime here starts an external program. A program that cannot be
//! started is reported as a [`SpawnError`], which the supervisor turns into a
//! missing-dependency error when the program was not found.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use crate::fs::RealFileSystem;
use crate::plan::{JobDescriptor, StdioPolicy};
use crate::supervise::entry_point::{EntryPointResolver, FsEntryPointResolver};
use crate::supervise::{
    BoxFuture, DistributedRuntime, ManagedTrainingClient, PodClusterExecutor, PodJob, PodRuntime,
    ProcessRunner,
};

#[derive(Debug, thiserror::Error)]
#[error("failed to start `{program}`")]
pub struct SpawnError {
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// The set of runtimes a [`Supervisor`](super::Supervisor) dispatches to.
pub struct Runtimes {
    pub process: Box<dyn ProcessRunner>,
    pub distributed: Box<dyn DistributedRuntime>,
    pub pod: Box<dyn PodRuntime>,
    pub pod_cluster: Box<dyn PodClusterExecutor>,
    pub managed: Box<dyn ManagedTrainingClient>,
    pub entry_points: Box<dyn EntryPointResolver>,
}

impl Runtimes {
    /// Production runtimes using `python` for interpreter-hosted backends.
    pub fn host(python: &str) -> Self {
        let mut module_roots = vec![PathBuf::from(".")];
        if let Some(paths) = std::env::var_os("PYTHONPATH") {
            module_roots.extend(std::env::split_paths(&paths));
        }

        Self {
            process: Box::new(HostProcessRunner),
            distributed: Box::new(TorchDistributedRuntime {
                python: python.to_string(),
            }),
            pod: Box::new(XlaPodRuntime {
                python: python.to_string(),
            }),
            pod_cluster: Box::new(XlaClusterExecutor {
                python: python.to_string(),
            }),
            managed: Box::new(ManagedJobClient {
                python: python.to_string(),
            }),
            entry_points: Box::new(FsEntryPointResolver::new(Arc::new(RealFileSystem), module_roots)),
        }
    }
}

fn spawn_error(program: &str) -> impl FnOnce(std::io::Error) -> SpawnError + '_ {
    move |source| SpawnError {
        program: program.to_string(),
        source,
    }
}

/// Run `cmd` to completion with inherited stdio and fail on a non-zero exit.
async fn run_checked(mut cmd: Command, program: &str, what: &str) -> anyhow::Result<()> {
    let status = cmd
        .spawn()
        .map_err(spawn_error(program))?
        .wait()
        .await
        .with_context(|| format!("waiting for {what}"))?;
    if !status.success() {
        bail!("{what} exited with status {}", status.code().unwrap_or(1));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct HostProcessRunner;

impl ProcessRunner for HostProcessRunner {
    fn run<'a>(
        &'a self,
        argv: &'a [String],
        env: &'a BTreeMap<String, String>,
        stdio: StdioPolicy,
    ) -> BoxFuture<'a, anyhow::Result<i32>> {
        Box::pin(async move {
            let (program, args) = argv
                .split_first()
                .ok_or_else(|| anyhow!("empty command line"))?;

            let mut cmd = Command::new(program);
            cmd.args(args).env_clear().envs(env);

            let status = match stdio {
                StdioPolicy::Inherit => cmd
                    .spawn()
                    .map_err(spawn_error(program))?
                    .wait()
                    .await
                    .with_context(|| format!("waiting for `{program}`"))?,
                // Captured stdout goes to the debug log.
                StdioPolicy::Capture => {
                    let output = cmd
                        .stdin(Stdio::null())
                        .output()
                        .await
                        .map_err(spawn_error(program))?;
                    for line in String::from_utf8_lossy(&output.stdout).lines() {
                        debug!(program = %program, "stdout: {}", line);
                    }
                    output.status
                }
            };
            let code = status.code().unwrap_or(1);
            debug!(program = %program, code, "child exited");
            Ok(code)
        })
    }
}

/// Process-group runtime started through the interpreter's module runner.
#[derive(Debug)]
pub struct TorchDistributedRuntime {
    python: String,
}

impl DistributedRuntime for TorchDistributedRuntime {
    fn run<'a>(&'a self, args: &'a [String]) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let mut cmd = Command::new(&self.python);
            cmd.args(["-m", "torch.distributed.run"]).args(args);
            run_checked(cmd, &self.python, "distributed process group").await
        })
    }
}

const POD_BOOTSTRAP: &str = r#"
import importlib, json, sys
spec = json.loads(sys.argv[1])
if spec["search_path"] is not None:
    sys.path.append(spec["search_path"])
import torch_xla.distributed.xla_multiprocessing as xmp
mod = importlib.import_module(spec["module"])
fn = getattr(mod, spec["function"])
sys.argv = spec["argv"]

def _worker(index):
    fn()

xmp.spawn(_worker, args=(), nprocs=spec["nprocs"])
"#;

/// Single-host pod workers spawned by the XLA multiprocessing helper.
#[derive(Debug)]
pub struct XlaPodRuntime {
    python: String,
}

impl PodRuntime for XlaPodRuntime {
    fn spawn<'a>(&'a self, job: PodJob) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let spec = serde_json::json!({
                "module": job.entry.module,
                "search_path": job.entry.search_path.map(|p| p.display().to_string()),
                "function": job.entry.function,
                "argv": job.argv,
                "nprocs": job.num_processes,
            });
            let mut cmd = Command::new(&self.python);
            cmd.args(["-c", POD_BOOTSTRAP]).arg(spec.to_string());
            run_checked(cmd, &self.python, "accelerator pod workers").await
        })
    }
}

/// Multi-host pod launches through the XLA distribution tool.
#[derive(Debug)]
pub struct XlaClusterExecutor {
    python: String,
}

impl PodClusterExecutor for XlaClusterExecutor {
    fn execute<'a>(
        &'a self,
        runtime_args: &'a [String],
        remote_env: &'a [String],
        command: &'a [String],
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let mut cmd = Command::new(&self.python);
            cmd.args(["-m", "torch_xla.distributed.xla_dist"]).args(runtime_args);
            for entry in remote_env {
                cmd.arg("--env").arg(entry);
            }
            cmd.arg("--").args(command);
            run_checked(cmd, &self.python, "pod cluster launch").await
        })
    }
}

const MANAGED_JOB_BOOTSTRAP: &str = r#"
import json, sys
from sagemaker.huggingface import HuggingFace
job = json.load(sys.stdin)
inputs = job.pop("inputs") or None
estimator = HuggingFace(**job)
estimator.fit(inputs=inputs)
print(estimator.model_data)
"#;

/// Managed-cloud submission through the vendor's python client.
///
/// The descriptor is written to the client's stdin; the last stdout line is
/// the model data location.
#[derive(Debug)]
pub struct ManagedJobClient {
    python: String,
}

impl ManagedTrainingClient for ManagedJobClient {
    fn submit<'a>(
        &'a self,
        descriptor: &'a JobDescriptor,
        env: &'a BTreeMap<String, String>,
    ) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            let payload = serde_json::to_vec(descriptor).context("serializing job descriptor")?;

            let mut child = Command::new(&self.python)
                .args(["-c", MANAGED_JOB_BOOTSTRAP])
                .env_clear()
                .envs(env)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .spawn()
                .map_err(spawn_error(&self.python))?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&payload).await.context("sending job descriptor")?;
            }
            let mut output = String::new();
            if let Some(mut stdout) = child.stdout.take() {
                stdout
                    .read_to_string(&mut output)
                    .await
                    .context("reading managed job output")?;
            }

            let status = child.wait().await.context("waiting for managed job client")?;
            if !status.success() {
                bail!("managed job client exited with status {}", status.code().unwrap_or(1));
            }
            output
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string())
                .ok_or_else(|| anyhow!("managed job client reported no model data location"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn path_env() -> BTreeMap<String, String> {
        std::env::var("PATH")
            .map(|path| BTreeMap::from([("PATH".to_string(), path)]))
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn captured_child_reports_its_exit_code() {
        let code = HostProcessRunner
            .run(
                &argv(&["/bin/sh", "-c", "echo step; read line; exit 3"]),
                &path_env(),
                StdioPolicy::Capture,
            )
            .await
            .unwrap();
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let err = HostProcessRunner
            .run(
                &argv(&["/nonexistent/trainlaunch-child"]),
                &path_env(),
                StdioPolicy::Capture,
            )
            .await
            .unwrap_err();
        let spawn = err.downcast_ref::<SpawnError>().expect("spawn error");
        assert_eq!(spawn.source.kind(), std::io::ErrorKind::NotFound);
    }
}
