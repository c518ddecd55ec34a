// src/lib.rs

pub mod backend;
pub mod cli;
pub mod config;
pub mod errors;
pub mod fs;
pub mod gpu_ids;
pub mod logging;
pub mod plan;
pub mod probe;
pub mod resolve;
pub mod supervise;
pub mod types;

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::backend::{ensure_available, select};
use crate::cli::CliArgs;
use crate::config::load_persisted;
use crate::errors::Result;
use crate::fs::{FileSystem, ReadOnlyFileSystem, RealFileSystem};
use crate::plan::{CommandEnvBuilder, LaunchPlan};
use crate::probe::HostProbe;
use crate::resolve::{resolve, ResolvedConfig, DEFAULT_PYTHON, PYTHON_ENV};
use crate::supervise::{ExitOutcome, Runtimes, Supervisor};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - persisted defaults loading
/// - host probing and configuration resolution
/// - backend selection and availability check
/// - launch plan construction
/// - supervision of the selected backend
pub async fn run(args: CliArgs) -> Result<ExitOutcome> {
    let request = args.request;
    let persisted = load_persisted(request.config_file.as_deref(), request.cpu == Some(true))?;

    let python = request
        .python
        .clone()
        .or_else(|| std::env::var(PYTHON_ENV).ok())
        .unwrap_or_else(|| DEFAULT_PYTHON.to_string());
    let probe = HostProbe::detect(&python).await;

    let resolution = resolve(&request, persisted.as_ref(), &probe)?;
    if let Some(message) = resolution.warning_message() {
        warn!("{message}");
    }
    let cfg = resolution.config;

    let backend = select(&cfg);
    info!(%backend, mode = ?cfg.mode, num_processes = cfg.num_processes, "backend selected");
    ensure_available(backend, &probe)?;

    let base_env: BTreeMap<String, String> = std::env::vars().collect();

    if args.dry_run {
        let fs = ReadOnlyFileSystem::new(RealFileSystem);
        let plan = build_plan(&fs, base_env.clone(), &cfg, backend)?;
        print_dry_run(&cfg, &plan, &base_env);
        return Ok(ExitOutcome::Success);
    }

    let plan = build_plan(&RealFileSystem, base_env, &cfg, backend)?;
    let supervisor = Supervisor::new(Runtimes::host(&cfg.target.python));
    supervisor.run(plan).await
}

fn build_plan(
    fs: &dyn FileSystem,
    base_env: BTreeMap<String, String>,
    cfg: &ResolvedConfig,
    backend: backend::BackendId,
) -> Result<LaunchPlan> {
    CommandEnvBuilder::new(fs, base_env).build(cfg, backend)
}

/// Print what would be launched: backend, command, environment changes and
/// target.
fn print_dry_run(cfg: &ResolvedConfig, plan: &LaunchPlan, base_env: &BTreeMap<String, String>) {
    println!("trainlaunch dry-run");
    println!("  backend: {}", plan.backend);
    println!("  mode: {:?}", cfg.mode);
    println!("  compute_environment: {:?}", cfg.compute_environment);
    println!("  num_processes: {}", cfg.num_processes);
    println!("  num_machines: {}", cfg.num_machines);
    println!("  mixed_precision: {}", cfg.mixed_precision);
    println!("  gpu_ids: {}", cfg.gpu_ids);
    println!();

    println!("command: {}", plan.command_line());
    println!("target: {:?}", plan.target);

    let changed: Vec<(&String, &String)> = plan
        .env
        .iter()
        .filter(|(k, v)| base_env.get(*k) != Some(*v))
        .collect();
    println!("environment changes ({}):", changed.len());
    for (key, value) in changed {
        println!("  {key}={value}");
    }

    debug!("dry-run complete (no execution)");
}
