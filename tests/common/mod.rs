#![allow(dead_code)]

use std::collections::BTreeMap;

use trainlaunch::backend::select;
use trainlaunch::config::model::PersistedDefaults;
use trainlaunch::errors::{LaunchError, Result};
use trainlaunch::fs::FileSystem;
use trainlaunch::plan::{CommandEnvBuilder, LaunchPlan};
use trainlaunch::probe::EnvProbe;
use trainlaunch::resolve::{resolve, RawRequest, ResolvedConfig};

pub use trainlaunch_test_utils::{
    init_tracing, with_timeout, FakeProbe, FakeRuntimes, PersistedDefaultsBuilder,
    RawRequestBuilder,
};

/// Resolve and unwrap, for tests that only care about the happy path.
pub fn resolved(
    request: &RawRequest,
    persisted: Option<&PersistedDefaults>,
    probe: &dyn EnvProbe,
) -> ResolvedConfig {
    resolve(request, persisted, probe)
        .expect("resolution should succeed")
        .config
}

/// Resolve and return the error, panicking if resolution succeeded.
pub fn resolve_err(
    request: &RawRequest,
    persisted: Option<&PersistedDefaults>,
    probe: &dyn EnvProbe,
) -> LaunchError {
    match resolve(request, persisted, probe) {
        Ok(resolution) => panic!("expected resolution to fail, got {:?}", resolution.config),
        Err(err) => err,
    }
}

/// A small fixed launcher environment.
pub fn base_env() -> BTreeMap<String, String> {
    [
        ("PATH", "/usr/local/bin:/usr/bin"),
        ("HOME", "/home/trainer"),
        ("PROMPT_COMMAND", "history -a; history -n"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Build the plan for the backend `select` picks.
pub fn try_plan(
    cfg: &ResolvedConfig,
    fs: &dyn FileSystem,
    env: BTreeMap<String, String>,
) -> Result<LaunchPlan> {
    CommandEnvBuilder::new(fs, env).build(cfg, select(cfg))
}

pub fn plan(cfg: &ResolvedConfig, fs: &dyn FileSystem) -> LaunchPlan {
    try_plan(cfg, fs, base_env()).expect("plan should build")
}
