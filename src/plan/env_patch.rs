// src/plan/env_patch.rs

//! Scoped mutation of the launcher's own process environment.
//!
//! In-process runtimes read their settings from the environment, so the
//! planned variables are set for the duration of the call and the previous
//! values restored afterwards, on success, error and unwind alike.

use std::collections::BTreeMap;

use scopeguard::ScopeGuard;
use tracing::trace;

/// Previous value of every variable a patch touched (`None` = was unset).
#[derive(Debug, Default)]
pub struct EnvPatch {
    saved: Vec<(String, Option<String>)>,
}

/// Restores the environment when dropped.
pub type PatchGuard = ScopeGuard<EnvPatch, fn(EnvPatch)>;

impl EnvPatch {
    /// Set every variable in `vars` that differs from the current
    /// environment and return a guard that undoes it.
    ///
    /// The process environment is shared, so callers must not run two
    /// patches concurrently.
    pub fn apply(vars: &BTreeMap<String, String>) -> PatchGuard {
        let mut patch = EnvPatch::default();
        for (key, value) in vars {
            let previous = std::env::var(key).ok();
            if previous.as_deref() == Some(value.as_str()) {
                continue;
            }
            // SAFETY: the binary runs a current-thread runtime and spawns
            // no other threads, so nothing reads the environment while the
            // supervisor patches it around a single runtime call.
            unsafe { std::env::set_var(key, value) };
            patch.saved.push((key.clone(), previous));
        }
        trace!(changed = patch.saved.len(), "environment patched");
        scopeguard::guard(patch, EnvPatch::restore as fn(EnvPatch))
    }

    pub fn changed(&self) -> usize {
        self.saved.len()
    }

    fn restore(self) {
        for (key, previous) in self.saved.into_iter().rev() {
            // SAFETY: see `apply`.
            match previous {
                Some(value) => unsafe { std::env::set_var(&key, value) },
                None => unsafe { std::env::remove_var(&key) },
            }
        }
    }
}
