// src/plan/aux_env.rs

//! The auxiliary env file read by multi-node gradient-sharding launchers.
//!
//! Remote ranks are started by a launcher (pdsh, mpirun, ...) that does not
//! forward the caller's environment; it sources this file on every node.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;

use crate::errors::{LaunchError, Result};
use crate::fs::FileSystem;

/// Written to the working directory, where the launcher looks for it.
pub const AUX_ENV_FILE: &str = ".deepspeed_env";

/// Append one `KEY=VALUE` line per variable.
///
/// The file has no quoting, so values containing a space, `;` or a newline
/// are skipped.
pub fn append_aux_env(fs: &dyn FileSystem, path: &Path, vars: &BTreeMap<String, String>) -> Result<()> {
    let mut contents = String::new();
    for (key, value) in vars {
        if key.is_empty() || value.contains([' ', ';', '\n']) {
            continue;
        }
        contents.push_str(key);
        contents.push('=');
        contents.push_str(value);
        contents.push('\n');
    }

    fs.append(path, contents.as_bytes())
        .with_context(|| format!("writing auxiliary env file {}", path.display()))
        .map_err(LaunchError::BackendRuntime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    #[test]
    fn skips_values_the_launcher_cannot_source() {
        let fs = MockFileSystem::new();
        let path = Path::new("/job/.deepspeed_env");
        let vars: BTreeMap<String, String> = [
            ("NCCL_DEBUG", "INFO"),
            ("PS1", "\\u@\\h $ "),
            ("PROMPT_COMMAND", "a;b"),
            ("OMP_NUM_THREADS", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        append_aux_env(&fs, path, &vars).unwrap();
        append_aux_env(&fs, path, &vars).unwrap();

        assert_eq!(
            fs.contents(path).unwrap(),
            "NCCL_DEBUG=INFO\nOMP_NUM_THREADS=1\nNCCL_DEBUG=INFO\nOMP_NUM_THREADS=1\n"
        );
    }
}
