// src/config/validate.rs

use crate::config::model::PersistedDefaults;
use crate::errors::{LaunchError, Result};

/// Check the saved values that cannot be expressed in the serde model.
pub fn validate_persisted(cfg: &PersistedDefaults) -> Result<()> {
    validate_counts(cfg)?;
    validate_gpu_ids(cfg)?;
    Ok(())
}

fn validate_counts(cfg: &PersistedDefaults) -> Result<()> {
    let checks = [
        ("num_processes", cfg.num_processes),
        ("num_machines", cfg.num_machines),
        ("num_cpu_threads_per_process", cfg.num_cpu_threads_per_process),
    ];
    for (name, value) in checks {
        if value == Some(0) {
            return Err(LaunchError::config(format!(
                "config file: `{name}` must be >= 1 (got 0)"
            )));
        }
    }

    if let (Some(rank), Some(machines)) = (cfg.machine_rank, cfg.num_machines) {
        if rank >= machines {
            return Err(LaunchError::config(format!(
                "config file: `machine_rank` ({rank}) must be smaller than `num_machines` ({machines})"
            )));
        }
    }
    Ok(())
}

fn validate_gpu_ids(cfg: &PersistedDefaults) -> Result<()> {
    if let Some(ids) = &cfg.gpu_ids {
        if ids.count() == Some(0) {
            return Err(LaunchError::config(
                "config file: `gpu_ids` must list at least one id".to_string(),
            ));
        }
    }
    Ok(())
}
