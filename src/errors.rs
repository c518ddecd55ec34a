// src/errors.rs

//! Crate-wide error type and exit-code mapping.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LaunchError {
    /// Mutually exclusive flags, invalid GPU-id cardinality, missing
    /// capability and similar pre-launch problems.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{integration} is not installed => {hint}")]
    DependencyMissing {
        integration: String,
        hint: String,
    },

    #[error("Entry point error: {0}")]
    EntryPoint(String),

    #[error("Unsupported combination: {0}")]
    UnsupportedCombination(String),

    #[error("Command '{cmd}' returned non-zero exit status {code}.")]
    SubprocessFailed { code: i32, cmd: String },

    #[error("Backend runtime failed: {0:#}")]
    BackendRuntime(#[source] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}

impl LaunchError {
    pub fn config(msg: impl Into<String>) -> Self {
        LaunchError::Config(msg.into())
    }

    /// Process exit code to report for this error.
    ///
    /// A failed child keeps its own code; everything else exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::SubprocessFailed { code, .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, LaunchError>;
