// src/config/mod.rs

//! Persisted launch defaults.
//!
//! Responsibilities:
//! - Define the serde-backed data model (`model.rs`).
//! - Locate and load a config file from disk (`loader.rs`).
//! - Validate basic invariants of the saved values (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_persisted};
pub use model::{CloudSection, ConfigValue, PersistedDefaults, SubConfig};
pub use validate::validate_persisted;
