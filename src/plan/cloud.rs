// src/plan/cloud.rs

//! Managed-cloud job descriptors.
//!
//! The managed-training client receives one JSON document describing the
//! job; the script's trailing `--name value` arguments become
//! hyperparameters and the optional TSV side files provide metric
//! definitions and named data inputs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::config::model::ConfigValue;
use crate::errors::{LaunchError, Result};
use crate::fs::FileSystem;
use crate::resolve::ResolvedConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDescriptor {
    pub entry_point: String,
    pub source_dir: String,
    pub role: Option<String>,
    pub transformers_version: Option<String>,
    pub pytorch_version: Option<String>,
    pub py_version: Option<String>,
    pub base_job_name: Option<String>,
    pub instance_type: Option<String>,
    pub instance_count: u32,
    pub hyperparameters: BTreeMap<String, Value>,
    pub environment: BTreeMap<String, String>,
    pub metric_definitions: Vec<MetricDefinition>,
    /// Channel name to data location.
    pub inputs: BTreeMap<String, String>,
    #[serde(flatten)]
    pub additional_args: BTreeMap<String, ConfigValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDefinition {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Regex")]
    pub regex: String,
}

/// Build the descriptor for `cfg`. `environment` is what the job's ranks
/// see, not the submitting process's environment.
pub fn job_descriptor(
    cfg: &ResolvedConfig,
    environment: BTreeMap<String, String>,
    fs: &dyn FileSystem,
) -> Result<JobDescriptor> {
    let script = Path::new(&cfg.target.training_script);
    if script.extension().and_then(|e| e.to_str()) != Some("py") {
        return Err(LaunchError::config(format!(
            "managed-cloud training requires a python file as entry point, got `{}`",
            cfg.target.training_script
        )));
    }
    let entry_point = script
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let source_dir = match script.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.display().to_string(),
        _ => ".".to_string(),
    };

    let cloud = &cfg.cloud;
    let inputs = match &cloud.sagemaker_inputs_file {
        Some(path) => read_tsv(fs, Path::new(path))?.into_iter().collect(),
        None => BTreeMap::new(),
    };
    let metric_definitions = match &cloud.sagemaker_metrics_file {
        Some(path) => read_tsv(fs, Path::new(path))?
            .into_iter()
            .map(|(name, regex)| MetricDefinition { name, regex })
            .collect(),
        None => Vec::new(),
    };

    Ok(JobDescriptor {
        entry_point,
        source_dir,
        role: cloud.iam_role_name.clone(),
        transformers_version: cloud.transformers_version.clone(),
        pytorch_version: cloud.pytorch_version.clone(),
        py_version: cloud.py_version.clone(),
        base_job_name: cloud.base_job_name.clone(),
        instance_type: cloud.ec2_instance_type.clone(),
        instance_count: cfg.num_machines,
        hyperparameters: hyperparameters(&cfg.target.script_args)?,
        environment,
        metric_definitions,
        inputs,
        additional_args: cloud.additional_args.clone(),
    })
}

/// Credentials and region for the submitting client.
///
/// Explicit access keys win over a named profile.
pub fn client_env(cfg: &ResolvedConfig) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    match (&cfg.aws.access_key_id, &cfg.aws.secret_access_key) {
        (Some(id), Some(secret)) => {
            env.insert("AWS_ACCESS_KEY_ID".to_string(), id.clone());
            env.insert("AWS_SECRET_ACCESS_KEY".to_string(), secret.clone());
        }
        _ => {
            if let Some(profile) = &cfg.cloud.profile {
                env.insert("AWS_PROFILE".to_string(), profile.clone());
            }
        }
    }
    if let Some(region) = &cfg.cloud.region {
        env.insert("AWS_DEFAULT_REGION".to_string(), region.clone());
    }
    env
}

/// Turn `--name value` / `--flag` script arguments into typed values.
pub fn hyperparameters(args: &[String]) -> Result<BTreeMap<String, Value>> {
    let mut params = BTreeMap::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let name = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-'));
        let Some(name) = name.filter(|n| is_flag(arg) && !n.is_empty()) else {
            return Err(LaunchError::config(format!(
                "managed-cloud script arguments must be passed as `--name value`, found `{arg}`"
            )));
        };
        if let Some((name, value)) = name.split_once('=') {
            params.insert(name.to_string(), typed(value));
            continue;
        }
        let value = match iter.next_if(|next| !is_flag(next)) {
            Some(next) => typed(next),
            None => Value::Bool(true),
        };
        params.insert(name.to_string(), value);
    }
    Ok(params)
}

/// `--name` or `-x`; negative numbers such as `-0.5` are values.
fn is_flag(arg: &str) -> bool {
    arg.starts_with("--")
        || arg
            .strip_prefix('-')
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| c.is_ascii_alphabetic())
}

fn typed(raw: &str) -> Value {
    match raw {
        "true" | "True" => return Value::Bool(true),
        "false" | "False" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(raw.to_string())
}

/// Two-column tab-separated file with a header row.
fn read_tsv(fs: &dyn FileSystem, path: &Path) -> Result<Vec<(String, String)>> {
    let text = fs.read_to_string(path).map_err(|e| {
        LaunchError::config(format!("cannot read {}: {e:#}", path.display()))
    })?;

    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let Some((left, right)) = line.split_once('\t') else {
            return Err(LaunchError::Parse {
                path: path.display().to_string(),
                message: format!("line {}: expected two tab-separated columns", idx + 1),
            });
        };
        rows.push((left.trim().to_string(), right.trim().to_string()));
    }
    Ok(rows)
}
