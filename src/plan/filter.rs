// src/plan/filter.rs

//! Argument filtering.
//!
//! A backend's own parser rejects flags it does not know. Rather than
//! forwarding every resolved field, the builder renders all of them as named
//! fields and keeps only the names the backend accepts.

use crate::resolve::ResolvedConfig;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Rendered as a bare `--name` when true, omitted when false.
    Flag(bool),
    Text(String),
    /// Rendered as one `--name value` pair per entry.
    List(Vec<String>),
}

impl FieldValue {
    pub fn text(value: impl ToString) -> Self {
        FieldValue::Text(value.to_string())
    }
}

pub type Field = (String, FieldValue);

pub fn field(name: &str, value: FieldValue) -> Field {
    (name.to_string(), value)
}

/// Every resolved field under the flag name it was requested with.
pub fn resolved_fields(cfg: &ResolvedConfig) -> Vec<Field> {
    let t = &cfg.topology;
    let mut fields = vec![
        field("num_processes", FieldValue::text(cfg.num_processes)),
        field("num_machines", FieldValue::text(cfg.num_machines)),
        field("num_cpu_threads_per_process", FieldValue::text(cfg.num_cpu_threads_per_process)),
        field("mixed_precision", FieldValue::text(cfg.mixed_precision)),
        field("gpu_ids", FieldValue::text(&cfg.gpu_ids)),
        field("cpu", FieldValue::Flag(cfg.use_cpu)),
        field("use_xpu", FieldValue::Flag(cfg.use_xpu)),
        field("ipex", FieldValue::Flag(cfg.ipex)),
        field("debug", FieldValue::Flag(cfg.debug)),
        field("quiet", FieldValue::Flag(cfg.quiet)),
        field("module", FieldValue::Flag(cfg.target.module)),
        field("no_python", FieldValue::Flag(cfg.target.no_python)),
        field("machine_rank", FieldValue::text(t.machine_rank)),
        field("same_network", FieldValue::Flag(t.same_network)),
        field("tee", FieldValue::text(&t.tee)),
        field("role", FieldValue::text(&t.role)),
        field("rdzv_backend", FieldValue::text(t.rdzv_backend.as_str())),
        field("max_restarts", FieldValue::text(t.max_restarts)),
        field("monitor_interval", FieldValue::text(t.monitor_interval)),
        field("dynamo_backend", FieldValue::text(cfg.dynamo.backend.as_str())),
        field("dynamo_mode", FieldValue::text(cfg.dynamo.mode.as_str())),
        field("main_training_function", FieldValue::text(&cfg.tpu.main_training_function)),
        field("vm", FieldValue::List(cfg.tpu.vm.clone())),
        field("zero_stage", FieldValue::text(cfg.deepspeed.zero_stage)),
        field(
            "gradient_accumulation_steps",
            FieldValue::text(cfg.deepspeed.gradient_accumulation_steps),
        ),
    ];

    let optional = [
        ("main_process_ip", t.main_process_ip.clone()),
        ("main_process_port", t.main_process_port.map(|p| p.to_string())),
        ("tpu_name", cfg.tpu.name.clone()),
        ("tpu_zone", cfg.tpu.zone.clone()),
        ("docker_image", cfg.container.docker_image.clone()),
        ("docker_container", cfg.container.docker_container.clone()),
        ("docker_run_flag", cfg.container.docker_run_flag.clone()),
    ];
    fields.extend(
        optional
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| field(name, FieldValue::Text(v)))),
    );
    if !t.rdzv_conf.is_empty() {
        fields.push(field("rdzv_conf", FieldValue::text(&t.rdzv_conf)));
    }

    fields
}

/// Render `fields` as `--name value` arguments, keeping only names in
/// `accepted`.
///
/// Output follows the order of `accepted`. When a name occurs more than once
/// the last occurrence wins, so backend-computed fields can be appended after
/// [`resolved_fields`] to override them.
pub fn filter_args(fields: &[Field], accepted: &[&str]) -> Vec<String> {
    let mut argv = Vec::new();
    for name in accepted {
        let Some((_, value)) = fields.iter().rev().find(|(n, _)| n == name) else {
            continue;
        };
        match value {
            FieldValue::Flag(true) => argv.push(format!("--{name}")),
            FieldValue::Flag(false) => {}
            FieldValue::Text(text) => {
                argv.push(format!("--{name}"));
                argv.push(text.clone());
            }
            FieldValue::List(items) => {
                for item in items {
                    argv.push(format!("--{name}"));
                    argv.push(item.clone());
                }
            }
        }
    }
    argv
}

/// Flags in `argv` (tokens starting with `--`) that `accepted` does not know.
pub fn unknown_flags<'a>(argv: &'a [String], accepted: &[&str]) -> Vec<&'a str> {
    argv.iter()
        .filter_map(|arg| arg.strip_prefix("--"))
        .filter(|name| !accepted.contains(name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<Field> {
        vec![
            field("num_processes", FieldValue::text(4)),
            field("mixed_precision", FieldValue::text("fp16")),
            field("module", FieldValue::Flag(true)),
            field("no_python", FieldValue::Flag(false)),
            field("vm", FieldValue::List(vec!["a".into(), "b".into()])),
        ]
    }

    #[test]
    fn keeps_only_accepted_names_in_accepted_order() {
        let argv = filter_args(&fields(), &["vm", "module", "num_processes", "unknown"]);
        assert_eq!(
            argv,
            vec!["--vm", "a", "--vm", "b", "--module", "--num_processes", "4"]
        );
    }

    #[test]
    fn false_flags_are_omitted() {
        assert!(filter_args(&fields(), &["no_python"]).is_empty());
    }

    #[test]
    fn later_duplicates_override_earlier_ones() {
        let mut fields = fields();
        fields.push(field("num_processes", FieldValue::text(2)));
        assert_eq!(filter_args(&fields, &["num_processes"]), vec!["--num_processes", "2"]);
    }

    #[test]
    fn unknown_flags_ignores_values_and_short_options() {
        let argv: Vec<String> = ["-m", "--nnodes", "1", "--bogus", "x"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(unknown_flags(&argv, &["nnodes"]), vec!["bogus"]);
    }
}
