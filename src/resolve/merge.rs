// src/resolve/merge.rs

//! Filling unset request fields from a persisted configuration.
//!
//! Top-level scalars are copied when the request left them unset. The nested
//! per-backend maps are merged key by key after translating each key to the
//! flag name it corresponds to.

use tracing::debug;

use crate::config::model::{ConfigValue, PersistedDefaults, SubConfig};
use crate::errors::{LaunchError, Result};
use crate::resolve::request::RawRequest;

/// A nested map in the persisted file and the prefix its keys must carry to
/// match a flag name.
struct SubConfigSpec {
    name: &'static str,
    prefix: Option<&'static str>,
}

const SUB_CONFIGS: [SubConfigSpec; 5] = [
    SubConfigSpec { name: "deepspeed_config", prefix: None },
    SubConfigSpec { name: "fsdp_config", prefix: Some("fsdp_") },
    SubConfigSpec { name: "megatron_lm_config", prefix: Some("megatron_lm_") },
    SubConfigSpec { name: "dynamo_config", prefix: Some("dynamo_") },
    SubConfigSpec { name: "ipex_config", prefix: None },
];

/// Flag name for a nested-map key: add the backend prefix when missing.
pub fn translate_key(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(p) if !key.starts_with(p) => format!("{p}{key}"),
        _ => key.to_string(),
    }
}

/// Flood every unset field of `raw` from a local-machine persisted config.
///
/// `compute_environment`, `mixed_precision` and `distributed_type` are not
/// touched here; the resolver has dedicated rules for them.
pub fn flood_from_persisted(raw: &mut RawRequest, persisted: &PersistedDefaults) -> Result<()> {
    flood_scalars(raw, persisted);

    for spec in SUB_CONFIGS.iter() {
        let map = sub_config(persisted, spec.name);
        merge_sub_config(raw, spec, map)?;
    }
    Ok(())
}

fn sub_config<'a>(persisted: &'a PersistedDefaults, name: &str) -> &'a SubConfig {
    match name {
        "deepspeed_config" => &persisted.deepspeed_config,
        "fsdp_config" => &persisted.fsdp_config,
        "megatron_lm_config" => &persisted.megatron_lm_config,
        "dynamo_config" => &persisted.dynamo_config,
        _ => &persisted.ipex_config,
    }
}

fn flood_scalars(raw: &mut RawRequest, p: &PersistedDefaults) {
    fn or_fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
        if slot.is_none() {
            slot.clone_from(value);
        }
    }

    or_fill(&mut raw.cpu, &p.use_cpu);
    or_fill(&mut raw.num_processes, &p.num_processes);
    or_fill(&mut raw.num_machines, &p.num_machines);
    or_fill(&mut raw.num_cpu_threads_per_process, &p.num_cpu_threads_per_process);

    let d = &mut raw.distributed;
    or_fill(&mut d.machine_rank, &p.machine_rank);
    or_fill(&mut d.main_process_ip, &p.main_process_ip);
    or_fill(&mut d.main_process_port, &p.main_process_port);
    or_fill(&mut d.rdzv_backend, &p.rdzv_backend);
    or_fill(&mut d.same_network, &p.same_network);

    let t = &mut raw.tpu_opts;
    or_fill(&mut t.main_training_function, &p.main_training_function);
    or_fill(&mut t.downcast_bf16, &p.downcast_bf16);
    or_fill(&mut t.tpu_use_sudo, &p.tpu_use_sudo);
    or_fill(&mut t.tpu_name, &p.tpu_name);
    or_fill(&mut t.tpu_zone, &p.tpu_zone);
}

fn merge_sub_config(raw: &mut RawRequest, spec: &SubConfigSpec, map: &SubConfig) -> Result<()> {
    for (key, value) in map.iter() {
        let Some(value) = value else {
            continue;
        };
        let flag = translate_key(spec.prefix, key);
        if !fill_from_key(raw, &flag, value)? {
            debug!(
                section = spec.name,
                key = %key,
                "ignoring unrecognized key in persisted config"
            );
        }
    }
    Ok(())
}

fn fill<T>(
    slot: &mut Option<T>,
    key: &str,
    value: &ConfigValue,
    convert: impl FnOnce(&ConfigValue) -> Option<T>,
) -> Result<()> {
    if slot.is_some() {
        return Ok(());
    }
    let converted = convert(value).ok_or_else(|| {
        LaunchError::config(format!("config file: invalid value `{value}` for `{key}`"))
    })?;
    *slot = Some(converted);
    Ok(())
}

fn text(v: &ConfigValue) -> Option<String> {
    Some(v.to_string())
}

fn parsed<T: std::str::FromStr>(v: &ConfigValue) -> Option<T> {
    v.to_string().parse().ok()
}

fn small<T: TryFrom<u64>>(v: &ConfigValue) -> Option<T> {
    v.as_u64().and_then(|n| T::try_from(n).ok())
}

/// Set the request field named `key` from `value` if it is still unset.
///
/// Returns `false` when `key` names no known field.
pub fn fill_from_key(raw: &mut RawRequest, key: &str, value: &ConfigValue) -> Result<bool> {
    let ds = &mut raw.deepspeed;
    let fsdp = &mut raw.fsdp;
    let mlm = &mut raw.megatron;
    let dyn_ = &mut raw.dynamo;

    match key {
        // gradient sharding
        "deepspeed_config_file" => fill(&mut ds.deepspeed_config_file, key, value, text)?,
        "zero_stage" => fill(&mut ds.zero_stage, key, value, small)?,
        "offload_optimizer_device" => fill(&mut ds.offload_optimizer_device, key, value, parsed)?,
        "offload_param_device" => fill(&mut ds.offload_param_device, key, value, parsed)?,
        "offload_optimizer_nvme_path" => fill(&mut ds.offload_optimizer_nvme_path, key, value, text)?,
        "offload_param_nvme_path" => fill(&mut ds.offload_param_nvme_path, key, value, text)?,
        "gradient_accumulation_steps" => fill(&mut ds.gradient_accumulation_steps, key, value, small)?,
        "gradient_clipping" => fill(&mut ds.gradient_clipping, key, value, ConfigValue::as_f64)?,
        "zero3_init_flag" => fill(&mut ds.zero3_init_flag, key, value, ConfigValue::as_bool)?,
        "zero3_save_16bit_model" => fill(&mut ds.zero3_save_16bit_model, key, value, ConfigValue::as_bool)?,
        "deepspeed_hostfile" => fill(&mut ds.deepspeed_hostfile, key, value, text)?,
        "deepspeed_exclusion_filter" => fill(&mut ds.deepspeed_exclusion_filter, key, value, text)?,
        "deepspeed_inclusion_filter" => fill(&mut ds.deepspeed_inclusion_filter, key, value, text)?,
        "deepspeed_multinode_launcher" => fill(&mut ds.deepspeed_multinode_launcher, key, value, parsed)?,

        // model sharding
        "fsdp_offload_params" => fill(&mut fsdp.fsdp_offload_params, key, value, ConfigValue::as_bool)?,
        "fsdp_min_num_params" => fill(&mut fsdp.fsdp_min_num_params, key, value, ConfigValue::as_u64)?,
        "fsdp_sharding_strategy" => fill(&mut fsdp.fsdp_sharding_strategy, key, value, small)?,
        "fsdp_auto_wrap_policy" => fill(&mut fsdp.fsdp_auto_wrap_policy, key, value, text)?,
        "fsdp_transformer_layer_cls_to_wrap" => {
            fill(&mut fsdp.fsdp_transformer_layer_cls_to_wrap, key, value, text)?
        }
        "fsdp_backward_prefetch_policy" => fill(&mut fsdp.fsdp_backward_prefetch_policy, key, value, text)?,
        "fsdp_state_dict_type" => fill(&mut fsdp.fsdp_state_dict_type, key, value, text)?,
        "fsdp_forward_prefetch" => fill(&mut fsdp.fsdp_forward_prefetch, key, value, ConfigValue::as_bool)?,
        "fsdp_use_orig_params" => fill(&mut fsdp.fsdp_use_orig_params, key, value, ConfigValue::as_bool)?,
        "fsdp_sync_module_states" => fill(&mut fsdp.fsdp_sync_module_states, key, value, ConfigValue::as_bool)?,

        // model parallel
        "megatron_lm_tp_degree" => fill(&mut mlm.megatron_lm_tp_degree, key, value, small)?,
        "megatron_lm_pp_degree" => fill(&mut mlm.megatron_lm_pp_degree, key, value, small)?,
        "megatron_lm_num_micro_batches" => fill(&mut mlm.megatron_lm_num_micro_batches, key, value, small)?,
        "megatron_lm_sequence_parallelism" => {
            fill(&mut mlm.megatron_lm_sequence_parallelism, key, value, ConfigValue::as_bool)?
        }
        "megatron_lm_recompute_activations" => {
            fill(&mut mlm.megatron_lm_recompute_activations, key, value, ConfigValue::as_bool)?
        }
        "megatron_lm_use_distributed_optimizer" => {
            fill(&mut mlm.megatron_lm_use_distributed_optimizer, key, value, ConfigValue::as_bool)?
        }
        "megatron_lm_gradient_clipping" => {
            fill(&mut mlm.megatron_lm_gradient_clipping, key, value, ConfigValue::as_f64)?
        }

        // graph compilation
        "dynamo_backend" => fill(&mut dyn_.dynamo_backend, key, value, parsed)?,
        "dynamo_mode" => fill(&mut dyn_.dynamo_mode, key, value, parsed)?,
        "dynamo_use_fullgraph" => fill(&mut dyn_.dynamo_use_fullgraph, key, value, ConfigValue::as_bool)?,
        "dynamo_use_dynamic" => fill(&mut dyn_.dynamo_use_dynamic, key, value, ConfigValue::as_bool)?,

        // device extension
        "ipex" => fill(&mut raw.ipex, key, value, ConfigValue::as_bool)?,
        "use_xpu" => fill(&mut raw.use_xpu, key, value, ConfigValue::as_bool)?,

        _ => return Ok(false),
    }
    Ok(true)
}
