mod common;

use common::{resolve_err, resolved, FakeProbe, PersistedDefaultsBuilder, RawRequestBuilder};
use trainlaunch::backend::{select, BackendId};
use trainlaunch::config::model::ConfigValue;
use trainlaunch::errors::LaunchError;
use trainlaunch::gpu_ids::GpuIds;
use trainlaunch::resolve::resolve;
use trainlaunch::types::{DistributedMode, DistributedType, MixedPrecision};

#[test]
fn four_devices_without_flags_enable_multi_gpu() {
    common::init_tracing();
    let request = RawRequestBuilder::new().build();
    let probe = FakeProbe::new().with_cuda(4);

    let resolution = resolve(&request, None, &probe).unwrap();
    let cfg = &resolution.config;

    assert_eq!(cfg.mode, DistributedMode::MultiGpu);
    assert_eq!(cfg.num_processes, 4);
    assert_eq!(cfg.num_machines, 1);
    assert_eq!(cfg.mixed_precision, MixedPrecision::No);
    assert_eq!(cfg.gpu_ids, GpuIds::All);
    assert_eq!(select(cfg), BackendId::MultiProcess);

    let joined = resolution.warnings.join("\n");
    assert!(joined.contains("More than one GPU was found"));
    assert!(joined.contains("`--num_processes` was set to a value of `4`"));
    assert!(joined.contains("`--num_machines` was set to a value of `1`"));
}

#[test]
fn warnings_are_reported_as_one_message() {
    let request = RawRequestBuilder::new().build();
    let resolution = resolve(&request, None, &FakeProbe::new()).unwrap();

    let message = resolution.warning_message().expect("defaults were used");
    assert!(message.starts_with("The following values were not passed"));
    assert!(message.contains("--mixed_precision"));
    assert!(message.contains("--dynamo_backend"));
    assert_eq!(message.matches("To avoid this warning").count(), 1);
}

#[test]
fn fully_specified_request_produces_no_warnings() {
    let mut request = RawRequestBuilder::new()
        .num_processes(1)
        .num_machines(1)
        .mixed_precision(MixedPrecision::Fp16)
        .build();
    request.dynamo.dynamo_backend = Some(Default::default());

    let resolution = resolve(&request, None, &FakeProbe::new().with_cuda(1)).unwrap();
    assert!(resolution.warnings.is_empty());
    assert!(resolution.warning_message().is_none());
}

#[test]
fn single_process_request_keeps_single_device() {
    let request = RawRequestBuilder::new().num_processes(1).build();
    let cfg = resolved(&request, None, &FakeProbe::new().with_cuda(4));

    assert_eq!(cfg.mode, DistributedMode::SingleDevice);
    assert_eq!(select(&cfg), BackendId::Simple);
}

#[test]
fn pod_launch_with_no_python_fails_before_launch() {
    let request = RawRequestBuilder::new().tpu().no_python().build();
    let err = resolve_err(&request, None, &FakeProbe::new().with_tpu());

    match err {
        LaunchError::EntryPoint(msg) => assert!(msg.contains("--no_python")),
        other => panic!("expected EntryPoint error, got {other:?}"),
    }
}

#[test]
fn bf16_without_native_support_is_rejected() {
    let request = RawRequestBuilder::new()
        .mixed_precision(MixedPrecision::Bf16)
        .build();
    let err = resolve_err(&request, None, &FakeProbe::new().with_cuda(1));

    match err {
        LaunchError::Config(msg) => assert!(msg.contains("bf16")),
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn bf16_is_accepted_on_a_pod_device() {
    let request = RawRequestBuilder::new()
        .tpu()
        .mixed_precision(MixedPrecision::Bf16)
        .build();
    let cfg = resolved(&request, None, &FakeProbe::new().with_tpu());

    assert_eq!(cfg.mode, DistributedMode::AcceleratorPod);
    assert_eq!(cfg.mixed_precision, MixedPrecision::Bf16);
    assert_eq!(select(&cfg), BackendId::AcceleratorPod);
}

#[test]
fn bf16_on_cpu_uses_cpu_amp_capability() {
    let request = RawRequestBuilder::new()
        .cpu(true)
        .mixed_precision(MixedPrecision::Bf16)
        .build();

    let without = resolve_err(&request, None, &FakeProbe::new().with_bf16());
    assert!(matches!(without, LaunchError::Config(_)));

    let cfg = resolved(&request, None, &FakeProbe::new().with_cpu_amp());
    assert!(cfg.use_cpu);
    assert_eq!(select(&cfg), BackendId::Simple);
}

#[test]
fn managed_cloud_rejects_module_mode() {
    let persisted = PersistedDefaultsBuilder::new(DistributedType::No)
        .managed_cloud()
        .build();
    let request = RawRequestBuilder::new().module().build();

    let err = resolve_err(&request, Some(&persisted), &FakeProbe::new());
    match err {
        LaunchError::Config(msg) => assert!(msg.contains("managed-cloud")),
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn managed_cloud_selects_managed_backend() {
    let persisted = PersistedDefaultsBuilder::new(DistributedType::DataParallel)
        .managed_cloud()
        .num_machines(2)
        .build();
    let request = RawRequestBuilder::new().build();

    let cfg = resolved(&request, Some(&persisted), &FakeProbe::new());
    assert_eq!(cfg.num_cpu_threads_per_process, 1);
    assert_eq!(select(&cfg), BackendId::ManagedCloud);
}

#[test]
fn more_than_one_mode_flag_is_rejected() {
    let request = RawRequestBuilder::new().cpu(true).use_deepspeed().build();
    let err = resolve_err(&request, None, &FakeProbe::new());

    match err {
        LaunchError::Config(msg) => {
            assert!(msg.contains("--cpu"));
            assert!(msg.contains("--use_deepspeed"));
        }
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn explicit_false_mode_flags_do_not_conflict() {
    let request = RawRequestBuilder::new()
        .cpu(false)
        .multi_gpu(false)
        .use_fsdp()
        .num_processes(2)
        .build();
    let cfg = resolved(&request, None, &FakeProbe::new().with_cuda(2));

    assert_eq!(cfg.mode, DistributedMode::ModelSharding);
    assert_eq!(select(&cfg), BackendId::MultiProcess);
}

#[test]
fn multi_gpu_with_one_gpu_id_on_one_machine_is_rejected() {
    let request = RawRequestBuilder::new()
        .multi_gpu(true)
        .num_processes(2)
        .gpu_ids("0")
        .build();
    let err = resolve_err(&request, None, &FakeProbe::new().with_cuda(2));

    match err {
        LaunchError::Config(msg) => assert!(msg.contains("Less than two GPU ids")),
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn one_gpu_id_per_machine_is_fine_across_machines() {
    let request = RawRequestBuilder::new()
        .multi_gpu(true)
        .num_processes(2)
        .num_machines(2)
        .main_process_ip("10.0.0.1")
        .gpu_ids("0")
        .build();
    let cfg = resolved(&request, None, &FakeProbe::new().with_cuda(1));

    assert_eq!(cfg.gpu_ids, GpuIds::List(vec![0]));
    assert!(cfg.is_multi_node());
}

#[test]
fn persisted_single_gpu_id_is_rejected_for_multi_gpu() {
    let persisted = PersistedDefaultsBuilder::new(DistributedType::MultiGpu)
        .num_processes(2)
        .num_machines(1)
        .gpu_ids("3")
        .build();
    let request = RawRequestBuilder::new().build();

    let err = resolve_err(&request, Some(&persisted), &FakeProbe::new());
    assert!(matches!(err, LaunchError::Config(_)));
}

#[test]
fn machine_rank_must_be_below_machine_count() {
    let request = RawRequestBuilder::new()
        .num_processes(1)
        .num_machines(2)
        .machine_rank(2)
        .build();
    let err = resolve_err(&request, None, &FakeProbe::new());

    match err {
        LaunchError::Config(msg) => assert!(msg.contains("machine_rank")),
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn cpu_threads_are_split_across_local_ranks() {
    let request = RawRequestBuilder::new().cpu(true).num_processes(2).build();
    let probe = FakeProbe::new()
        .with_cores(16)
        .with_var("MPI_LOCALNRANKS", "4");

    let resolution = resolve(&request, None, &probe).unwrap();
    assert_eq!(resolution.config.num_cpu_threads_per_process, 4);
    assert!(resolution
        .warnings
        .iter()
        .any(|w| w.contains("--num_cpu_threads_per_process")));
}

#[test]
fn first_present_local_size_variable_wins() {
    let request = RawRequestBuilder::new().cpu(true).num_processes(2).build();
    let probe = FakeProbe::new()
        .with_cores(16)
        .with_var("OMPI_COMM_WORLD_LOCAL_SIZE", "2")
        .with_var("MV2_COMM_WORLD_LOCAL_SIZE", "8");

    let cfg = resolved(&request, None, &probe);
    assert_eq!(cfg.num_cpu_threads_per_process, 8);
}

#[test]
fn managed_cloud_keeps_one_cpu_thread() {
    let persisted = PersistedDefaultsBuilder::new(DistributedType::DataParallel)
        .managed_cloud()
        .build();
    let request = RawRequestBuilder::new().cpu(true).num_processes(2).build();
    let probe = FakeProbe::new()
        .with_cores(16)
        .with_var("MPI_LOCALNRANKS", "2");

    let resolution = resolve(&request, Some(&persisted), &probe).unwrap();
    assert_eq!(resolution.config.num_cpu_threads_per_process, 1);
    assert!(!resolution
        .warnings
        .iter()
        .any(|w| w.contains("--num_cpu_threads_per_process")));
}

#[test]
fn gpu_runs_use_one_cpu_thread() {
    let request = RawRequestBuilder::new().num_processes(1).build();
    let cfg = resolved(&request, None, &FakeProbe::new().with_cores(32).with_cuda(1));
    assert_eq!(cfg.num_cpu_threads_per_process, 1);
}

#[test]
fn persisted_mode_is_adopted_without_explicit_flags() {
    let persisted = PersistedDefaultsBuilder::new(DistributedType::Fsdp)
        .num_processes(8)
        .fsdp("offload_params", ConfigValue::Bool(true))
        .build();
    let request = RawRequestBuilder::new().build();

    let cfg = resolved(&request, Some(&persisted), &FakeProbe::new());
    assert_eq!(cfg.mode, DistributedMode::ModelSharding);
    assert_eq!(cfg.num_processes, 8);
    assert!(cfg.fsdp.offload_params);
}

#[test]
fn persisted_cpu_flag_falls_through_to_simple() {
    let persisted = PersistedDefaultsBuilder::new(DistributedType::MultiGpu)
        .num_processes(2)
        .num_machines(1)
        .use_cpu(true)
        .build();
    let request = RawRequestBuilder::new().build();

    let cfg = resolved(&request, Some(&persisted), &FakeProbe::new());
    assert_eq!(cfg.mode, DistributedMode::MultiGpu);
    assert!(cfg.use_cpu);
    assert_eq!(select(&cfg), BackendId::Simple);
}

#[test]
fn persisted_multi_gpu_needs_num_machines() {
    let persisted = PersistedDefaultsBuilder::new(DistributedType::MultiGpu)
        .num_processes(2)
        .build();
    let request = RawRequestBuilder::new().build();

    let err = resolve_err(&request, Some(&persisted), &FakeProbe::new());
    match err {
        LaunchError::Config(msg) => assert!(msg.contains("num_machines")),
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn persisted_mixed_precision_is_tracked_as_provenance() {
    let persisted = PersistedDefaultsBuilder::new(DistributedType::Deepspeed)
        .num_processes(2)
        .mixed_precision(MixedPrecision::Fp16)
        .deepspeed("zero_stage", ConfigValue::Int(3))
        .build();
    let request = RawRequestBuilder::new().build();

    let cfg = resolved(&request, Some(&persisted), &FakeProbe::new());
    assert_eq!(cfg.mode, DistributedMode::GradientSharding);
    assert_eq!(cfg.mixed_precision, MixedPrecision::Fp16);
    assert_eq!(cfg.deepspeed.zero_stage, 3);
    assert!(cfg.provenance.mixed_precision_from_config);
    assert_eq!(
        cfg.provenance.deepspeed_fields_from_config,
        vec!["zero_stage".to_string(), "mixed_precision".to_string()]
    );
}

#[test]
fn explicit_mixed_precision_beats_persisted() {
    let persisted = PersistedDefaultsBuilder::new(DistributedType::No)
        .num_processes(1)
        .mixed_precision(MixedPrecision::Bf16)
        .build();
    let request = RawRequestBuilder::new()
        .mixed_precision(MixedPrecision::Fp16)
        .build();

    let cfg = resolved(&request, Some(&persisted), &FakeProbe::new());
    assert_eq!(cfg.mixed_precision, MixedPrecision::Fp16);
    assert!(!cfg.provenance.mixed_precision_from_config);
}

#[test]
fn persisted_bf16_is_trusted_without_probe_support() {
    let persisted = PersistedDefaultsBuilder::new(DistributedType::No)
        .num_processes(1)
        .mixed_precision(MixedPrecision::Bf16)
        .build();
    let request = RawRequestBuilder::new().build();

    let cfg = resolved(&request, Some(&persisted), &FakeProbe::new());
    assert_eq!(cfg.mixed_precision, MixedPrecision::Bf16);
}

#[test]
fn no_tpu_cluster_overrides_persisted_cluster_mode() {
    let mut persisted = PersistedDefaultsBuilder::new(DistributedType::Tpu)
        .num_processes(8)
        .build();
    persisted.tpu_use_cluster = Some(true);
    persisted.tpu_name = Some("pod-a".to_string());

    let mut request = RawRequestBuilder::new().build();
    request.tpu_opts.no_tpu_cluster = true;

    let cfg = resolved(&request, Some(&persisted), &FakeProbe::new());
    assert_eq!(cfg.mode, DistributedMode::AcceleratorPod);
    assert!(!cfg.tpu_use_cluster);
    assert_eq!(select(&cfg), BackendId::AcceleratorPod);

    let request = RawRequestBuilder::new().build();
    let cfg = resolved(&request, Some(&persisted), &FakeProbe::new());
    assert!(cfg.tpu_use_cluster);
    assert_eq!(select(&cfg), BackendId::AcceleratorPodCluster);
}

#[test]
fn python_comes_from_flag_then_environment() {
    let probe = FakeProbe::new().with_var("TRAINLAUNCH_PYTHON", "/opt/py/bin/python");

    let cfg = resolved(&RawRequestBuilder::new().num_processes(1).build(), None, &probe);
    assert_eq!(cfg.target.python, "/opt/py/bin/python");

    let request = RawRequestBuilder::new().num_processes(1).python("python3.11").build();
    let cfg = resolved(&request, None, &probe);
    assert_eq!(cfg.target.python, "python3.11");

    let cfg = resolved(&RawRequestBuilder::new().num_processes(1).build(), None, &FakeProbe::new());
    assert_eq!(cfg.target.python, "python3");
}
