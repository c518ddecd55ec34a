mod common;

use trainlaunch::backend::{select, BackendId};
use trainlaunch::cli::CliArgs;
use trainlaunch::errors::LaunchError;
use trainlaunch::fs::mock::MockFileSystem;
use trainlaunch::plan::{CommandEnvBuilder, PlanTarget, StdioPolicy};
use trainlaunch::types::{DistributedType, MixedPrecision, MultinodeLauncher};

use clap::Parser;
use common::{base_env, plan, resolved, try_plan, FakeProbe, PersistedDefaultsBuilder, RawRequestBuilder};

const AUX_PATH: &str = "/work/.deepspeed_env";

fn two_node_deepspeed(launcher: MultinodeLauncher) -> trainlaunch::resolve::ResolvedConfig {
    let request = RawRequestBuilder::new()
        .use_deepspeed()
        .num_processes(8)
        .num_machines(2)
        .main_process_ip("10.0.0.1")
        .multinode_launcher(launcher)
        .script_args(&["--epochs", "3"])
        .build();
    resolved(&request, None, &FakeProbe::new().with_cuda(4))
}

#[test]
fn standard_launcher_writes_no_aux_env_file() {
    let cfg = two_node_deepspeed(MultinodeLauncher::Standard);
    let fs = MockFileSystem::new();

    let plan = CommandEnvBuilder::new(&fs, base_env())
        .with_aux_env_path(AUX_PATH)
        .build(&cfg, select(&cfg))
        .unwrap();

    assert_eq!(plan.backend, BackendId::DeepGradientSharding);
    assert_eq!(plan.target, PlanTarget::DistributedRuntime);
    assert!(fs.contents(AUX_PATH).is_none());
    assert_eq!(&plan.argv[..2], &["--nnodes", "2"]);
}

#[test]
fn pdsh_launcher_appends_aux_env_file() {
    let cfg = two_node_deepspeed(MultinodeLauncher::Pdsh);
    let fs = MockFileSystem::new();
    fs.add_file(AUX_PATH, "EXISTING=1\n");

    let plan = CommandEnvBuilder::new(&fs, base_env())
        .with_aux_env_path(AUX_PATH)
        .build(&cfg, select(&cfg))
        .unwrap();

    let written = fs.contents(AUX_PATH).expect("aux env file written");
    assert!(written.starts_with("EXISTING=1\n"));
    assert!(written.contains("PATH=/usr/local/bin:/usr/bin\n"));
    assert!(written.contains("TRAINLAUNCH_USE_DEEPSPEED=true\n"));
    assert!(!written.contains("PROMPT_COMMAND"));

    assert_eq!(plan.target, PlanTarget::Process);
    assert_eq!(plan.argv[0], "deepspeed");
    let launcher = plan.argv.iter().position(|a| a == "--launcher").unwrap();
    assert_eq!(plan.argv[launcher + 1], "pdsh");
    assert!(plan.argv.ends_with(&["train.py".to_string(), "--epochs".to_string(), "3".to_string()]));
}

#[test]
fn single_node_deepspeed_uses_distributed_runtime() {
    let request = RawRequestBuilder::new().use_deepspeed().num_processes(2).build();
    let cfg = resolved(&request, None, &FakeProbe::new().with_cuda(2));
    let fs = MockFileSystem::new();

    let plan = CommandEnvBuilder::new(&fs, base_env())
        .with_aux_env_path(AUX_PATH)
        .build(&cfg, select(&cfg))
        .unwrap();

    assert_eq!(plan.target, PlanTarget::DistributedRuntime);
    assert!(fs.contents(AUX_PATH).is_none());
    assert_eq!(plan.env.get("TRAINLAUNCH_DEEPSPEED_ZERO_STAGE").map(String::as_str), Some("2"));
    assert_eq!(plan.env.get("TRAINLAUNCH_CONFIG_DS_FIELDS").map(String::as_str), Some(""));
}

#[test]
fn pod_cluster_rejects_every_container_field_at_once() {
    let request = RawRequestBuilder::new()
        .tpu_cluster("pod-a")
        .docker_image("gcr.io/trainer:latest")
        .docker_container("trainer")
        .build();
    let cfg = resolved(&request, None, &FakeProbe::new().with_tpu());
    assert_eq!(select(&cfg), BackendId::AcceleratorPodCluster);

    let err = try_plan(&cfg, &MockFileSystem::new(), base_env()).unwrap_err();
    match err {
        LaunchError::UnsupportedCombination(msg) => {
            assert!(msg.contains(r#"docker_image="gcr.io/trainer:latest""#));
            assert!(msg.contains(r#"docker_container="trainer""#));
            assert!(!msg.contains("docker_run_flag"));
        }
        other => panic!("expected UnsupportedCombination, got {other:?}"),
    }
}

#[test]
fn pod_cluster_command_reenters_the_launcher() {
    let request = RawRequestBuilder::new()
        .tpu_cluster("pod-a")
        .num_processes(8)
        .mixed_precision(MixedPrecision::Bf16)
        .script_args(&["--lr", "0.1"])
        .build();
    let cfg = resolved(&request, None, &FakeProbe::new().with_tpu());
    let plan = plan(&cfg, &MockFileSystem::new());

    let PlanTarget::PodCluster { runtime_args, remote_env } = &plan.target else {
        panic!("expected pod cluster target, got {:?}", plan.target);
    };
    assert_eq!(
        runtime_args,
        &vec!["--tpu".to_string(), "pod-a".to_string(), "--restart-tpuvm-pod-server".to_string()]
    );
    assert!(remote_env.contains(&"XLA_USE_BF16=1".to_string()));
    assert!(remote_env.contains(&"TRAINLAUNCH_IN_TPU_POD=1".to_string()));

    let reentry = CliArgs::try_parse_from(&plan.argv).expect("re-entrant command parses");
    assert_eq!(reentry.request.tpu, Some(true));
    assert!(reentry.request.tpu_opts.no_tpu_cluster);
    assert_eq!(reentry.request.num_processes, Some(8));
    assert_eq!(reentry.request.training_script, "train.py");
    assert_eq!(reentry.request.training_script_args, vec!["--lr", "0.1"]);
}

#[test]
fn pod_cluster_requires_a_pod_name() {
    let mut request = RawRequestBuilder::new().tpu_cluster("pod-a").build();
    request.tpu_opts.tpu_name = None;
    let cfg = resolved(&request, None, &FakeProbe::new().with_tpu());

    let err = try_plan(&cfg, &MockFileSystem::new(), base_env()).unwrap_err();
    assert!(matches!(err, LaunchError::Config(msg) if msg.contains("--tpu_name")));
}

#[test]
fn simple_plan_runs_the_script_with_the_interpreter() {
    let request = RawRequestBuilder::new()
        .num_processes(1)
        .gpu_ids("1")
        .script_args(&["--batch", "8"])
        .build();
    let cfg = resolved(&request, None, &FakeProbe::new().with_cuda(2));
    let plan = plan(&cfg, &MockFileSystem::new());

    assert_eq!(plan.backend, BackendId::Simple);
    assert_eq!(plan.argv, vec!["python3", "train.py", "--batch", "8"]);
    assert_eq!(plan.stdio, StdioPolicy::Inherit);
    assert_eq!(plan.env.get("CUDA_VISIBLE_DEVICES").map(String::as_str), Some("1"));
    assert_eq!(plan.env.get("TRAINLAUNCH_MIXED_PRECISION").map(String::as_str), Some("no"));
    assert_eq!(plan.env.get("HOME").map(String::as_str), Some("/home/trainer"));
    assert!(!plan.env.contains_key("MASTER_ADDR"));
}

#[test]
fn module_and_no_python_shape_the_simple_command() {
    let request = RawRequestBuilder::new().num_processes(1).module().script("pkg.train").build();
    let cfg = resolved(&request, None, &FakeProbe::new());
    assert_eq!(plan(&cfg, &MockFileSystem::new()).argv, vec!["python3", "-m", "pkg.train"]);

    let request = RawRequestBuilder::new().num_processes(1).no_python().script("./train.sh").build();
    let cfg = resolved(&request, None, &FakeProbe::new());
    assert_eq!(plan(&cfg, &MockFileSystem::new()).argv, vec!["./train.sh"]);
}

#[test]
fn multi_gpu_plan_filters_to_runtime_flags() {
    let request = RawRequestBuilder::new()
        .multi_gpu(true)
        .num_processes(4)
        .mixed_precision(MixedPrecision::Fp16)
        .build();
    let cfg = resolved(&request, None, &FakeProbe::new().with_cuda(4));
    let plan = plan(&cfg, &MockFileSystem::new());

    assert_eq!(plan.target, PlanTarget::DistributedRuntime);
    assert_eq!(
        &plan.argv[..6],
        &["--nnodes", "1", "--nproc_per_node", "4", "--node_rank", "0"]
    );
    assert!(!plan.argv.contains(&"--mixed_precision".to_string()));
    assert!(!plan.argv.contains(&"--num_processes".to_string()));
    assert_eq!(plan.env.get("TRAINLAUNCH_MIXED_PRECISION").map(String::as_str), Some("fp16"));
    assert_eq!(plan.argv.last().map(String::as_str), Some("train.py"));
}

#[test]
fn model_sharding_plan_carries_sharding_env() {
    let request = RawRequestBuilder::new().use_fsdp().num_processes(2).build();
    let cfg = resolved(&request, None, &FakeProbe::new().with_cuda(2));
    let plan = plan(&cfg, &MockFileSystem::new());

    assert_eq!(plan.env.get("TRAINLAUNCH_USE_FSDP").map(String::as_str), Some("true"));
    assert_eq!(
        plan.env.get("TRAINLAUNCH_FSDP_SHARDING_STRATEGY").map(String::as_str),
        Some("1")
    );
}

#[test]
fn managed_cloud_plan_builds_a_job_descriptor() {
    let mut persisted = PersistedDefaultsBuilder::new(DistributedType::DataParallel)
        .managed_cloud()
        .build();
    persisted.cloud.iam_role_name = Some("trainer-role".to_string());
    persisted.cloud.profile = Some("research".to_string());
    persisted.cloud.region = Some("eu-west-1".to_string());
    persisted.cloud.sagemaker_inputs_file = Some("/work/inputs.tsv".to_string());

    let request = RawRequestBuilder::new()
        .script("src/train.py")
        .script_args(&["--epochs", "3", "--fp16"])
        .build();
    let cfg = resolved(&request, Some(&persisted), &FakeProbe::new());

    let fs = MockFileSystem::new();
    fs.add_file("/work/inputs.tsv", "channel\turi\ntrain\ts3://data/train\n\n");
    let plan = plan(&cfg, &fs);

    assert_eq!(plan.stdio, StdioPolicy::Capture);
    assert_eq!(plan.env.get("AWS_PROFILE").map(String::as_str), Some("research"));
    assert_eq!(plan.env.get("AWS_DEFAULT_REGION").map(String::as_str), Some("eu-west-1"));

    let PlanTarget::ManagedJob { descriptor } = &plan.target else {
        panic!("expected managed job target, got {:?}", plan.target);
    };
    assert_eq!(descriptor.entry_point, "train.py");
    assert_eq!(descriptor.source_dir, "src");
    assert_eq!(descriptor.role.as_deref(), Some("trainer-role"));
    assert_eq!(descriptor.hyperparameters["epochs"], serde_json::json!(3));
    assert_eq!(descriptor.hyperparameters["fp16"], serde_json::json!(true));
    assert_eq!(descriptor.inputs.get("train").map(String::as_str), Some("s3://data/train"));
    assert_eq!(
        descriptor.environment.get("TRAINLAUNCH_USE_MANAGED_CLOUD").map(String::as_str),
        Some("true")
    );
}

#[test]
fn managed_cloud_requires_a_python_file() {
    let persisted = PersistedDefaultsBuilder::new(DistributedType::DataParallel)
        .managed_cloud()
        .build();
    let request = RawRequestBuilder::new().script("train.sh").build();
    let cfg = resolved(&request, Some(&persisted), &FakeProbe::new());

    let err = try_plan(&cfg, &MockFileSystem::new(), base_env()).unwrap_err();
    assert!(matches!(err, LaunchError::Config(msg) if msg.contains("python file")));
}
