use clap::Parser;
use trainlaunch::cli::{CliArgs, LogLevel};
use trainlaunch::gpu_ids::GpuIds;
use trainlaunch::types::{MixedPrecision, MultinodeLauncher};

fn parse(args: &[&str]) -> CliArgs {
    let mut argv = vec!["trainlaunch"];
    argv.extend_from_slice(args);
    CliArgs::try_parse_from(argv).expect("arguments should parse")
}

#[test]
fn switches_are_tri_state() {
    let args = parse(&["--cpu", "--multi_gpu=false", "train.py"]);
    assert_eq!(args.request.cpu, Some(true));
    assert_eq!(args.request.multi_gpu, Some(false));
    assert_eq!(args.request.tpu, None);
    assert_eq!(args.request.use_deepspeed, None);
}

#[test]
fn script_arguments_pass_through_untouched() {
    let args = parse(&["--num_processes", "2", "train.py", "--lr", "0.1", "--debug"]);
    assert_eq!(args.request.num_processes, Some(2));
    assert_eq!(args.request.training_script, "train.py");
    assert_eq!(args.request.training_script_args, vec!["--lr", "0.1", "--debug"]);
    assert_eq!(args.request.debug, None);
}

#[test]
fn typed_values_are_parsed() {
    let args = parse(&[
        "--mixed_precision",
        "bf16",
        "--gpu_ids",
        "0,2",
        "--deepspeed_multinode_launcher",
        "openmpi",
        "--vm",
        "worker-1",
        "--vm",
        "worker-2",
        "-m",
        "pkg.train",
    ]);
    let request = &args.request;
    assert_eq!(request.mixed_precision, Some(MixedPrecision::Bf16));
    assert_eq!(request.distributed.gpu_ids, Some(GpuIds::List(vec![0, 2])));
    assert_eq!(
        request.deepspeed.deepspeed_multinode_launcher,
        Some(MultinodeLauncher::Openmpi)
    );
    assert_eq!(request.tpu_opts.vm, vec!["worker-1", "worker-2"]);
    assert!(request.module);
    assert_eq!(request.training_script, "pkg.train");
}

#[test]
fn invalid_values_are_rejected() {
    assert!(CliArgs::try_parse_from(["trainlaunch", "--mixed_precision", "fp4", "train.py"]).is_err());
    assert!(CliArgs::try_parse_from(["trainlaunch", "--gpu_ids", "0,x", "train.py"]).is_err());
    assert!(CliArgs::try_parse_from(["trainlaunch", "--num_processes", "-1", "train.py"]).is_err());
}

#[test]
fn training_script_is_required() {
    assert!(CliArgs::try_parse_from(["trainlaunch", "--cpu"]).is_err());
}

#[test]
fn launcher_options_are_separate_from_the_request() {
    let args = parse(&["--log_level", "debug", "--dry_run", "train.py"]);
    assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    assert!(args.dry_run);
}
