#![allow(dead_code)]

use trainlaunch::config::model::{ConfigValue, PersistedDefaults};
use trainlaunch::gpu_ids::GpuIds;
use trainlaunch::resolve::RawRequest;
use trainlaunch::types::{ComputeEnvironment, DistributedType, MixedPrecision, MultinodeLauncher};

/// Builder for `RawRequest` to simplify test setup.
///
/// Starts from "nothing passed" with `train.py` as the script.
pub struct RawRequestBuilder {
    request: RawRequest,
}

impl RawRequestBuilder {
    pub fn new() -> Self {
        Self {
            request: RawRequest {
                training_script: "train.py".to_string(),
                ..RawRequest::default()
            },
        }
    }

    pub fn script(mut self, script: &str) -> Self {
        self.request.training_script = script.to_string();
        self
    }

    pub fn script_args(mut self, args: &[&str]) -> Self {
        self.request.training_script_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn cpu(mut self, value: bool) -> Self {
        self.request.cpu = Some(value);
        self
    }

    pub fn multi_gpu(mut self, value: bool) -> Self {
        self.request.multi_gpu = Some(value);
        self
    }

    pub fn tpu(mut self) -> Self {
        self.request.tpu = Some(true);
        self
    }

    pub fn tpu_cluster(mut self, tpu_name: &str) -> Self {
        self.request.tpu_opts.tpu_use_cluster = Some(true);
        self.request.tpu_opts.tpu_name = Some(tpu_name.to_string());
        self
    }

    pub fn use_deepspeed(mut self) -> Self {
        self.request.use_deepspeed = Some(true);
        self
    }

    pub fn use_fsdp(mut self) -> Self {
        self.request.use_fsdp = Some(true);
        self
    }

    pub fn use_megatron_lm(mut self) -> Self {
        self.request.use_megatron_lm = Some(true);
        self
    }

    pub fn use_xpu(mut self) -> Self {
        self.request.use_xpu = Some(true);
        self
    }

    pub fn num_processes(mut self, n: u32) -> Self {
        self.request.num_processes = Some(n);
        self
    }

    pub fn num_machines(mut self, n: u32) -> Self {
        self.request.num_machines = Some(n);
        self
    }

    pub fn machine_rank(mut self, rank: u32) -> Self {
        self.request.distributed.machine_rank = Some(rank);
        self
    }

    pub fn main_process_ip(mut self, ip: &str) -> Self {
        self.request.distributed.main_process_ip = Some(ip.to_string());
        self
    }

    pub fn mixed_precision(mut self, mp: MixedPrecision) -> Self {
        self.request.mixed_precision = Some(mp);
        self
    }

    pub fn gpu_ids(mut self, ids: &str) -> Self {
        self.request.distributed.gpu_ids = Some(ids.parse().expect("valid gpu ids"));
        self
    }

    pub fn multinode_launcher(mut self, launcher: MultinodeLauncher) -> Self {
        self.request.deepspeed.deepspeed_multinode_launcher = Some(launcher);
        self
    }

    pub fn docker_image(mut self, image: &str) -> Self {
        self.request.container.docker_image = Some(image.to_string());
        self
    }

    pub fn docker_container(mut self, name: &str) -> Self {
        self.request.container.docker_container = Some(name.to_string());
        self
    }

    pub fn module(mut self) -> Self {
        self.request.module = true;
        self
    }

    pub fn no_python(mut self) -> Self {
        self.request.no_python = true;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.request.quiet = true;
        self
    }

    pub fn debug(mut self) -> Self {
        self.request.debug = Some(true);
        self
    }

    pub fn python(mut self, python: &str) -> Self {
        self.request.python = Some(python.to_string());
        self
    }

    pub fn build(self) -> RawRequest {
        self.request
    }
}

impl Default for RawRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `PersistedDefaults`.
pub struct PersistedDefaultsBuilder {
    defaults: PersistedDefaults,
}

impl PersistedDefaultsBuilder {
    /// Local-machine config with the given distributed type.
    pub fn new(distributed_type: DistributedType) -> Self {
        Self {
            defaults: PersistedDefaults {
                compute_environment: ComputeEnvironment::LocalMachine,
                distributed_type,
                ..PersistedDefaults::default()
            },
        }
    }

    pub fn managed_cloud(mut self) -> Self {
        self.defaults.compute_environment = ComputeEnvironment::AmazonSagemaker;
        self
    }

    pub fn num_processes(mut self, n: u32) -> Self {
        self.defaults.num_processes = Some(n);
        self
    }

    pub fn num_machines(mut self, n: u32) -> Self {
        self.defaults.num_machines = Some(n);
        self
    }

    pub fn mixed_precision(mut self, mp: MixedPrecision) -> Self {
        self.defaults.mixed_precision = Some(mp);
        self
    }

    pub fn gpu_ids(mut self, ids: &str) -> Self {
        self.defaults.gpu_ids = Some(ids.parse::<GpuIds>().expect("valid gpu ids"));
        self
    }

    pub fn use_cpu(mut self, value: bool) -> Self {
        self.defaults.use_cpu = Some(value);
        self
    }

    pub fn main_process_ip(mut self, ip: &str) -> Self {
        self.defaults.main_process_ip = Some(ip.to_string());
        self
    }

    pub fn deepspeed(mut self, key: &str, value: ConfigValue) -> Self {
        self.defaults.deepspeed_config.insert(key.to_string(), Some(value));
        self
    }

    pub fn fsdp(mut self, key: &str, value: ConfigValue) -> Self {
        self.defaults.fsdp_config.insert(key.to_string(), Some(value));
        self
    }

    pub fn dynamo(mut self, key: &str, value: ConfigValue) -> Self {
        self.defaults.dynamo_config.insert(key.to_string(), Some(value));
        self
    }

    pub fn build(self) -> PersistedDefaults {
        self.defaults
    }
}
