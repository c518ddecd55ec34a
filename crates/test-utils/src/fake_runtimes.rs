use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use trainlaunch::errors::{LaunchError, Result};
use trainlaunch::plan::{JobDescriptor, StdioPolicy};
use trainlaunch::supervise::runtimes::SpawnError;
use trainlaunch::supervise::{
    BoxFuture, DistributedRuntime, EntryPoint, EntryPointResolver, ManagedTrainingClient,
    PodClusterExecutor, PodJob, PodRuntime, ProcessRunner, Runtimes,
};

/// Everything the fakes were asked to do, in call order per runtime.
#[derive(Debug, Default)]
pub struct Recorded {
    pub process: Vec<(Vec<String>, BTreeMap<String, String>, StdioPolicy)>,
    pub distributed: Vec<Vec<String>>,
    /// Value of the watched variable seen inside each distributed run.
    pub observed_env: Vec<Option<String>>,
    pub pod: Vec<PodJob>,
    pub pod_cluster: Vec<(Vec<String>, Vec<String>, Vec<String>)>,
    pub managed: Vec<(JobDescriptor, BTreeMap<String, String>)>,
}

/// Configurable set of recording runtimes.
///
/// ```ignore
/// let fakes = FakeRuntimes::new().with_exit_code(3);
/// let supervisor = Supervisor::new(fakes.runtimes());
/// ```
#[derive(Debug, Clone)]
pub struct FakeRuntimes {
    recorded: Arc<Mutex<Recorded>>,
    exit_code: i32,
    missing_program: Option<String>,
    fail_distributed: bool,
    watch_var: Option<String>,
    fail_entry_point: bool,
    model_data: String,
}

impl FakeRuntimes {
    pub fn new() -> Self {
        Self {
            recorded: Arc::new(Mutex::new(Recorded::default())),
            exit_code: 0,
            missing_program: None,
            fail_distributed: false,
            watch_var: None,
            fail_entry_point: false,
            model_data: "s3://bucket/job/output/model.tar.gz".to_string(),
        }
    }

    /// Exit code the fake child process reports.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Every spawning runtime fails as if `program` was not on PATH.
    pub fn with_missing_program(mut self, program: &str) -> Self {
        self.missing_program = Some(program.to_string());
        self
    }

    /// The distributed runtime fails with a two-level error chain.
    pub fn failing_distributed(mut self) -> Self {
        self.fail_distributed = true;
        self
    }

    /// Record the value of `name` while the distributed runtime runs.
    pub fn watch_var(mut self, name: &str) -> Self {
        self.watch_var = Some(name.to_string());
        self
    }

    /// The entry-point resolver reports a missing training function.
    pub fn failing_entry_point(mut self) -> Self {
        self.fail_entry_point = true;
        self
    }

    pub fn recorded(&self) -> Arc<Mutex<Recorded>> {
        Arc::clone(&self.recorded)
    }

    /// Box up a fresh set of runtimes sharing this fake's recording.
    pub fn runtimes(&self) -> Runtimes {
        Runtimes {
            process: Box::new(self.clone()),
            distributed: Box::new(self.clone()),
            pod: Box::new(self.clone()),
            pod_cluster: Box::new(self.clone()),
            managed: Box::new(self.clone()),
            entry_points: Box::new(self.clone()),
        }
    }

    fn spawn_failure(&self) -> Option<anyhow::Error> {
        self.missing_program.as_ref().map(|program| {
            anyhow::Error::new(SpawnError {
                program: program.clone(),
                source: io::Error::from(io::ErrorKind::NotFound),
            })
        })
    }
}

impl Default for FakeRuntimes {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner for FakeRuntimes {
    fn run<'a>(
        &'a self,
        argv: &'a [String],
        env: &'a BTreeMap<String, String>,
        stdio: StdioPolicy,
    ) -> BoxFuture<'a, anyhow::Result<i32>> {
        Box::pin(async move {
            if let Some(err) = self.spawn_failure() {
                return Err(err);
            }
            self.recorded
                .lock()
                .unwrap()
                .process
                .push((argv.to_vec(), env.clone(), stdio));
            Ok(self.exit_code)
        })
    }
}

impl DistributedRuntime for FakeRuntimes {
    fn run<'a>(&'a self, args: &'a [String]) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if let Some(err) = self.spawn_failure() {
                return Err(err);
            }
            {
                let mut recorded = self.recorded.lock().unwrap();
                recorded.distributed.push(args.to_vec());
                if let Some(name) = &self.watch_var {
                    recorded.observed_env.push(std::env::var(name).ok());
                }
            }
            if self.fail_distributed {
                return Err(anyhow!("rendezvous timed out").context("worker group failed"));
            }
            Ok(())
        })
    }
}

impl PodRuntime for FakeRuntimes {
    fn spawn<'a>(&'a self, job: PodJob) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.recorded.lock().unwrap().pod.push(job);
            Ok(())
        })
    }
}

impl PodClusterExecutor for FakeRuntimes {
    fn execute<'a>(
        &'a self,
        runtime_args: &'a [String],
        remote_env: &'a [String],
        command: &'a [String],
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.recorded.lock().unwrap().pod_cluster.push((
                runtime_args.to_vec(),
                remote_env.to_vec(),
                command.to_vec(),
            ));
            Ok(())
        })
    }
}

impl ManagedTrainingClient for FakeRuntimes {
    fn submit<'a>(
        &'a self,
        descriptor: &'a JobDescriptor,
        env: &'a BTreeMap<String, String>,
    ) -> BoxFuture<'a, anyhow::Result<String>> {
        Box::pin(async move {
            self.recorded
                .lock()
                .unwrap()
                .managed
                .push((descriptor.clone(), env.clone()));
            Ok(self.model_data.clone())
        })
    }
}

impl EntryPointResolver for FakeRuntimes {
    fn resolve(&self, script: &str, _module: bool, function: &str) -> Result<EntryPoint> {
        if self.fail_entry_point {
            return Err(LaunchError::EntryPoint(format!(
                "Your training script should have a function named {function}, or you should pass a different value to `--main_training_function`."
            )));
        }
        let module = script.trim_end_matches(".py").replace('/', ".");
        Ok(EntryPoint {
            module,
            search_path: None,
            function: function.to_string(),
        })
    }
}
