use std::collections::BTreeMap;

use trainlaunch::probe::{Capabilities, DeviceCounts, EnvProbe, Integration};

/// Probe with scripted host signals. Starts as a bare CPU host with no
/// integrations and no environment.
#[derive(Debug, Clone, Default)]
pub struct FakeProbe {
    counts: DeviceCounts,
    caps: Capabilities,
    cores: Option<usize>,
    vars: BTreeMap<String, String>,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cuda(mut self, n: u32) -> Self {
        self.counts.cuda = n;
        self
    }

    pub fn with_npu(mut self, n: u32) -> Self {
        self.counts.npu = n;
        self
    }

    pub fn with_xpu(mut self, n: u32) -> Self {
        self.counts.xpu = n;
        self
    }

    pub fn with_bf16(mut self) -> Self {
        self.caps.bf16 = true;
        self
    }

    pub fn with_cpu_amp(mut self) -> Self {
        self.caps.cpu_amp = true;
        self
    }

    pub fn with_tpu(mut self) -> Self {
        self.caps.tpu = true;
        self
    }

    pub fn with_integration(mut self, integration: Integration) -> Self {
        self.caps.integrations.insert(integration);
        self
    }

    pub fn with_cores(mut self, n: usize) -> Self {
        self.cores = Some(n);
        self
    }

    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }
}

impl EnvProbe for FakeProbe {
    fn device_counts(&self) -> DeviceCounts {
        self.counts
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn physical_cores(&self) -> Option<usize> {
        self.cores
    }

    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}
