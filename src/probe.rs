// src/probe.rs

//! Host environment auto-detection.
//!
//! The resolver never touches the host directly; it asks an [`EnvProbe`].
//! Production uses [`HostProbe`], which runs one short interpreter probe at
//! startup and reads CPU topology through `sysinfo`. Tests provide a fake.

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use sysinfo::System;
use tokio::process::Command;
use tracing::{debug, warn};

/// External backend integrations the launcher may hand off to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Integration {
    Deepspeed,
    TorchXla,
    Sagemaker,
}

impl Integration {
    pub fn name(self) -> &'static str {
        match self {
            Integration::Deepspeed => "DeepSpeed",
            Integration::TorchXla => "torch_xla",
            Integration::Sagemaker => "sagemaker",
        }
    }

    pub fn install_hint(self) -> &'static str {
        match self {
            Integration::Deepspeed => "run `pip3 install deepspeed` or build it from source",
            Integration::TorchXla => "install the XLA runtime with `pip3 install torch_xla`",
            Integration::Sagemaker => "install the managed-training client with `pip3 install sagemaker`",
        }
    }
}

impl fmt::Display for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accelerator counts, one per device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct DeviceCounts {
    #[serde(default)]
    pub xpu: u32,
    #[serde(default)]
    pub npu: u32,
    #[serde(default)]
    pub cuda: u32,
}

/// Capability flags gathered once per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct Capabilities {
    /// bf16 is natively supported on the default accelerator.
    #[serde(default)]
    pub bf16: bool,
    /// Runtime version supports native mixed precision on CPU/XPU.
    #[serde(default)]
    pub cpu_amp: bool,
    /// An accelerator pod device is attached.
    #[serde(default)]
    pub tpu: bool,
    #[serde(default)]
    pub integrations: BTreeSet<Integration>,
}

/// Source of host signals for configuration resolution.
pub trait EnvProbe {
    fn device_counts(&self) -> DeviceCounts;

    fn capabilities(&self) -> &Capabilities;

    /// Physical (not logical) core count, if known.
    fn physical_cores(&self) -> Option<usize>;

    /// Read an environment variable.
    fn var(&self, name: &str) -> Option<String>;

    fn has_integration(&self, integration: Integration) -> bool {
        self.capabilities().integrations.contains(&integration)
    }
}

/// Probe script printed as a single JSON line.
const PROBE_SCRIPT: &str = r#"
import json, importlib.util as u
r = {"counts": {"cuda": 0, "npu": 0, "xpu": 0},
     "caps": {"bf16": False, "cpu_amp": False, "tpu": False, "integrations": []}}
for name in ("deepspeed", "torch_xla", "sagemaker"):
    if u.find_spec(name) is not None:
        r["caps"]["integrations"].append(name)
try:
    import torch
    v = tuple(int(p) for p in torch.__version__.split("+")[0].split(".")[:2])
    r["caps"]["cpu_amp"] = v >= (1, 10)
    if torch.cuda.is_available():
        r["counts"]["cuda"] = torch.cuda.device_count()
        r["caps"]["bf16"] = bool(torch.cuda.is_bf16_supported())
    else:
        r["caps"]["bf16"] = v >= (1, 10)
    if hasattr(torch, "xpu") and torch.xpu.is_available():
        r["counts"]["xpu"] = torch.xpu.device_count()
    if u.find_spec("torch_npu") is not None:
        import torch_npu
        if torch.npu.is_available():
            r["counts"]["npu"] = torch.npu.device_count()
    if "torch_xla" in r["caps"]["integrations"]:
        import torch_xla.core.xla_model as xm
        r["caps"]["tpu"] = xm.xla_device() is not None
except Exception:
    pass
print(json.dumps(r))
"#;

#[derive(Debug, Deserialize)]
struct ProbeReport {
    counts: DeviceCounts,
    caps: Capabilities,
}

/// Probe backed by the real host.
#[derive(Debug, Clone, Default)]
pub struct HostProbe {
    counts: DeviceCounts,
    caps: Capabilities,
    physical_cores: Option<usize>,
}

impl HostProbe {
    /// Run the interpreter probe and read CPU topology.
    ///
    /// Never fails: a missing interpreter or unparsable output degrades to
    /// "nothing detected".
    pub async fn detect(python: &str) -> Self {
        let (counts, caps) = match run_probe(python).await {
            Ok(report) => (report.counts, report.caps),
            Err(err) => {
                warn!(python, error = %err, "host probe failed; assuming no accelerators");
                (DeviceCounts::default(), Capabilities::default())
            }
        };

        let physical_cores = System::new().physical_core_count();
        debug!(?counts, ?caps, ?physical_cores, "host probe complete");

        Self {
            counts,
            caps,
            physical_cores,
        }
    }
}

async fn run_probe(python: &str) -> anyhow::Result<ProbeReport> {
    let output = Command::new(python).arg("-c").arg(PROBE_SCRIPT).output().await?;
    if !output.status.success() {
        anyhow::bail!("probe exited with {}", output.status);
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().last().unwrap_or_default();
    Ok(serde_json::from_str(line)?)
}

impl EnvProbe for HostProbe {
    fn device_counts(&self) -> DeviceCounts {
        self.counts
    }

    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    fn physical_cores(&self) -> Option<usize> {
        self.physical_cores
    }

    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}
