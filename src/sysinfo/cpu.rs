//! CPU probes: static CPUID identity and `/proc/stat` jiffy counters.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::{json, Value};

/// One row of `/proc/stat` jiffy counters.
///
/// Field names (including `systm`) are the wire contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CpuTimes {
    /// Time spent in user mode.
    pub user: u64,
    /// Time spent in user mode with low priority (nice).
    pub nice: u64,
    /// Time spent in system mode.
    pub systm: u64,
    /// Time spent in the idle task.
    pub idle: u64,
    /// Time waiting for I/O to complete.
    pub iowait: u64,
    /// Time servicing interrupts.
    pub irq: u64,
    /// Time servicing softirqs.
    pub softirq: u64,
    /// Time stolen by the hypervisor.
    pub steal: u64,
    /// Time running guest virtual CPUs.
    pub guest: u64,
    /// Time running niced guests.
    pub guest_nice: u64,
}

/// Snapshot holder for the aggregate and per-core counters.
///
/// The counters are sampled on the telemetry tick; on-demand
/// `sysinfo.cpustat` calls serve the most recent snapshot without
/// re-reading `/proc/stat`.
#[derive(Debug, Default)]
pub struct CpuSampler {
    global: CpuTimes,
    per_core: Vec<CpuTimes>,
}

impl CpuSampler {
    /// Create a sampler with an initial snapshot taken. A failed initial
    /// read leaves zeroed counters and is logged, matching the probe's
    /// log-and-continue contract.
    pub fn new() -> Self {
        let mut sampler = Self::default();
        if let Err(err) = sampler.snapshot() {
            log::warn!("[sysinfo] initial /proc/stat snapshot failed: {err:#}");
        }
        sampler
    }

    /// Re-read `/proc/stat` and replace the stored counters.
    ///
    /// # Errors
    ///
    /// Fails when `/proc/stat` is unreadable or has no cpu lines.
    pub fn snapshot(&mut self) -> Result<()> {
        let content = std::fs::read_to_string("/proc/stat")?;
        let (global, per_core) = parse_proc_stat(&content)?;
        self.global = global;
        self.per_core = per_core;
        Ok(())
    }

    /// The `sysinfo.cpustat` payload: aggregate, per-core, sample time.
    pub fn to_json(&self) -> Value {
        json!({
            "global": self.global,
            "separated": self.per_core,
            "time": unix_time_secs(),
        })
    }
}

fn unix_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Parse the `cpu` lines of a `/proc/stat` dump into the aggregate row and
/// the per-core rows. Missing trailing fields (older kernels) read as zero.
pub fn parse_proc_stat(content: &str) -> Result<(CpuTimes, Vec<CpuTimes>)> {
    let mut global = None;
    let mut per_core = Vec::new();

    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(key) = fields.next() else { continue };
        if !key.starts_with("cpu") {
            // cpu lines come first; anything else ends the block.
            break;
        }
        let mut next = || fields.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        let row = CpuTimes {
            user: next(),
            nice: next(),
            systm: next(),
            idle: next(),
            iowait: next(),
            irq: next(),
            softirq: next(),
            steal: next(),
            guest: next(),
            guest_nice: next(),
        };
        if key == "cpu" {
            global = Some(row);
        } else {
            per_core.push(row);
        }
    }

    let global = global.ok_or_else(|| anyhow!("no aggregate cpu line in /proc/stat"))?;
    Ok((global, per_core))
}

/// Static CPU identification via CPUID, or `None` when unavailable.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn cpu_identity() -> Option<Value> {
    use raw_cpuid::CpuId;

    let cpuid = CpuId::new();
    let vendor = cpuid.get_vendor_info()?;
    let brand = cpuid
        .get_processor_brand_string()
        .map(|b| b.as_str().trim().to_string());
    let feature = cpuid.get_feature_info();
    let caches: Vec<Value> = cpuid
        .get_cache_parameters()
        .map(|params| {
            params
                .map(|c| {
                    let size = c.associativity()
                        * c.physical_line_partitions()
                        * c.coherency_line_size()
                        * c.sets();
                    json!({
                        "level": c.level(),
                        "type": format!("{:?}", c.cache_type()),
                        "size": size,
                        "line_size": c.coherency_line_size(),
                        "associativity": c.associativity(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(json!({
        "vendor": vendor.as_str(),
        "brand": brand,
        "family": feature.as_ref().map(raw_cpuid::FeatureInfo::family_id),
        "model": feature.as_ref().map(raw_cpuid::FeatureInfo::model_id),
        "stepping": feature.as_ref().map(raw_cpuid::FeatureInfo::stepping_id),
        "logical_cores": std::thread::available_parallelism().map(std::num::NonZeroUsize::get).ok(),
        "caches": caches,
    }))
}

/// Static CPU identification is x86-only; other targets report null,
/// matching the original probe's behavior when CPUID is absent.
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub fn cpu_identity() -> Option<Value> {
    None
}
