//! Periodic telemetry sampling.
//!
//! The [`Telemetry`] struct is the stateful half of the telemetry timer:
//! it keeps the persistent CPU counter snapshot (so `sysinfo.cpustat`
//! serves the last sample between ticks) and the CPUID identity probed
//! once at startup. The core loop drives [`Telemetry::tick`] from its
//! interval and broadcasts the resulting sample as the three `sysinfo.*`
//! events, in order: cpustat, sysinfo, diskspace.

use std::path::Path;

use anyhow::Result;
use serde_json::{json, Value};

use crate::sysinfo::cpu::{self, CpuSampler};
use crate::sysinfo::{disk, mem};

/// One tick's worth of telemetry payloads.
#[derive(Debug)]
pub struct Sample {
    /// `sysinfo.cpustat` payload.
    pub cpustat: Value,
    /// `sysinfo.sysinfo` payload.
    pub sysinfo: Value,
    /// `sysinfo.diskspace` payload (`{path, info}`).
    pub diskspace: Value,
}

/// Telemetry sampler state.
#[derive(Debug)]
pub struct Telemetry {
    cpu: CpuSampler,
    cpuid: Value,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    /// Probe CPUID once and take the initial CPU counter snapshot.
    pub fn new() -> Self {
        Self {
            cpu: CpuSampler::new(),
            cpuid: cpu::cpu_identity().unwrap_or(Value::Null),
        }
    }

    /// Static CPU identity (`null` when unavailable).
    pub fn cpuid(&self) -> Value {
        self.cpuid.clone()
    }

    /// The most recent CPU counter snapshot.
    pub fn cpustat(&self) -> Value {
        self.cpu.to_json()
    }

    /// Sample everything for one telemetry tick.
    ///
    /// # Errors
    ///
    /// Fails when any probe fails; the caller logs and skips the tick.
    pub fn tick(&mut self, monitor_path: &Path) -> Result<Sample> {
        self.cpu.snapshot()?;
        Ok(Sample {
            cpustat: self.cpustat(),
            sysinfo: mem::sysinfo_json()?,
            diskspace: json!({
                "path": monitor_path,
                "info": disk::disk_space(monitor_path)?,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_produces_all_three_payloads() {
        let mut telemetry = Telemetry::new();
        let sample = telemetry.tick(Path::new("/")).unwrap();
        assert!(sample.cpustat["global"].is_object());
        assert!(sample.sysinfo["totalram"].is_u64());
        assert_eq!(sample.diskspace["path"], "/");
        assert!(sample.diskspace["info"]["capacity"].as_u64().unwrap() > 0);
    }

    #[test]
    fn tick_on_bad_monitor_path_fails_cleanly() {
        let mut telemetry = Telemetry::new();
        assert!(telemetry.tick(Path::new("/nonexistent/bedweb")).is_err());
    }

    #[test]
    fn cpustat_is_served_between_ticks() {
        let telemetry = Telemetry::new();
        // No tick yet: still serves the startup snapshot.
        assert!(telemetry.cpustat()["global"]["user"].is_u64());
    }
}
