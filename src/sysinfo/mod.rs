//! Host system probes.
//!
//! Read-only samplers consumed by the `sysinfo.*` API methods and the
//! telemetry timer: CPU identity and jiffy counters, the `sysinfo(2)`
//! memory/load snapshot, statvfs disk space, and host account enumeration.

pub mod cpu;
pub mod disk;
pub mod mem;
pub mod users;
