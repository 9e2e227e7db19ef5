//! Memory / load snapshot via `sysinfo(2)`.

use anyhow::{Context, Result};
use serde_json::{json, Value};

/// Sample uptime, load averages, memory, swap and process count.
///
/// Field names and units mirror the kernel struct; `mem_unit` is the byte
/// multiplier for the ram/swap fields.
///
/// # Errors
///
/// Fails when the syscall fails (not expected on Linux).
pub fn sysinfo_json() -> Result<Value> {
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::sysinfo(&mut info) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("sysinfo");
    }
    Ok(json!({
        "uptime": info.uptime,
        "loads": [info.loads[0], info.loads[1], info.loads[2]],
        "totalram": info.totalram,
        "freeram": info.freeram,
        "sharedram": info.sharedram,
        "bufferram": info.bufferram,
        "totalswap": info.totalswap,
        "freeswap": info.freeswap,
        "procs": info.procs,
        "totalhigh": info.totalhigh,
        "freehigh": info.freehigh,
        "mem_unit": info.mem_unit,
    }))
}
