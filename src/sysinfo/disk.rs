//! Disk-space probe via statvfs.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Value};

/// Capacity, free, and available bytes of the filesystem holding `path`.
///
/// `free` counts all unused blocks; `available` excludes the root reserve.
///
/// # Errors
///
/// Fails when `path` does not exist or statvfs fails.
pub fn disk_space(path: &Path) -> Result<Value> {
    let vfs = nix::sys::statvfs::statvfs(path)
        .with_context(|| format!("statvfs {}", path.display()))?;
    let frsize = vfs.fragment_size() as u64;
    Ok(json!({
        "capacity": vfs.blocks() as u64 * frsize,
        "free": vfs.blocks_free() as u64 * frsize,
        "available": vfs.blocks_available() as u64 * frsize,
    }))
}
