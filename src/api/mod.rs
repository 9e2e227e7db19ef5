//! RPC method handlers.
//!
//! Registers the full API surface on the dispatcher, grouped by namespace:
//! `ping`, `sysinfo.*`, `fs.*`, `shell.*`. Handlers take positional params
//! and run synchronously inside the core loop.

mod fsops;
mod shell;
mod sysinfo;

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use crate::rpc::Dispatcher;

/// Register every method and event topic.
pub fn register_all(dispatcher: &mut Dispatcher) {
    dispatcher.register("ping", |_state, _client, _params| Ok(json!("pong")));
    sysinfo::register(dispatcher);
    fsops::register(dispatcher);
    shell::register(dispatcher);
}

// ─── Positional parameter helpers ──────────────────────────────────────────

pub(crate) fn str_param<'a>(params: &'a [Value], idx: usize) -> Result<&'a str> {
    params
        .get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("params[{idx}]: expected string"))
}

pub(crate) fn u64_param(params: &[Value], idx: usize) -> Result<u64> {
    params
        .get(idx)
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("params[{idx}]: expected unsigned integer"))
}

pub(crate) fn u32_param(params: &[Value], idx: usize) -> Result<u32> {
    u32::try_from(u64_param(params, idx)?)
        .map_err(|_| anyhow!("params[{idx}]: value out of range"))
}

pub(crate) fn u16_param(params: &[Value], idx: usize) -> Result<u16> {
    u16::try_from(u64_param(params, idx)?)
        .map_err(|_| anyhow!("params[{idx}]: value out of range"))
}
