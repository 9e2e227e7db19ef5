//! `sysinfo.*` method handlers and event topics.
//!
//! The three telemetry topics are declared here next to their on-demand
//! counterparts; the periodic emits come from the core loop's timer.

use std::path::PathBuf;

use serde_json::Value;

use crate::rpc::Dispatcher;
use crate::sysinfo::{disk, mem, users};

/// Register the `sysinfo.*` namespace.
pub fn register(dispatcher: &mut Dispatcher) {
    dispatcher.declare_event("sysinfo.cpustat");
    dispatcher.register("sysinfo.cpuid", |state, _client, _params| Ok(state.telemetry.cpuid()));
    dispatcher.register("sysinfo.cpustat", |state, _client, _params| {
        Ok(state.telemetry.cpustat())
    });

    dispatcher.declare_event("sysinfo.sysinfo");
    dispatcher.register("sysinfo.sysinfo", |_state, _client, _params| mem::sysinfo_json());

    dispatcher.declare_event("sysinfo.diskspace");
    dispatcher.register("sysinfo.diskspace", |state, _client, params| {
        let path = match params.first().and_then(Value::as_str) {
            Some(path) => PathBuf::from(path),
            None => state.monitor_path.clone(),
        };
        disk::disk_space(&path)
    });

    dispatcher.register("sysinfo.users", |_state, _client, _params| Ok(users::users_json()));
    dispatcher.register("sysinfo.groups", |_state, _client, _params| Ok(users::groups_json()));
    dispatcher.register("sysinfo.current_user", |_state, _client, _params| {
        Ok(users::current_user_json())
    });
}
