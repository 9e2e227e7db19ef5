//! `shell.*` method handlers.
//!
//! Terminal lifecycle over RPC. `open` and `open_shell` implicitly link the
//! caller to the new terminal; `resize` and `close` are deliberately no-ops
//! for callers that are not linked, so one client can never disturb
//! another client's terminal.

use anyhow::anyhow;
use serde_json::{json, Value};

use crate::rpc::Dispatcher;

use super::{str_param, u16_param, u32_param};

/// Register the `shell.*` namespace.
pub fn register(dispatcher: &mut Dispatcher) {
    dispatcher.register("shell.open_shell", |state, client, _params| {
        let shell = std::env::var("SHELL")
            .map_err(|_| anyhow!("SHELL environment variable not set"))?;
        let id = state.terminals.open(&shell, &["-l".to_string()])?;
        state.mux.link(client, id);
        Ok(json!(id))
    });

    dispatcher.register("shell.open", |state, client, params| {
        let program = str_param(params, 0)?;
        let argv: Vec<String> = match params.get(1) {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| anyhow!("params[1]: expected array of strings"))?,
            None => Vec::new(),
        };
        let id = state.terminals.open(program, &argv)?;
        state.mux.link(client, id);
        Ok(json!(id))
    });

    dispatcher.register("shell.resize", |state, client, params| {
        let id = u32_param(params, 0)?;
        let rows = u16_param(params, 1)?;
        let cols = u16_param(params, 2)?;
        if state.mux.is_linked(client, id) {
            state.terminals.resize(id, rows, cols)?;
        }
        Ok(Value::Null)
    });

    dispatcher.register("shell.unlink", |state, client, params| {
        let id = u32_param(params, 0)?;
        state.mux.unlink(client, id);
        Ok(Value::Null)
    });

    dispatcher.register("shell.close", |state, client, params| {
        let id = u32_param(params, 0)?;
        if !state.mux.is_linked(client, id) {
            return Ok(Value::Null);
        }
        state.terminals.close(id)?;
        if let Some((target, frame)) = state.mux.terminal_closed(id) {
            state.send_binary(target, frame);
        }
        Ok(Value::Null)
    });
}
