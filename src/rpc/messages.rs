//! JSON wire envelope.
//!
//! Text frames carry one of three message shapes:
//!
//! - request:  `{"id": …, "method": "…", "params": […]}`
//! - response: `{"id": …, "result": …}` or `{"id": …, "error": {"message": "…"}}`
//! - event:    `{"method": "…", "params": …}` (no id)
//!
//! Method and topic names use dotted namespaces (`sysinfo.*`, `fs.*`,
//! `shell.*`).

use serde::Deserialize;
use serde_json::{json, Value};

/// An inbound RPC request.
///
/// `id` is echoed back verbatim in the response; requests without an id get
/// no reply (their errors are only logged). Absent `params` is treated as an
/// empty positional list.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Correlation id, echoed in the response. May be any JSON value.
    #[serde(default)]
    pub id: Option<Value>,
    /// Dotted method name.
    pub method: String,
    /// Positional parameters.
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// Parse a text frame into a request.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The positional parameter list, or an empty slice when `params` was
    /// absent or null.
    pub fn args(&self) -> &[Value] {
        self.params.as_array().map_or(&[], Vec::as_slice)
    }
}

/// Serialize a success response.
pub fn response(id: &Value, result: Value) -> String {
    json!({ "id": id, "result": result }).to_string()
}

/// Serialize an error response.
pub fn error_response(id: &Value, message: &str) -> String {
    json!({ "id": id, "error": { "message": message } }).to_string()
}

/// Serialize a server-initiated event.
pub fn event(topic: &str, payload: Value) -> String {
    json!({ "method": topic, "params": payload }).to_string()
}
