//! RPC dispatch over the text half of the transport.
//!
//! The [`Dispatcher`] holds the method registry and the declared event
//! topics. Methods and topics are registered once at startup; inbound text
//! frames are parsed and routed to the matching handler inside the core
//! event loop, so handlers run strictly one at a time and may freely mutate
//! the server state they receive.
//!
//! Error mapping follows the wire contract:
//! - malformed JSON → logged, frame dropped
//! - unknown method / handler error → `{"id", "error": {"message"}}` when
//!   the request carried an id, otherwise logged and dropped
//! - emit to an undeclared topic → panic (programming error, not a client
//!   condition)

pub mod frame;
pub mod messages;

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde_json::Value;

use crate::server::state::ServerState;
use crate::server::ClientId;

/// A registered method handler.
///
/// Handlers receive the shared server state, the calling client, and the
/// positional parameters; they return the result value or an error that is
/// converted into a JSON error response.
pub type Method = Box<dyn Fn(&mut ServerState, ClientId, &[Value]) -> Result<Value> + Send>;

/// Method and event-topic registry.
pub struct Dispatcher {
    methods: HashMap<String, Method>,
    topics: HashSet<String>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("methods", &self.methods.len())
            .field("topics", &self.topics)
            .finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            topics: HashSet::new(),
        }
    }

    /// Register a named method. Re-registering a name replaces the handler.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&mut ServerState, ClientId, &[Value]) -> Result<Value> + Send + 'static,
    {
        self.methods.insert(name.to_string(), Box::new(handler));
    }

    /// Reserve an event topic for future [`emit`](Self::emit) calls.
    pub fn declare_event(&mut self, topic: &str) {
        self.topics.insert(topic.to_string());
    }

    /// Broadcast an event to every connected client.
    ///
    /// # Panics
    ///
    /// Panics when `topic` was never declared — emitting to an unknown
    /// topic is a bug in the server, not a recoverable condition.
    pub fn emit(&self, state: &ServerState, topic: &str, payload: Value) {
        assert!(
            self.topics.contains(topic),
            "emit to undeclared event topic {topic:?}"
        );
        let text = messages::event(topic, payload);
        for sink in state.clients.values() {
            sink.send_text(text.clone());
        }
    }

    /// Handle one inbound text frame from `client`.
    ///
    /// Parses the frame, invokes the handler, and sends the response (or
    /// error) back through the client's sink. Malformed frames and id-less
    /// failures are logged and dropped.
    pub fn handle_text(&self, state: &mut ServerState, client: ClientId, text: &str) {
        let request = match messages::Request::parse(text) {
            Ok(request) => request,
            Err(err) => {
                log::warn!("[rpc] client {client}: malformed frame dropped: {err}");
                return;
            }
        };

        let outcome = match self.methods.get(&request.method) {
            Some(handler) => handler(state, client, request.args()),
            None => Err(anyhow::anyhow!("unknown method {:?}", request.method)),
        };

        let Some(id) = request.id else {
            if let Err(err) = outcome {
                log::warn!(
                    "[rpc] client {client}: {} (no id, error dropped): {err:#}",
                    request.method
                );
            }
            return;
        };

        let reply = match outcome {
            Ok(result) => messages::response(&id, result),
            Err(err) => {
                log::debug!("[rpc] client {client}: {} failed: {err:#}", request.method);
                messages::error_response(&id, &format!("{err:#}"))
            }
        };
        if let Some(sink) = state.clients.get(&client) {
            sink.send_text(reply);
        }
    }
}
