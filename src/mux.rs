//! Binary frame router.
//!
//! The mux owns the three association tables that tie clients, blobs, and
//! terminals together:
//!
//! - `cache`: per-client blob store, written by inbound blob frames and
//!   consumed by RPC handlers (`fs.pwrite`)
//! - `term_client` / `client_terms`: the bidirectional client↔terminal
//!   link; a terminal routes to at most one client at a time
//! - `orphans`: terminals that lost their client and keep running with
//!   their output dropped
//!
//! The mux never owns file descriptors — it decides where bytes go and
//! hands the decision back to the core loop, which owns the pool and the
//! client sinks.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, Result};

use crate::rpc::frame::{self, FrameTarget};
use crate::server::ClientId;
use crate::terminal::TerminalId;

/// Routing decision for one inbound binary frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Payload goes to a linked terminal.
    TerminalInput {
        /// Target terminal.
        id: TerminalId,
        /// Input bytes.
        data: Vec<u8>,
    },
    /// Payload was stored in the sender's blob cache.
    Cached,
    /// Frame was dropped (unlinked terminal or malformed header).
    Dropped,
}

/// Client/blob/terminal association tables.
#[derive(Debug, Default)]
pub struct BinaryMux {
    cache: HashMap<ClientId, HashMap<u32, Vec<u8>>>,
    term_client: HashMap<TerminalId, ClientId>,
    client_terms: HashMap<ClientId, HashSet<TerminalId>>,
    orphans: HashSet<TerminalId>,
}

impl BinaryMux {
    /// Create empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one inbound binary frame from `client`.
    ///
    /// Blob frames replace any prior cache entry for the same id. Terminal
    /// frames are forwarded only when the sender is the linked client;
    /// anything else is silently dropped, so a stale or malicious id can
    /// never reach someone else's terminal.
    pub fn accept_frame(&mut self, client: ClientId, mut data: Vec<u8>) -> Inbound {
        let Some((target, _)) = frame::decode(&data) else {
            log::warn!("[mux] client {client}: short binary frame dropped");
            return Inbound::Dropped;
        };
        let payload = data.split_off(4);
        match target {
            FrameTarget::Terminal(id) => {
                if self.term_client.get(&id) == Some(&client) {
                    Inbound::TerminalInput { id, data: payload }
                } else {
                    log::debug!("[mux] client {client}: input for unlinked terminal {id} dropped");
                    Inbound::Dropped
                }
            }
            FrameTarget::Blob(id) => {
                self.cache.entry(client).or_default().insert(id, payload);
                Inbound::Cached
            }
        }
    }

    /// Remove and return a cached blob.
    ///
    /// # Errors
    ///
    /// Fails when the caller has no blob under `id`.
    pub fn consume_blob(&mut self, client: ClientId, id: u32) -> Result<Vec<u8>> {
        self.cache
            .get_mut(&client)
            .and_then(|blobs| blobs.remove(&id))
            .ok_or_else(|| anyhow!("blob not found"))
    }

    /// Link `client` to `id`. An existing link is replaced: the previous
    /// client just stops receiving output for this terminal.
    pub fn link(&mut self, client: ClientId, id: TerminalId) {
        if let Some(previous) = self.term_client.insert(id, client) {
            if let Some(terms) = self.client_terms.get_mut(&previous) {
                terms.remove(&id);
            }
        }
        self.client_terms.entry(client).or_default().insert(id);
        self.orphans.remove(&id);
    }

    /// Remove the caller's link to `id`, leaving the terminal running as an
    /// orphan. No-op when `client` is not the linked client.
    pub fn unlink(&mut self, client: ClientId, id: TerminalId) {
        if self.term_client.get(&id) != Some(&client) {
            return;
        }
        self.term_client.remove(&id);
        if let Some(terms) = self.client_terms.get_mut(&client) {
            terms.remove(&id);
        }
        self.orphans.insert(id);
    }

    /// Whether `client` is the current link of terminal `id`.
    pub fn is_linked(&self, client: ClientId, id: TerminalId) -> bool {
        self.term_client.get(&id) == Some(&client)
    }

    /// Route terminal output: build the flagged wire frame for the linked
    /// client, or `None` for orphans (output dropped).
    pub fn route_output(&self, id: TerminalId, data: &[u8]) -> Option<(ClientId, Vec<u8>)> {
        let client = *self.term_client.get(&id)?;
        Some((client, frame::encode_terminal(id, data)))
    }

    /// Handle a terminal close: produce the zero-payload close frame for
    /// the linked client (if any) and clear every trace of the id.
    pub fn terminal_closed(&mut self, id: TerminalId) -> Option<(ClientId, Vec<u8>)> {
        self.orphans.remove(&id);
        let client = self.term_client.remove(&id)?;
        if let Some(terms) = self.client_terms.get_mut(&client) {
            terms.remove(&id);
        }
        Some((client, frame::encode_terminal_close(id)))
    }

    /// Handle a client disconnect: evict its blob cache and orphan every
    /// terminal it was linked to. The terminals keep running.
    pub fn client_removed(&mut self, client: ClientId) {
        self.cache.remove(&client);
        if let Some(terms) = self.client_terms.remove(&client) {
            for id in terms {
                self.term_client.remove(&id);
                self.orphans.insert(id);
            }
        }
    }

    /// Whether `id` is currently an orphan.
    pub fn is_orphan(&self, id: TerminalId) -> bool {
        self.orphans.contains(&id)
    }

    /// Number of blobs cached for `client`.
    pub fn blob_count(&self, client: ClientId) -> usize {
        self.cache.get(&client).map_or(0, HashMap::len)
    }
}
