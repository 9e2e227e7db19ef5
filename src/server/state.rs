//! Shared server state owned by the core event loop.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::mpsc::UnboundedSender;

use crate::mux::BinaryMux;
use crate::rpc::frame::MAX_ID;
use crate::telemetry::Telemetry;
use crate::terminal::{PoolEvent, TerminalPool};

use super::{ClientId, ClientSink};

/// Everything the RPC handlers and the core loop mutate.
///
/// The state lives on exactly one task and is only ever reached through
/// the core loop, so none of it needs locking — the single mutation site
/// is what upholds the routing and bookkeeping invariants.
pub struct ServerState {
    /// Connected clients and their outbound queues.
    pub clients: HashMap<ClientId, ClientSink>,
    /// Blob/terminal routing tables.
    pub mux: BinaryMux,
    /// PTY child registry.
    pub terminals: TerminalPool,
    /// Telemetry sampler state.
    pub telemetry: Telemetry,
    /// Default path for disk-space samples.
    pub monitor_path: PathBuf,
    next_blob_id: u32,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("clients", &self.clients.len())
            .field("terminals", &self.terminals.len())
            .finish_non_exhaustive()
    }
}

impl ServerState {
    /// Build the state for a fresh server.
    pub fn new(monitor_path: PathBuf, pool_events: UnboundedSender<PoolEvent>) -> Self {
        Self {
            clients: HashMap::new(),
            mux: BinaryMux::new(),
            terminals: TerminalPool::new(pool_events),
            telemetry: Telemetry::new(),
            monitor_path,
            next_blob_id: 1,
        }
    }

    /// Mint a server-side blob id for an `fs.pread` transfer.
    ///
    /// Ids are 31-bit and monotonic, so they can never collide with the
    /// terminal flag bit on the wire.
    pub fn alloc_blob_id(&mut self) -> u32 {
        let id = self.next_blob_id;
        self.next_blob_id = if self.next_blob_id >= MAX_ID { 1 } else { self.next_blob_id + 1 };
        id
    }

    /// Send a binary frame to a client, dropping it when the client is
    /// already gone.
    pub fn send_binary(&self, client: ClientId, frame: Vec<u8>) {
        if let Some(sink) = self.clients.get(&client) {
            sink.send_binary(frame);
        }
    }

    /// State with a detached pool channel, for handler/dispatcher tests.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        let (pool_tx, pool_rx) = tokio::sync::mpsc::unbounded_channel();
        // Tests poll state synchronously; pool events are not observed.
        std::mem::forget(pool_rx);
        Self::new(PathBuf::from("/"), pool_tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_ids_are_monotonic_31_bit() {
        let mut state = ServerState::for_tests();
        assert_eq!(state.alloc_blob_id(), 1);
        assert_eq!(state.alloc_blob_id(), 2);
        state.next_blob_id = MAX_ID;
        assert_eq!(state.alloc_blob_id(), MAX_ID);
        assert_eq!(state.alloc_blob_id(), 1);
    }
}
