//! WebSocket server: listener, connection tasks, and the core event loop.
//!
//! # Architecture
//!
//! ```text
//! accept loop ──► per-connection tasks (reader / writer pipes)
//!                     │ ServerEvent (text / binary / connect / disconnect)
//!                     ▼
//!                core event loop ──owns──► Dispatcher, BinaryMux,
//!                     ▲                    TerminalPool, clients
//!                     │ PoolEvent (output / exit)
//!                PTY reader & waiter threads
//! ```
//!
//! The core loop is the only place shared state is touched. Events from a
//! single client arrive in order, so request→response ordering and the
//! blob-upload-before-pwrite ordering both fall out of the queue.

pub mod client;
pub mod state;

#[cfg(test)]
mod integration_test;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;
use tokio_rustls::TlsAcceptor;

pub use client::{ClientId, ClientSink};
use state::ServerState;

use crate::api;
use crate::config::{Config, SslConfig};
use crate::mux::Inbound;
use crate::rpc::Dispatcher;
use crate::terminal::PoolEvent;

/// Events delivered to the core loop by connection tasks.
#[derive(Debug)]
pub enum ServerEvent {
    /// A client finished the WebSocket handshake.
    Connected {
        /// New client identity.
        id: ClientId,
        /// Outbound queue for the client.
        sink: ClientSink,
    },
    /// A client's transport closed.
    Disconnected {
        /// The departed client.
        id: ClientId,
    },
    /// Inbound text (RPC) frame.
    Text {
        /// Sending client.
        id: ClientId,
        /// Raw JSON text.
        text: String,
    },
    /// Inbound binary frame.
    Binary {
        /// Sending client.
        id: ClientId,
        /// Raw frame bytes (4-byte id prefix + payload).
        data: Vec<u8>,
    },
}

/// A bound but not yet running server.
pub struct Server {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    dispatcher: Dispatcher,
    state: ServerState,
    events_tx: UnboundedSender<ServerEvent>,
    events_rx: UnboundedReceiver<ServerEvent>,
    pool_rx: UnboundedReceiver<PoolEvent>,
    period: std::time::Duration,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("tls", &self.tls.is_some())
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Bind the listener and wire up the full API surface.
    ///
    /// # Errors
    ///
    /// Fails when the address cannot be bound or the TLS key material
    /// cannot be loaded.
    pub async fn bind(config: &Config) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .with_context(|| format!("bind {}", config.listen))?;
        let tls = match &config.ssl {
            Some(ssl) => Some(build_tls_acceptor(ssl)?),
            None => None,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (pool_tx, pool_rx) = mpsc::unbounded_channel();

        let mut dispatcher = Dispatcher::new();
        api::register_all(&mut dispatcher);
        let state = ServerState::new(config.monitor_path.clone(), pool_tx);

        Ok(Self {
            listener,
            tls,
            dispatcher,
            state,
            events_tx,
            events_rx,
            pool_rx,
            period: config.period(),
        })
    }

    /// The bound address (useful with a `:0` listen port).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("listener local_addr")
    }

    /// Run until SIGINT/SIGTERM. Kills every remaining PTY child on the
    /// way out so no process outlives the server.
    pub async fn run(self) -> Result<()> {
        let Self {
            listener,
            tls,
            dispatcher,
            mut state,
            events_tx,
            mut events_rx,
            mut pool_rx,
            period,
        } = self;

        log::info!(
            "[server] listening on {} ({})",
            listener.local_addr()?,
            if tls.is_some() { "wss" } else { "ws" },
        );
        let accept = tokio::spawn(accept_loop(listener, tls, events_tx));

        // First tick lands one full period after startup; a tick that runs
        // long coalesces instead of queueing a backlog.
        let mut telemetry =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        telemetry.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("install SIGTERM handler")?;
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                Some(event) = events_rx.recv() => handle_event(&dispatcher, &mut state, event),
                Some(event) = pool_rx.recv() => handle_pool_event(&mut state, event),
                _ = telemetry.tick() => telemetry_tick(&dispatcher, &mut state),
                _ = &mut ctrl_c => {
                    log::info!("[server] SIGINT, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    log::info!("[server] SIGTERM, shutting down");
                    break;
                }
            }
        }

        accept.abort();
        state.terminals.shutdown();
        Ok(())
    }
}

/// Apply one transport event to the server state.
fn handle_event(dispatcher: &Dispatcher, state: &mut ServerState, event: ServerEvent) {
    match event {
        ServerEvent::Connected { id, sink } => {
            log::info!("[server] client {id} connected");
            state.clients.insert(id, sink);
        }
        ServerEvent::Disconnected { id } => {
            log::info!("[server] client {id} disconnected");
            state.clients.remove(&id);
            state.mux.client_removed(id);
        }
        ServerEvent::Text { id, text } => dispatcher.handle_text(state, id, &text),
        ServerEvent::Binary { id, data } => match state.mux.accept_frame(id, data) {
            Inbound::TerminalInput { id: term, data } => {
                if let Err(err) = state.terminals.write(term, &data) {
                    log::warn!("[server] input for terminal {term} failed: {err:#}");
                }
            }
            Inbound::Cached | Inbound::Dropped => {}
        },
    }
}

/// Apply one terminal-pool event to the server state.
fn handle_pool_event(state: &mut ServerState, event: PoolEvent) {
    match event {
        PoolEvent::Output { id, data } => {
            if let Some((client, frame)) = state.mux.route_output(id, &data) {
                state.send_binary(client, frame);
            }
        }
        PoolEvent::Exited { pid } => {
            if let Some(id) = state.terminals.reap(pid) {
                if let Some((client, frame)) = state.mux.terminal_closed(id) {
                    state.send_binary(client, frame);
                }
            }
        }
    }
}

/// One telemetry tick: sample, then broadcast the three events in order.
fn telemetry_tick(dispatcher: &Dispatcher, state: &mut ServerState) {
    let monitor_path = state.monitor_path.clone();
    match state.telemetry.tick(&monitor_path) {
        Ok(sample) => {
            dispatcher.emit(state, "sysinfo.cpustat", sample.cpustat);
            dispatcher.emit(state, "sysinfo.sysinfo", sample.sysinfo);
            dispatcher.emit(state, "sysinfo.diskspace", sample.diskspace);
        }
        Err(err) => log::warn!("[telemetry] sampling failed, tick skipped: {err:#}"),
    }
}

/// Accept connections forever, spawning one task per client.
async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    events: UnboundedSender<ServerEvent>,
) {
    let mut next_client = 0u64;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                log::warn!("[server] accept failed: {err}");
                continue;
            }
        };
        next_client += 1;
        let id = ClientId(next_client);
        log::debug!("[server] client {id} connecting from {peer}");
        let events = events.clone();
        match tls.clone() {
            Some(acceptor) => {
                tokio::spawn(serve_tls(acceptor, stream, id, events));
            }
            None => {
                tokio::spawn(serve_plain(stream, id, events));
            }
        }
    }
}

async fn serve_plain(stream: TcpStream, id: ClientId, events: UnboundedSender<ServerEvent>) {
    match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => client::run_connection(ws, id, events).await,
        Err(err) => log::warn!("[server] client {id}: websocket handshake failed: {err}"),
    }
}

async fn serve_tls(
    acceptor: TlsAcceptor,
    stream: TcpStream,
    id: ClientId,
    events: UnboundedSender<ServerEvent>,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(accepted) => accepted,
        Err(err) => {
            log::warn!("[server] client {id}: TLS handshake failed: {err}");
            return;
        }
    };
    match tokio_tungstenite::accept_async(tls_stream).await {
        Ok(ws) => client::run_connection(ws, id, events).await,
        Err(err) => log::warn!("[server] client {id}: websocket handshake failed: {err}"),
    }
}

/// Load PEM key material and build the TLS acceptor.
fn build_tls_acceptor(ssl: &SslConfig) -> Result<TlsAcceptor> {
    let cert_file = std::fs::File::open(&ssl.cert)
        .with_context(|| format!("open certificate {}", ssl.cert.display()))?;
    let certs = rustls_pemfile::certs(&mut std::io::BufReader::new(cert_file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("parse certificate {}", ssl.cert.display()))?;

    let key_file = std::fs::File::open(&ssl.private_key)
        .with_context(|| format!("open private key {}", ssl.private_key.display()))?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
        .with_context(|| format!("parse private key {}", ssl.private_key.display()))?
        .ok_or_else(|| anyhow!("no private key in {}", ssl.private_key.display()))?;

    let tls_config = tokio_rustls::rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("build TLS config")?;
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
