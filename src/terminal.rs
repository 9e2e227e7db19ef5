//! PTY terminal pool.
//!
//! Owns every PTY-backed child process: spawning, input, resizes, forced
//! close, and exit detection. Output and exit notifications flow into the
//! core event loop through a channel; the pool itself never touches routing
//! state.
//!
//! # Architecture
//!
//! ```text
//! open() ──► portable-pty openpty + spawn
//!            ├── reader thread: blocking read on the master,
//!            │                  PoolEvent::Output { id, data }
//!            └── waiter thread: child.wait(),
//!                               PoolEvent::Exited { pid }
//! ```
//!
//! Terminal ids are opaque monotonic 31-bit values minted by the pool; the
//! master PTY never leaks out of it. The registry is a two-index table —
//! `id → Terminal` for every client-facing operation plus `pid → id` for
//! the exit path — mutated only through `insert_terminal` / `take_terminal`
//! so the two maps cannot drift apart.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc::UnboundedSender;

use crate::rpc::frame::MAX_ID;

/// Default window size for new terminals: 80 columns by 25 rows.
const DEFAULT_WINSIZE: PtySize = PtySize {
    rows: 25,
    cols: 80,
    pixel_width: 0,
    pixel_height: 0,
};

/// Read buffer size for the per-terminal reader thread.
const READ_BUFFER_SIZE: usize = 16384;

/// Grace period between the hangup and the follow-up SIGKILL on close.
const KILL_GRACE: Duration = Duration::from_millis(200);

/// Opaque terminal identifier (31 bits; the wire adds the high flag bit).
pub type TerminalId = u32;

/// Notifications from the pool's reader/waiter threads to the core loop.
#[derive(Debug)]
pub enum PoolEvent {
    /// A terminal produced output.
    Output {
        /// Terminal that produced the data.
        id: TerminalId,
        /// Raw bytes read from the PTY master.
        data: Vec<u8>,
    },
    /// A child process exited (reported by pid; the pool resolves the id).
    Exited {
        /// Pid of the exited child.
        pid: u32,
    },
}

/// One live terminal: the master side of the PTY plus control handles.
struct Terminal {
    pid: u32,
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

impl Terminal {
    /// Terminate the child: hangup first, SIGKILL shortly after for
    /// children that ignore it. The grace sleep runs off-loop so forced
    /// close never stalls the dispatcher.
    fn shutdown(self) {
        // SIGHUP mirrors what the kernel delivers on PTY close; the child
        // gets a chance to exit cleanly before the hard kill lands.
        unsafe { libc::kill(self.pid as libc::pid_t, libc::SIGHUP) };
        let mut killer = self.killer;
        thread::spawn(move || {
            thread::sleep(KILL_GRACE);
            let _ = killer.kill();
        });
        // master + writer drop here, releasing our side of the PTY.
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal").field("pid", &self.pid).finish_non_exhaustive()
    }
}

/// Pool of PTY child processes.
pub struct TerminalPool {
    terminals: HashMap<TerminalId, Terminal>,
    by_pid: HashMap<u32, TerminalId>,
    next_id: TerminalId,
    events: UnboundedSender<PoolEvent>,
}

impl std::fmt::Debug for TerminalPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalPool")
            .field("terminals", &self.terminals.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl TerminalPool {
    /// Create an empty pool reporting into `events`.
    pub fn new(events: UnboundedSender<PoolEvent>) -> Self {
        Self {
            terminals: HashMap::new(),
            by_pid: HashMap::new(),
            next_id: 1,
            events,
        }
    }

    /// Number of live terminals.
    pub fn len(&self) -> usize {
        self.terminals.len()
    }

    /// Whether the pool has no live terminals.
    pub fn is_empty(&self) -> bool {
        self.terminals.is_empty()
    }

    /// Whether `id` names a live terminal.
    pub fn contains(&self, id: TerminalId) -> bool {
        self.terminals.contains_key(&id)
    }

    /// Resolve a pid to its terminal id, if the pool still tracks it.
    pub fn id_for_pid(&self, pid: u32) -> Option<TerminalId> {
        self.by_pid.get(&pid).copied()
    }

    fn alloc_id(&mut self) -> TerminalId {
        let id = self.next_id;
        self.next_id = if self.next_id >= MAX_ID { 1 } else { self.next_id + 1 };
        id
    }

    /// Spawn `program` with `argv` on a fresh PTY and register it.
    ///
    /// Returns the new terminal id. The reader and waiter threads start
    /// immediately; output may arrive before the caller links a client, in
    /// which case the mux drops it (orphan semantics).
    ///
    /// # Errors
    ///
    /// Returns an error when the PTY cannot be allocated or the child
    /// fails to spawn.
    pub fn open(&mut self, program: &str, argv: &[String]) -> Result<TerminalId> {
        let pty = native_pty_system();
        let pair = pty
            .openpty(DEFAULT_WINSIZE)
            .map_err(|e| anyhow!("openpty: {e}"))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(argv);
        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| anyhow!("spawn {program}: {e}"))?;
        // The slave side belongs to the child now.
        drop(pair.slave);

        let pid = child
            .process_id()
            .context("spawned child has no pid")?;
        let killer = child.clone_killer();
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| anyhow!("clone PTY reader: {e}"))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| anyhow!("take PTY writer: {e}"))?;

        let id = self.alloc_id();

        // Reader thread: blocking read loop on the master. EOF or a read
        // error means the child side hung up; the waiter thread reports the
        // actual exit, so the reader just stops.
        let output_tx = self.events.clone();
        thread::Builder::new()
            .name(format!("pty-read-{id}"))
            .spawn(move || {
                let mut buf = [0u8; READ_BUFFER_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let event = PoolEvent::Output { id, data: buf[..n].to_vec() };
                            if output_tx.send(event).is_err() {
                                break;
                            }
                        }
                    }
                }
            })
            .context("spawn PTY reader thread")?;

        // Waiter thread: reap the child and report the exit by pid.
        let exit_tx = self.events.clone();
        thread::Builder::new()
            .name(format!("pty-wait-{id}"))
            .spawn(move || {
                match child.wait() {
                    Ok(status) => log::debug!("[pty] {id} (pid {pid}) exited: {status}"),
                    Err(e) => log::warn!("[pty] {id} (pid {pid}) wait failed: {e}"),
                }
                let _ = exit_tx.send(PoolEvent::Exited { pid });
            })
            .context("spawn PTY waiter thread")?;

        self.insert_terminal(id, Terminal { pid, master: pair.master, writer, killer });
        log::info!("[pty] opened terminal {id} (pid {pid}): {program}");
        Ok(id)
    }

    /// Apply a new window size to a terminal.
    ///
    /// # Errors
    ///
    /// Fails when `id` is unknown or the resize ioctl fails.
    pub fn resize(&mut self, id: TerminalId, rows: u16, cols: u16) -> Result<()> {
        let term = self.terminals.get(&id).ok_or_else(|| anyhow!("id not found"))?;
        term.master
            .resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
            .map_err(|e| anyhow!("resize terminal {id}: {e}"))
    }

    /// Write input bytes to a terminal.
    ///
    /// # Errors
    ///
    /// Fails when `id` is unknown or the write fails.
    pub fn write(&mut self, id: TerminalId, data: &[u8]) -> Result<()> {
        let term = self.terminals.get_mut(&id).ok_or_else(|| anyhow!("id not found"))?;
        term.writer
            .write_all(data)
            .with_context(|| format!("write to terminal {id}"))
    }

    /// Forcibly close a terminal: remove it from the registry and terminate
    /// the child. The caller is responsible for emitting the synthetic
    /// close frame to the linked client.
    ///
    /// The waiter thread will still deliver a late `Exited` for this pid;
    /// [`reap`](Self::reap) ignores pids that are no longer tracked.
    ///
    /// # Errors
    ///
    /// Fails when `id` is unknown.
    pub fn close(&mut self, id: TerminalId) -> Result<()> {
        let term = self.take_terminal(id).ok_or_else(|| anyhow!("id not found"))?;
        log::info!("[pty] closing terminal {id} (pid {})", term.pid);
        term.shutdown();
        Ok(())
    }

    /// Handle a child-exit notification: drop the registry entry and return
    /// the terminal id it occupied. Returns `None` for pids that were
    /// already force-closed.
    pub fn reap(&mut self, pid: u32) -> Option<TerminalId> {
        let id = self.by_pid.get(&pid).copied()?;
        // Child is gone; just release our side of the PTY.
        drop(self.take_terminal(id));
        log::debug!("[pty] reaped terminal {id} (pid {pid})");
        Some(id)
    }

    /// Kill every remaining child. Called on server shutdown so no PTY
    /// process outlives the pool.
    pub fn shutdown(&mut self) {
        self.by_pid.clear();
        for (id, term) in self.terminals.drain() {
            log::info!("[pty] shutdown: killing terminal {id} (pid {})", term.pid);
            term.shutdown();
        }
    }

    // Single mutation path for the two-index registry.

    fn insert_terminal(&mut self, id: TerminalId, term: Terminal) {
        self.by_pid.insert(term.pid, id);
        self.terminals.insert(id, term);
    }

    fn take_terminal(&mut self, id: TerminalId) -> Option<Terminal> {
        let term = self.terminals.remove(&id)?;
        self.by_pid.remove(&term.pid);
        Some(term)
    }
}

impl Drop for TerminalPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn pool() -> (TerminalPool, mpsc::UnboundedReceiver<PoolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TerminalPool::new(tx), rx)
    }

    /// Wait for a matching event with a deadline, ignoring others.
    async fn expect_event<F, T>(rx: &mut mpsc::UnboundedReceiver<PoolEvent>, mut pick: F) -> T
    where
        F: FnMut(PoolEvent) -> Option<T>,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = rx.recv().await.expect("pool channel closed");
                if let Some(value) = pick(event) {
                    return value;
                }
            }
        })
        .await
        .expect("timed out waiting for pool event")
    }

    #[test]
    fn unknown_id_operations_fail() {
        let (mut pool, _rx) = pool();
        assert!(pool.write(1, b"x").is_err());
        assert!(pool.resize(1, 24, 80).is_err());
        assert!(pool.close(1).is_err());
        assert!(pool.reap(12345).is_none());
    }

    #[test]
    fn ids_are_monotonic_and_31_bit() {
        let (mut pool, _rx) = pool();
        assert_eq!(pool.alloc_id(), 1);
        assert_eq!(pool.alloc_id(), 2);
        pool.next_id = MAX_ID;
        assert_eq!(pool.alloc_id(), MAX_ID);
        // Wraps back into the valid range instead of touching the flag bit.
        assert_eq!(pool.alloc_id(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn echo_roundtrip_and_exit() {
        let (mut pool, mut rx) = pool();
        let id = pool.open("cat", &[]).expect("open cat on a PTY");
        assert!(pool.contains(id));

        pool.write(id, b"hello\n").unwrap();
        let data = expect_event(&mut rx, |ev| match ev {
            PoolEvent::Output { id: got, data } if got == id => Some(data),
            _ => None,
        })
        .await;
        // cat echoes through the PTY line discipline.
        assert!(!data.is_empty());

        let pid = *pool.by_pid.keys().next().unwrap();
        pool.close(id).unwrap();
        assert!(!pool.contains(id));

        // The waiter still reports the exit; reap ignores it.
        let reaped = expect_event(&mut rx, |ev| match ev {
            PoolEvent::Exited { pid: got } if got == pid => Some(pool.reap(got)),
            _ => None,
        })
        .await;
        assert!(reaped.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn self_exiting_child_is_reaped_by_pid() {
        let (mut pool, mut rx) = pool();
        let id = pool.open("true", &[]).expect("spawn /bin/true");

        let pid = expect_event(&mut rx, |ev| match ev {
            PoolEvent::Exited { pid } => Some(pid),
            _ => None,
        })
        .await;
        assert_eq!(pool.id_for_pid(pid), Some(id));
        assert_eq!(pool.reap(pid), Some(id));
        assert!(pool.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resize_applies_to_live_terminal() {
        let (mut pool, _rx) = pool();
        let id = pool.open("cat", &[]).unwrap();
        pool.resize(id, 40, 120).unwrap();
        pool.close(id).unwrap();
    }
}
