use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::sniproxy::common::Result;
use crate::sniproxy::config::{ListenerConfig, COARSE_CLOCK_GRANULARITY_SECONDS};
use crate::sniproxy::proxy::{Connection, ConnectionTable, Scheduler};
use crate::sniproxy::reaper::{close_fully, IdleReaper};
use crate::sniproxy::server::{Listener, Transport};

/// Owns one `Listener`, its `ConnectionTable`, and the `Scheduler` that drives it: the
/// service shell described in the ambient stack, mirroring how the reference daemon wires
/// a listener to its connection table, generalized to an arbitrary routing table instead of
/// a single hardcoded backend cluster.
pub struct Service {
    listener: &'static Listener,
    table: ConnectionTable,
    scheduler: Scheduler,
    reaper: IdleReaper,
    buffer_capacity: usize,
}

impl Service {
    pub fn new(listener: &'static Listener, conf: &ListenerConfig) -> Self {
        Service {
            listener,
            table: ConnectionTable::new(conf.max_connections),
            scheduler: Scheduler::new(),
            reaper: IdleReaper::new(conf.idle_timeout_seconds),
            buffer_capacity: conf.buffer_capacity,
        }
    }

    /// The accept -> schedule loop. Runs until the listening socket is closed (normally
    /// only at process shutdown), interleaving three things on one task: accepting new
    /// connections, ticking the scheduler over every live connection, and periodically
    /// reaping idle ones. There is exactly one `&mut ConnectionTable` live at a time, so
    /// none of this needs locking.
    pub async fn run(&mut self) {
        info!(address = %self.listener.address.as_str(), "starting service");

        let mut idle_tick = tokio::time::interval(Duration::from_secs(COARSE_CLOCK_GRANULARITY_SECONDS));
        #[cfg(unix)]
        let mut dump_signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1())
            .expect("could not install SIGUSR1 handler");

        loop {
            tokio::select! {
                accepted = self.listener.accept(), if !self.table.is_full() => {
                    match accepted {
                        Some(sock) => self.accept(sock),
                        None => break,
                    }
                }
                _ = self.scheduler.tick(&mut self.table), if !self.table.is_empty() => {}
                _ = idle_tick.tick(), if self.reaper.enabled() && !self.table.is_empty() => {
                    self.reaper.reap(&mut self.table);
                }
                #[cfg(unix)]
                _ = dump_signal.recv() => {
                    self.log_dump();
                }
            }
        }

        self.shutdown();
    }

    fn log_dump(&self) {
        match self.dump() {
            Ok(path) => info!(path = %path.to_string_lossy(), "wrote connection table dump"),
            Err(e) => warn!(error = %e, "failed to write connection table dump"),
        }
    }

    /// §4.4 Accept: allocate a Connection in ACCEPTED and insert it at the head of the
    /// table. The `is_full` check in `run`'s select guard means this should never see a
    /// full table, but resource exhaustion is handled defensively anyway, per §7 -- the
    /// accept loop keeps serving everyone else instead of panicking.
    fn accept(&mut self, sock: TcpStream) {
        let addr = match sock.peer_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(error = %e, "accepted connection with no peer address, dropping");
                return;
            }
        };

        if self.table.is_full() {
            warn!(%addr, "refusing connection, connection table is full");
            drop(sock);
            return;
        }

        let conn = Connection::accepted(self.listener, Transport::new(sock), addr, self.buffer_capacity);
        self.table.insert(conn);
    }

    /// §5 `free_all` / Core API `shutdown()`: walks the table, tears every connection down
    /// through the ordinary close path (so a half-close drain never gets skipped just
    /// because the process is exiting), then drops it.
    fn shutdown(&mut self) {
        let mut idx = self.table.head_index();
        while let Some(i) = idx {
            idx = self.table.next_index(i);
            close_fully(self.table.get_mut(i));
            self.table.remove(i);
        }
    }

    /// Core API `dump()`: a read-only snapshot of every live connection written to a fresh
    /// temporary file, whose path is returned (and logged by the caller). Never mutates the
    /// table, so it's safe to call between scheduler ticks; `run` wires this to SIGUSR1 on
    /// the same task rather than a separate one, since nothing here needs `&mut self`.
    pub fn dump(&self) -> Result<PathBuf> {
        let path = std::env::temp_dir().join(format!(
            "sniproxy-dump-{}-{}.txt",
            std::process::id(),
            self.listener.address.replace(':', "_").replace('/', "_"),
        ));
        let mut file = std::fs::File::create(&path)?;

        writeln!(file, "listener {} ({} connections)", self.listener.address, self.table.len())?;
        let mut idx = self.table.head_index();
        while let Some(i) = idx {
            let conn = self.table.get(i);
            writeln!(
                file,
                "{:<14} client={:<24} server={:<24} client.buf={}/{} server.buf={}/{} hostname={}",
                conn.state.to_string(),
                conn.client.addr().map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()),
                conn.server.addr().map(|a| a.to_string()).unwrap_or_else(|| "-".to_string()),
                conn.client.buffer.len(),
                conn.client.buffer.capacity(),
                conn.server.buffer.len(),
                conn.server.buffer.capacity(),
                conn.hostname.as_deref().unwrap_or("-"),
            )?;
            idx = self.table.next_index(i);
        }

        Ok(path)
    }
}
