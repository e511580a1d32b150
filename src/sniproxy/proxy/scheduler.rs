use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tracing::{debug, info, warn};

use crate::sniproxy::config::DEFAULT_PEEK_WINDOW;
use crate::sniproxy::proxy::connection::{ConnState, Connection, Interest};
use crate::sniproxy::proxy::table::ConnectionTable;
use crate::sniproxy::route::ParseOutcome;
use crate::sniproxy::server::Transport;

/// Drives every live connection in a `ConnectionTable` through one readiness tick:
/// Phase R (register interest) followed by Phase D (wait for readiness, then dispatch).
///
/// One `Scheduler` is owned by exactly one task/shard alongside its `ConnectionTable` (see
/// `sniproxy::service::Service`); there is no sharing and therefore no locking.
#[derive(Default)]
pub struct Scheduler;

impl Scheduler {
    pub fn new() -> Self {
        Scheduler
    }

    /// Runs a full tick: register, wait-and-dispatch, then sweep any connections that
    /// reached CLOSED (whether during this tick's dispatch or by a prior close that never
    /// got a chance to be swept because its sockets are gone and it registers no interest).
    pub async fn tick(&self, table: &mut ConnectionTable) {
        self.register(table);
        self.dispatch(table).await;
        self.reap_closed(table);
    }

    /// Phase R. Walks the table once and recomputes each connection's read/write interest
    /// from its state and buffer occupancy, per the register matrix.
    pub fn register(&self, table: &mut ConnectionTable) {
        let mut idx = table.head_index();
        while let Some(i) = idx {
            idx = table.next_index(i);
            let conn = table.get_mut(i);
            conn.interest = compute_interest(conn);
        }
    }

    /// Phase D. Waits until at least one registered interest is ready (collecting every
    /// other interest that also happens to already be ready in the same pass, the direct
    /// analogue of a single `epoll_wait` reporting several ready descriptors at once), then
    /// acts on each ready connection in the dispatch order from the spec: server side of a
    /// CONNECTED connection first, then its client side, then the half-close drains.
    pub async fn dispatch(&self, table: &mut ConnectionTable) {
        let ready = DispatchReady { table }.await;
        for (idx, interest) in ready {
            self.dispatch_one(table, idx, interest).await;
        }
    }

    async fn dispatch_one(&self, table: &mut ConnectionTable, idx: usize, ready: Interest) {
        let state = table.get(idx).state;
        match state {
            ConnState::Connected => {
                self.service_server_side(table, idx, ready);
                // Server-side errors close the server side but never stop the client side
                // from being serviced in the same tick.
                self.service_client_side(table, idx, ready);
            }
            ConnState::Accepted => {
                self.service_client_side(table, idx, ready);
                if table.get(idx).state == ConnState::Accepted {
                    self.maybe_connect(table, idx).await;
                }
            }
            ConnState::ServerClosed => self.drain_server_closed(table, idx, ready),
            ConnState::ClientClosed => self.drain_client_closed(table, idx, ready),
            ConnState::New | ConnState::Closed => {
                warn!(?state, "scheduler dispatched a connection in an unexpected state");
            }
        }
    }

    fn service_server_side(&self, table: &mut ConnectionTable, idx: usize, ready: Interest) {
        let conn = table.get_mut(idx);
        if ready.server_read && conn.server.buffer.room() > 0 {
            match conn.server_read() {
                Ok(0) => {
                    info!(peer = %conn.peer_label(), "backend closed connection");
                    conn.close_server();
                }
                Ok(_) => {
                    conn.mark_active();
                    table.touch(idx);
                }
                Err(e) if e.is_transient() => {}
                Err(e) => {
                    info!(peer = %conn.peer_label(), error = %e, "error reading from backend");
                    conn.close_server();
                }
            }
        }

        let conn = table.get_mut(idx);
        if conn.state == ConnState::Connected && ready.server_write && conn.client.buffer.len() > 0 {
            match conn.server_write() {
                Ok(n) if n > 0 => {
                    conn.mark_active();
                    table.touch(idx);
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => {}
                Err(e) => {
                    info!(peer = %conn.peer_label(), error = %e, "error writing to backend");
                    conn.close_server();
                }
            }
        }
    }

    fn service_client_side(&self, table: &mut ConnectionTable, idx: usize, ready: Interest) {
        let conn = table.get_mut(idx);
        if ready.client_read && conn.client.buffer.room() > 0 {
            match conn.client_read() {
                Ok(0) => {
                    info!(peer = %conn.peer_label(), "client closed connection");
                    conn.close_client();
                }
                Ok(_) => {
                    conn.mark_active();
                    table.touch(idx);
                }
                Err(e) if e.is_transient() => {}
                Err(e) => {
                    info!(peer = %conn.peer_label(), error = %e, "error reading from client");
                    conn.close_client();
                }
            }
        }

        let conn = table.get_mut(idx);
        let client_open = matches!(conn.state, ConnState::Accepted | ConnState::Connected);
        if client_open && ready.client_write && conn.server.buffer.len() > 0 {
            match conn.client_write() {
                Ok(n) if n > 0 => {
                    conn.mark_active();
                    table.touch(idx);
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => {}
                Err(e) => {
                    info!(peer = %conn.peer_label(), error = %e, "error writing to client");
                    conn.close_client();
                }
            }
        }
    }

    /// SERVER_CLOSED: drain server.buffer to the client; close the client once drained or
    /// on error, per the half-close drain-completeness law.
    fn drain_server_closed(&self, table: &mut ConnectionTable, idx: usize, ready: Interest) {
        let conn = table.get_mut(idx);
        if !ready.client_write {
            return;
        }
        let mut errored = false;
        if conn.server.buffer.len() > 0 {
            match conn.client_write() {
                Ok(n) if n > 0 => {
                    conn.mark_active();
                    table.touch(idx);
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => return,
                Err(e) => {
                    info!(peer = %conn.peer_label(), error = %e, "error draining to client");
                    errored = true;
                }
            }
        }
        let conn = table.get_mut(idx);
        if errored || conn.server.buffer.is_empty() {
            conn.close_client();
        }
    }

    /// CLIENT_CLOSED: symmetric to `drain_server_closed`.
    fn drain_client_closed(&self, table: &mut ConnectionTable, idx: usize, ready: Interest) {
        let conn = table.get_mut(idx);
        if !ready.server_write {
            return;
        }
        let mut errored = false;
        if conn.client.buffer.len() > 0 {
            match conn.server_write() {
                Ok(n) if n > 0 => {
                    conn.mark_active();
                    table.touch(idx);
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => return,
                Err(e) => {
                    info!(peer = %conn.peer_label(), error = %e, "error draining to backend");
                    errored = true;
                }
            }
        }
        let conn = table.get_mut(idx);
        if errored || conn.client.buffer.is_empty() {
            conn.close_server();
        }
    }

    /// The peek-parse-dial handoff (ACCEPTED -> CONNECTED). Triggered right after a
    /// successful client-side read while still ACCEPTED; never consumes the buffer, so
    /// whatever the parser inspects is replayed verbatim to the backend once connected.
    async fn maybe_connect(&self, table: &mut ConnectionTable, idx: usize) {
        let conn = table.get_mut(idx);
        let peeked = conn.client.buffer.peek_slice(DEFAULT_PEEK_WINDOW);
        let outcome = conn.listener.parser.parse(peeked);

        match outcome {
            ParseOutcome::NeedMore => {}
            ParseOutcome::NoHostname => {
                info!(peer = %conn.peer_label(), "parser found no hostname, closing connection");
                conn.close_client();
            }
            ParseOutcome::Malformed(why) => {
                info!(peer = %conn.peer_label(), reason = why, "malformed peek, closing connection");
                conn.close_client();
            }
            ParseOutcome::Hostname(hostname) => {
                let resolver = conn.listener.resolver;
                match resolver.lookup(&hostname).await {
                    Ok(stream) => {
                        let addr = match stream.peer_addr() {
                            Ok(a) => a,
                            Err(e) => {
                                warn!(%hostname, error = %e, "connected backend has no peer address");
                                table.get_mut(idx).close_client();
                                return;
                            }
                        };
                        let conn = table.get_mut(idx);
                        debug!(%hostname, %addr, "connected to backend");
                        conn.mark_connected(Transport::new(stream), addr, hostname);
                        conn.mark_active();
                        table.touch(idx);
                    }
                    Err(e) => {
                        info!(%hostname, error = %e, "backend dial failed, closing connection");
                        table.get_mut(idx).close_client();
                    }
                }
            }
        }
    }

    /// Sweeps every connection that reached CLOSED, in any prior step of this tick or a
    /// previous one. CLOSED connections register no interest (both sockets are gone) so
    /// they would never otherwise be revisited by the readiness wait; this full walk is
    /// what actually removes and frees them, tolerating in-place removal mid-walk.
    fn reap_closed(&self, table: &mut ConnectionTable) {
        let mut idx = table.head_index();
        while let Some(i) = idx {
            idx = table.next_index(i);
            if table.get(i).is_closed() {
                table.remove(i);
            }
        }
    }
}

/// Per-state entry of the register matrix (spec section 4.2 Phase R).
fn compute_interest(conn: &Connection) -> Interest {
    match conn.state {
        ConnState::New | ConnState::Closed => Interest::default(),
        ConnState::Accepted => Interest {
            client_read: conn.client.buffer.room() > 0,
            client_write: false,
            server_read: false,
            server_write: false,
        },
        ConnState::Connected => Interest {
            client_read: conn.client.buffer.room() > 0,
            client_write: conn.server.buffer.len() > 0,
            server_read: conn.server.buffer.room() > 0,
            server_write: conn.client.buffer.len() > 0,
        },
        // Always-writable so the scheduler revisits this connection even with nothing
        // queued, and can observe the buffer going empty to finish the half-close.
        ConnState::ServerClosed => Interest {
            client_read: false,
            client_write: true,
            server_read: false,
            server_write: false,
        },
        ConnState::ClientClosed => Interest {
            client_read: false,
            client_write: false,
            server_read: false,
            server_write: true,
        },
    }
}

/// A hand-rolled `Future` standing in for the readiness primitive of section 6: instead of
/// a `select`/`epoll_wait` over a set of raw handles, it polls every registered interest's
/// tokio reactor registration directly. A single poll pass visits every connection exactly
/// once; any interest found ready is recorded, and the future only resolves once that set
/// is non-empty, which is the direct analogue of a readiness call reporting several ready
/// descriptors from one wait.
struct DispatchReady<'a> {
    table: &'a ConnectionTable,
}

impl<'a> Future for DispatchReady<'a> {
    type Output = Vec<(usize, Interest)>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let table = self.table;
        let mut ready = Vec::new();
        let mut idx = table.head_index();
        while let Some(i) = idx {
            idx = table.next_index(i);
            let conn = table.get(i);
            let interest = conn.interest;
            let mut found = Interest::default();

            if interest.client_read {
                if let Some(t) = conn.client.transport() {
                    if poll_readable(t, cx) {
                        found.client_read = true;
                    }
                }
            }
            if interest.client_write {
                if let Some(t) = conn.client.transport() {
                    if poll_writable(t, cx) {
                        found.client_write = true;
                    }
                }
            }
            if interest.server_read {
                if let Some(t) = conn.server.transport() {
                    if poll_readable(t, cx) {
                        found.server_read = true;
                    }
                }
            }
            if interest.server_write {
                if let Some(t) = conn.server.transport() {
                    if poll_writable(t, cx) {
                        found.server_write = true;
                    }
                }
            }

            if found.client_read || found.client_write || found.server_read || found.server_write {
                ready.push((i, found));
            }
        }

        if ready.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(ready)
        }
    }
}

fn poll_readable(transport: &Transport, cx: &mut Context<'_>) -> bool {
    matches!(transport.inner().poll_read_ready(cx), Poll::Ready(Ok(())) | Poll::Ready(Err(_)))
}

fn poll_writable(transport: &Transport, cx: &mut Context<'_>) -> bool {
    matches!(transport.inner().poll_write_ready(cx), Poll::Ready(Ok(())) | Poll::Ready(Err(_)))
}
