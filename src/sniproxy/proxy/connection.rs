use std::net::SocketAddr;

use strum::Display;

use crate::sniproxy::common::{coarse_monotonic_now, Result};
use crate::sniproxy::proxy::buffer::Buffer;
use crate::sniproxy::server::{Listener, Transport};

/// The six legal (client-socket, server-socket) combinations a Connection can be in.
/// Deliberately a single tagged enum, not two independent booleans -- the state alone
/// gates which sockets are valid to touch, so there is no way to represent an illegal
/// combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnState {
    /// Allocated but accept not yet completed. Never observed in the table; transitions
    /// straight to Accepted inside `accept`.
    New,
    /// Client socket open, server socket not yet opened. Waiting on the parser.
    Accepted,
    /// Both legs open. Ordinary bidirectional relay.
    Connected,
    /// Backend closed or errored. Client socket still open, draining server->client bytes.
    ServerClosed,
    /// Client closed or errored. Server socket still open, draining client->server bytes.
    ClientClosed,
    /// Terminal. Eligible for removal from the table.
    Closed,
}

/// One socket and the bytes read from it that are awaiting delivery to its peer.
pub struct Endpoint {
    transport: Option<Transport>,
    addr: Option<SocketAddr>,
    pub buffer: Buffer,
}

impl Endpoint {
    fn new(buffer_capacity: usize) -> Self {
        Endpoint { transport: None, addr: None, buffer: Buffer::new(buffer_capacity) }
    }

    pub fn transport(&self) -> Option<&Transport> {
        self.transport.as_ref()
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Reads from this endpoint's socket into its own buffer. Split the transport/buffer
    /// field borrows so the call can take `&Transport` and `&mut Buffer` at once.
    pub fn recv(&mut self) -> Result<usize> {
        let Endpoint { transport, buffer, .. } = self;
        let t = transport.as_ref().expect("recv called with no open transport");
        buffer.recv(t)
    }
}

/// Per-tick read/write interest computed by the scheduler's register phase and consumed by
/// its dispatch phase. Plain booleans: the analogue of setting bits in a readiness-primitive
/// bitset, but scoped to one connection instead of a global fd range.
#[derive(Default, Clone, Copy)]
pub struct Interest {
    pub client_read: bool,
    pub client_write: bool,
    pub server_read: bool,
    pub server_write: bool,
}

/// One client<->backend pairing: two endpoints, a state, and the routing key once known.
pub struct Connection {
    pub state: ConnState,
    pub client: Endpoint,
    pub server: Endpoint,
    pub listener: &'static Listener,
    pub hostname: Option<String>,
    pub(crate) interest: Interest,
    /// Coarse monotonic timestamp of the last successful recv/send, i.e. the last time this
    /// connection would have moved to the head of the table. Read by the idle reaper, which
    /// walks from the tail and needs to know how long a connection has sat there untouched.
    pub(crate) last_active: u32,
}

impl Connection {
    pub fn accepted(listener: &'static Listener, client: Transport, client_addr: SocketAddr, buffer_capacity: usize) -> Self {
        let mut client_endpoint = Endpoint::new(buffer_capacity);
        client_endpoint.transport = Some(client);
        client_endpoint.addr = Some(client_addr);
        Connection {
            state: ConnState::Accepted,
            client: client_endpoint,
            server: Endpoint::new(buffer_capacity),
            listener,
            hostname: None,
            interest: Interest::default(),
            last_active: coarse_monotonic_now(),
        }
    }

    /// Stamps this connection as active right now. Called by the scheduler alongside
    /// `ConnectionTable::touch` on every successful recv/send, so the two ways of asking
    /// "how idle is this connection" (table position, and this timestamp) never disagree.
    pub(crate) fn mark_active(&mut self) {
        self.last_active = coarse_monotonic_now();
    }

    /// Seconds since this connection last had a successful recv/send, per the coarse clock.
    pub fn idle_seconds(&self) -> u32 {
        coarse_monotonic_now().saturating_sub(self.last_active)
    }

    /// ACCEPTED -> CONNECTED: a backend was dialed. The routing key and the backend
    /// endpoint are recorded together; both persist through any later half-close.
    pub fn mark_connected(&mut self, server: Transport, server_addr: SocketAddr, hostname: String) {
        self.server.transport = Some(server);
        self.server.addr = Some(server_addr);
        self.hostname = Some(hostname);
        self.state = ConnState::Connected;
    }

    /// Close the client side, following the matrix in the half-close design: ACCEPTED and
    /// SERVER_CLOSED both fold straight to CLOSED, CONNECTED steps down to CLIENT_CLOSED.
    /// No-op (besides dropping the transport, which is already gone) if the client side is
    /// already closed -- a double-close is a programmer error, not something this method
    /// panics over.
    pub fn close_client(&mut self) {
        self.client.transport = None;
        self.state = match self.state {
            ConnState::Accepted => ConnState::Closed,
            ConnState::Connected => ConnState::ClientClosed,
            ConnState::ServerClosed => ConnState::Closed,
            other => other,
        };
    }

    /// Close the server side: CONNECTED steps down to SERVER_CLOSED, CLIENT_CLOSED folds to
    /// CLOSED. No-op if there is no server side to close (ACCEPTED, or already closed).
    pub fn close_server(&mut self) {
        self.server.transport = None;
        self.state = match self.state {
            ConnState::Connected => ConnState::ServerClosed,
            ConnState::ClientClosed => ConnState::Closed,
            other => other,
        };
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    /// Reads from the client socket into `client.buffer` ("client read" in the scheduler's
    /// register/dispatch matrix).
    pub fn client_read(&mut self) -> Result<usize> {
        self.client.recv()
    }

    /// Reads from the server socket into `server.buffer` ("server read").
    pub fn server_read(&mut self) -> Result<usize> {
        self.server.recv()
    }

    /// Writes `server.buffer` (server->client bytes) out through the client socket
    /// ("client write" -- the direction refers to which socket is written to, not which
    /// buffer is drained).
    pub fn client_write(&mut self) -> Result<usize> {
        let Connection { client, server, .. } = self;
        let t = client.transport.as_ref().expect("client_write called with no open client transport");
        server.buffer.send(t)
    }

    /// Writes `client.buffer` (client->server bytes) out through the server socket
    /// ("server write").
    pub fn server_write(&mut self) -> Result<usize> {
        let Connection { client, server, .. } = self;
        let t = server.transport.as_ref().expect("server_write called with no open server transport");
        client.buffer.send(t)
    }

    pub fn peer_label(&self) -> String {
        let client = self.client.addr.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string());
        let server = self.server.addr.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string());
        format!("{} -> {}", client, server)
    }
}
