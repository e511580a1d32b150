use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::sniproxy::common::{Error, Result};
use crate::sniproxy::config::ListenerConfig;
use crate::sniproxy::route::{Parser, Resolver};
use crate::sniproxy::server::Listener;

/// A Resolver that always dials the same fixed backend address, ignoring the hostname.
/// Stands in for `StaticResolver` + DNS in tests that only care about the core's
/// peek-parse-dial and relay behavior, not route matching.
pub struct FixedResolver {
    pub backend: SocketAddr,
}

#[async_trait]
impl Resolver for FixedResolver {
    async fn lookup(&self, _hostname: &str) -> Result<TcpStream> {
        TcpStream::connect(self.backend).await.map_err(|e| Error::resolve_failed(e.to_string()))
    }
}

/// A Resolver that always fails, for exercising the backend-dial-failure path.
pub struct FailingResolver;

#[async_trait]
impl Resolver for FailingResolver {
    async fn lookup(&self, hostname: &str) -> Result<TcpStream> {
        Err(Error::resolve_failed(format!("no route to {}", hostname)))
    }
}

/// Binds a `Listener` on an ephemeral loopback port with the given parser/resolver, leaked
/// for `'static` the same way `run_servers` leaks its listeners for the lifetime of the
/// service task that owns them.
pub fn bind_listener(parser: &'static dyn Parser, resolver: &'static dyn Resolver) -> &'static Listener {
    let listener = Listener::new("127.0.0.1:0".to_string(), false, parser, resolver)
        .expect("failed to bind test listener");
    Box::leak(Box::new(listener))
}

pub fn test_listener_config() -> ListenerConfig {
    ListenerConfig {
        address: "127.0.0.1:0".to_string(),
        buffer_capacity: 4096,
        max_connections: 16,
        idle_timeout_seconds: 0,
    }
}
