use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::sniproxy::common::{Error, Result};
use crate::sniproxy::config::RouteConfig;
use crate::sniproxy::worker::Worker;

/// A Resolver turns a routing key extracted by a Parser into a connected, non-blocking
/// backend socket. This is the external collaborator named `lookup` in the core's
/// Listener interface; the core never retries a failed dial itself.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup(&self, hostname: &str) -> Result<TcpStream>;
}

/// Looks a hostname up in a static, configuration-provided table: exact match first, then
/// the longest matching `*.suffix` wildcard, then failure. Each matched route may name
/// several backend addresses (themselves possibly DNS names); one is chosen uniformly at
/// random among every address every backend resolves to, using the calling worker's RNG.
pub struct StaticResolver {
    routes: Vec<RouteConfig>,
}

impl StaticResolver {
    pub fn new(routes: Vec<RouteConfig>) -> Self {
        StaticResolver { routes }
    }

    fn match_route(&self, hostname: &str) -> Option<&RouteConfig> {
        if let Some(route) = self.routes.iter().find(|r| r.host == hostname) {
            return Some(route);
        }
        self.routes
            .iter()
            .filter(|r| r.host.starts_with("*."))
            .filter(|r| hostname.ends_with(&r.host[1..]))
            .max_by_key(|r| r.host.len())
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn lookup(&self, hostname: &str) -> Result<TcpStream> {
        let route = self
            .match_route(hostname)
            .ok_or_else(|| Error::resolve_failed(format!("no route for hostname {}", hostname)))?;

        let mut candidates = Vec::new();
        for backend in &route.backends {
            match tokio::net::lookup_host(backend).await {
                Ok(addrs) => candidates.extend(addrs),
                Err(e) => debug!(%backend, %e, "backend address did not resolve"),
            }
        }
        if candidates.is_empty() {
            return Err(Error::resolve_failed(format!("no backend address resolved for {}", hostname)));
        }

        let idx = match Worker::try_get() {
            Some(w) => w.uniform_rand32(candidates.len() as u32) as usize,
            None => 0,
        };
        let addr = candidates[idx];
        debug!(%hostname, %addr, "dialing backend");
        TcpStream::connect(addr).await.map_err(|e| Error::resolve_failed(e.to_string()))
    }
}
