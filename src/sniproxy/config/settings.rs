use std::mem::MaybeUninit;

use serde::Deserialize;

use crate::sniproxy::common::{Error, Result};

/// Backlog passed to listen(2).
pub const LISTEN_BACKLOG: u32 = 1024;
/// How often the coarse monotonic clock (and the idle reaper) update, in seconds.
pub const COARSE_CLOCK_GRANULARITY_SECONDS: u64 = 1;
/// Size of the peek window used for the peek-parse-dial handoff (one typical TCP segment).
pub const DEFAULT_PEEK_WINDOW: usize = 1460;

#[derive(Deserialize)]
pub struct Settings {
    /// number of tokio worker threads / shards. Each owns its own Scheduler and ConnectionTable.
    #[serde(default = "default_num_workers")]
    pub num_workers: u32,
    /// bind every listener with SO_REUSEPORT and one socket per worker, rather than a single
    /// shared listening socket. See server::Listener.
    #[serde(default)]
    pub reuseport: bool,
    /// the listen addresses this proxy serves
    pub listeners: Vec<ListenerConfig>,
    /// the static hostname -> backend routing table
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// One listen socket and the buffer/connection limits that apply to connections accepted on it.
#[derive(Deserialize, Clone)]
pub struct ListenerConfig {
    pub address: String,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// connections idle longer than this are closed by the idle reaper. 0 disables reaping.
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u32,
}

/// One entry in the static routing table: a hostname (exact, or `*.suffix` wildcard) mapped
/// to one or more backend addresses (host:port, possibly itself a DNS name).
#[derive(Deserialize, Clone)]
pub struct RouteConfig {
    pub host: String,
    pub backends: Vec<String>,
}

fn default_num_workers() -> u32 {
    num_cpus_fallback()
}

fn num_cpus_fallback() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

const fn default_buffer_capacity() -> usize { 16 * 1024 }
const fn default_max_connections() -> usize { 100_000 }
const fn default_idle_timeout_seconds() -> u32 { 20 * 60 }

static mut SETTINGS: MaybeUninit<Settings> = MaybeUninit::uninit();

pub(crate) unsafe fn settings_slot() -> &'static mut MaybeUninit<Settings> {
    &mut SETTINGS
}

impl Settings {
    pub(crate) fn finish_loading(&mut self) -> Result<()> {
        if self.listeners.is_empty() {
            return Err(Error::new("config must declare at least one listener"));
        }
        for listener in &self.listeners {
            if listener.buffer_capacity < 4096 {
                return Err(Error::new("buffer_capacity must be >= 4096"));
            }
        }
        Ok(())
    }
}
