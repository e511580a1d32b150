pub mod sniproxy;
#[cfg(test)]
mod tests;

pub use crate::sniproxy::*;

use std::io;

use tokio::runtime::{Builder, Runtime};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::sniproxy::common::{coarse_monotonic_clock_updater, Result};
use crate::sniproxy::config::{load_config, Settings};
use crate::sniproxy::route::{Resolver, SniffParser, StaticResolver};
use crate::sniproxy::server::Listener;
use crate::sniproxy::worker::{init_workers, Worker};

pub fn init_tracing(max_level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stdout.
        .with_max_level(max_level)
        // completes the builder.
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");
}

/// Load the configuration settings from sniproxy.yaml
/// See sniproxy::config::load_config for more info.
pub fn init_settings() -> Result<&'static Settings> {
    load_config("sniproxy.yaml")
}

pub fn init_runtime(conf: &'static Settings) -> io::Result<Runtime> {
    // This is unsafe to call after the server starts. It's safe here.
    unsafe {
        init_workers(conf.num_workers);
    }

    Builder::new_multi_thread()
        .worker_threads(conf.num_workers as usize)
        .enable_all()
        // Eagerly assign a thread-local worker to each original tokio worker thread
        // (this is a no-op later for additional tokio threads for blocking tasks)
        .on_thread_start(|| {
            Worker::try_get();
        })
        .build()
}

/// Builds the shared routing resolver once and one `Service` per configured listener, then
/// runs all of them to completion on the given runtime. Every listener shares the same
/// static routing table and sniffing parser; nothing here prevents a future config format
/// from choosing a different `Parser` per listener.
pub fn run_servers(conf: &'static Settings, tokio: &Runtime) {
    tokio.block_on(async move {
        // Update the coarse monotonic clock on a periodic basis
        tokio::spawn(coarse_monotonic_clock_updater());

        let resolver: &'static dyn Resolver = Box::leak(Box::new(StaticResolver::new(conf.routes.clone())));
        let parser = &SniffParser;

        let mut handles = Vec::new();
        // If reuseport is false, we create a single TcpListener per configured address.
        // Otherwise we create one per tokio worker. This reduces contention sharing accepted
        // sockets between worker threads (less work stealing) and reduces kernel lock contention
        // in accept. The downside is it won't error if you assign a port that is in use.
        // (hopefully these end up distributed nicely across tokio worker threads,
        // but I don't see a way to control that.)
        let num_listeners = if conf.reuseport { conf.num_workers } else { 1 };

        for listener_conf in &conf.listeners {
            for _ in 0..num_listeners {
                let listener = Listener::new(listener_conf.address.clone(), conf.reuseport, parser, resolver)
                    .expect("could not bind listener");
                let listener: &'static Listener = Box::leak(Box::new(listener));
                let listener_conf = listener_conf.clone();
                handles.push(tokio::spawn(async move {
                    let mut service = sniproxy::Service::new(listener, &listener_conf);
                    service.run().await
                }));
            }
        }

        // Wait for all listener tasks to shutdown
        for handle in handles.drain(..) {
            handle.await.expect("join failed");
        }
    });
}
