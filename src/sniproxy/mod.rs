pub mod common;
pub mod config;
pub mod proxy;
mod reaper;
pub mod route;
pub mod server;
mod service;
pub mod worker;

pub use common::{Error, Result};
pub use service::Service;
