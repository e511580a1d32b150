mod buffer;
mod connection;
mod scheduler;
mod table;

pub use buffer::Buffer;
pub use connection::{ConnState, Connection, Endpoint, Interest};
pub use scheduler::Scheduler;
pub use table::ConnectionTable;
