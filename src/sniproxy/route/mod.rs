mod http;
mod parser;
mod resolver;
mod sni;
mod sniff;

pub use self::http::HostParser;
pub use self::parser::{ParseOutcome, Parser};
pub use self::resolver::{Resolver, StaticResolver};
pub use self::sni::SniParser;
pub use self::sniff::SniffParser;
