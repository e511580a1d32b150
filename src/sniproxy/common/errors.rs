use std::fmt::{Debug, Display};
use std::{fmt, io, result};
use std::net::AddrParseError;

#[derive(Debug)]
pub struct Error {
    err: Box<ErrorKind>, // use a Box to keep the Result type smaller
}

#[derive(Debug)]
pub enum ErrorKind {
    /// accept/dial refused because we're out of connection slots or file descriptors
    ResourceExhausted,
    /// the readiness primitive's addressable handle range was exceeded
    HandleOutOfRange,
    ClosedError,
    StringError(String),
    IOError(io::Error),
    YAMLError(serde_yaml::Error),
    /// the peeked bytes don't look like a protocol this proxy understands
    Malformed(&'static str),
    /// no hostname could be found in an otherwise well-formed peek
    NoHostname,
    /// the resolver could not produce a usable backend connection
    ResolveFailed(String),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn new<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(s.to_string())),
        }
    }

    pub fn resource_exhausted() -> Self {
        Error { err: Box::new(ErrorKind::ResourceExhausted) }
    }

    pub fn handle_out_of_range() -> Self {
        Error { err: Box::new(ErrorKind::HandleOutOfRange) }
    }

    pub fn closed() -> Self {
        Error { err: Box::new(ErrorKind::ClosedError) }
    }

    pub fn malformed(what: &'static str) -> Self {
        Error { err: Box::new(ErrorKind::Malformed(what)) }
    }

    pub fn no_hostname() -> Self {
        Error { err: Box::new(ErrorKind::NoHostname) }
    }

    pub fn resolve_failed<S: ToString>(s: S) -> Self {
        Error { err: Box::new(ErrorKind::ResolveFailed(s.to_string())) }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.err
    }

    /// True for would-block/interrupted/try-again conditions that the caller should
    /// swallow and retry on the next scheduler tick rather than tear the connection down.
    pub fn is_transient(&self) -> bool {
        match &*self.err {
            ErrorKind::IOError(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            _ => false,
        }
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error { err: Box::new(ErrorKind::StringError(String::from(err))) }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error { err: Box::new(ErrorKind::StringError(err)) }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error { err: Box::new(ErrorKind::IOError(err)) }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error { err: Box::new(ErrorKind::YAMLError(err)) }
    }
}

impl From<AddrParseError> for Error {
    fn from(err: AddrParseError) -> Self {
        Error::new(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.err, f)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::ResourceExhausted => f.write_str("out of connection slots"),
            ErrorKind::HandleOutOfRange => f.write_str("socket handle exceeds readiness primitive range"),
            ErrorKind::ClosedError => f.write_str("socket is closed"),
            ErrorKind::StringError(s) => f.write_str(s),
            ErrorKind::IOError(e) => Display::fmt(e, f),
            ErrorKind::YAMLError(e) => Display::fmt(e, f),
            ErrorKind::Malformed(what) => write!(f, "malformed input: {}", what),
            ErrorKind::NoHostname => f.write_str("no hostname found in peeked bytes"),
            ErrorKind::ResolveFailed(s) => write!(f, "failed to resolve backend: {}", s),
        }
    }
}

impl std::error::Error for Error {}
