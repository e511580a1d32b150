use tokio::net::TcpStream;

use crate::sniproxy::common::Result;

/// Transport is a thin non-blocking wrapper around a TCP socket. The reference transport
/// also supported an optional TLS session layered over the same socket; this proxy never
/// terminates TLS (it only reads far enough to peek the SNI), so only the plain-TCP half
/// survives here.
pub struct Transport {
    stream: TcpStream,
}

impl Transport {
    pub fn new(stream: TcpStream) -> Self {
        Transport { stream }
    }

    pub fn inner(&self) -> &TcpStream {
        &self.stream
    }

    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize> {
        match self.stream.try_read(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(e.into()),
        }
    }

    pub fn try_write(&self, buf: &[u8]) -> Result<usize> {
        match self.stream.try_write(buf) {
            Ok(n) => Ok(n),
            Err(e) => Err(e.into()),
        }
    }

    pub fn peer_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.stream.peer_addr()
    }
}
