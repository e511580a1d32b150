use std::io;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, error};

use crate::sniproxy::common::{Error, Result};
use crate::sniproxy::config::LISTEN_BACKLOG;
use crate::sniproxy::route::{Parser, Resolver};

/// A Listener owns the bound listening socket plus the two external collaborators
/// (§6 of the connection-management core: the parser and the resolver) that every
/// connection accepted on it will use during peek-parse-dial.
pub struct Listener {
    pub address: String,
    listener: TcpListener,
    pub parser: &'static dyn Parser,
    pub resolver: &'static dyn Resolver,
}

impl Listener {
    pub fn new(
        address: String,
        reuseport: bool,
        parser: &'static dyn Parser,
        resolver: &'static dyn Resolver,
    ) -> Result<Self> {
        let addr = address.parse()?;
        let sock = if addr.is_ipv6() {
            TcpSocket::new_v6()?
        } else {
            TcpSocket::new_v4()?
        };
        #[cfg(unix)]
        {
            if reuseport {
                sock.set_reuseport(true)?;
            }
            // The client always sends the first data right after connecting (that's the whole
            // point of this proxy), so deferring accept until data arrives saves a wakeup.
            #[cfg(target_os = "linux")]
            unsafe {
                let optval: libc::c_int = 1;
                let ret = libc::setsockopt(
                    sock.as_raw_fd(),
                    libc::SOL_SOCKET,
                    libc::TCP_DEFER_ACCEPT,
                    &optval as *const _ as *const libc::c_void,
                    std::mem::size_of_val(&optval) as libc::socklen_t,
                );
                if ret != 0 {
                    return Err(Error::from(io::Error::last_os_error()));
                }
            }
        }
        sock.bind(addr)?;
        let listener = sock.listen(LISTEN_BACKLOG)?;
        Ok(Self { address, listener, parser, resolver })
    }

    /// The actual bound address, distinct from `self.address` when the configured address
    /// used an ephemeral port (`:0`) -- tests bind that way to avoid port collisions.
    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn accept(&self) -> Option<TcpStream> {
        loop {
            match self.listener.accept().await {
                Ok((sock, remote_addr)) => {
                    debug!(%remote_addr, server = %self.address.as_str(), "accept connection");
                    return Some(sock);
                }
                Err(e) => {
                    #[cfg(unix)]
                    {
                        // Recoverable errors: keep accepting. Anything else is treated as fatal
                        // for this listener, same as the reference daemon's accept loop.
                        match e.raw_os_error().unwrap_or(0) {
                            libc::ECONNABORTED
                            | libc::EMFILE // process file-descriptor limit
                            | libc::ENFILE // system wide file-descriptor limit
                            | libc::ENOBUFS // out of memory
                            | libc::ENOMEM // out of memory
                            | libc::EPROTO // protocol error
                            | libc::EINTR => {
                                error!(%e, "accept error");
                                continue;
                            }
                            libc::EBADF => return None, // listening socket closed during shutdown
                            _ => panic!("unrecoverable error on {}: {}", self.address.as_str(), Error::from(e)),
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        error!(%e, "accept error");
                        return None;
                    }
                }
            }
        }
    }
}
