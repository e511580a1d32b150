use tracing::info;

use crate::sniproxy::proxy::{ConnState, ConnectionTable};

/// Closes connections that have sat idle past a configured threshold. This is explicitly
/// layered *above* the connection-management core (which has no notion of per-connection
/// timers): it only ever calls into the ordinary close path of `Connection::close_client` /
/// `close_server`, the same one the scheduler uses for I/O errors, so reaped connections go
/// through the same half-close drain as any other close.
///
/// `0` disables reaping entirely (the default upstream behavior when no timeout is set).
pub struct IdleReaper {
    idle_timeout_seconds: u32,
}

impl IdleReaper {
    pub fn new(idle_timeout_seconds: u32) -> Self {
        IdleReaper { idle_timeout_seconds }
    }

    pub fn enabled(&self) -> bool {
        self.idle_timeout_seconds > 0
    }

    /// Scans from the tail of the table (the least-recently-active end, by the LRU law) and
    /// closes every connection idle longer than the threshold, stopping at the first
    /// connection that isn't -- since the table is kept in recency order, nothing further
    /// toward the head can be idle longer than that one.
    pub fn reap(&self, table: &mut ConnectionTable) {
        if !self.enabled() {
            return;
        }

        let mut idx = table.tail_index();
        while let Some(i) = idx {
            let conn = table.get(i);
            if conn.idle_seconds() < self.idle_timeout_seconds {
                break;
            }
            let prev = table.prev_index(i);

            let conn = table.get_mut(i);
            info!(
                peer = %conn.peer_label(),
                idle_seconds = conn.idle_seconds(),
                "closing idle connection",
            );
            close_fully(conn);
            table.remove(i);

            idx = prev;
        }
    }
}

/// Closes whichever sides are still open, driving a connection straight to CLOSED
/// regardless of which half-close state it started in. Shared with `Service::shutdown`,
/// which needs the identical teardown on process exit.
pub(crate) fn close_fully(conn: &mut crate::sniproxy::proxy::Connection) {
    match conn.state {
        ConnState::New | ConnState::Closed => {}
        ConnState::Accepted => conn.close_client(),
        ConnState::Connected => {
            conn.close_client();
            conn.close_server();
        }
        ConnState::ServerClosed => conn.close_client(),
        ConnState::ClientClosed => conn.close_server(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_reaper_is_a_no_op_marker() {
        let reaper = IdleReaper::new(0);
        assert!(!reaper.enabled());
        let reaper = IdleReaper::new(60);
        assert!(reaper.enabled());
    }
}
