use crate::sniproxy::common::Result;
use crate::sniproxy::server::Transport;

/// A fixed-capacity FIFO byte buffer. Bytes are appended at the tail by `recv` and consumed
/// from the head by `send`; `peek` copies from the head without consuming, so the same bytes
/// can be inspected more than once (by the peek-parse-dial handoff) before being forwarded.
///
/// Implemented as a compacting buffer rather than a wrapping ring: a single contiguous
/// `Vec<u8>` of length `capacity`, with `start`/`end` cursors into it. When the tail reaches
/// the end of the vec but there's still free room (because the head has advanced), the
/// occupied region is shifted down to index 0 before the next read. This trades a memmove
/// for simpler, easier-to-get-right indexing than a true wrap-around ring.
pub struct Buffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
}

impl Buffer {
    pub fn new(capacity: usize) -> Self {
        Buffer { data: vec![0u8; capacity], start: 0, end: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn room(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Copies up to `dst.len()` bytes from the head without consuming them. Returns the
    /// number of bytes copied. Calling this repeatedly with no intervening recv/send
    /// returns the same prefix every time (peek idempotence).
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len());
        dst[..n].copy_from_slice(&self.data[self.start..self.start + n]);
        n
    }

    /// Same as `peek` but avoids the copy, returning a borrowed slice of the occupied region
    /// capped at `n` bytes. Used by the peek-parse-dial handoff, which only reads.
    pub fn peek_slice(&self, n: usize) -> &[u8] {
        let n = n.min(self.len());
        &self.data[self.start..self.start + n]
    }

    fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.data.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }

    /// Reads from `transport` into the tail of the buffer. Returns the number of bytes
    /// read, or `Ok(0)` for an orderly peer close. Transient errors (would-block,
    /// interrupted) are returned as `Err` with `Error::is_transient() == true`; the caller
    /// is expected to treat those as "nothing happened, try again next tick".
    ///
    /// Callers must only call this when `room() > 0`; the scheduler only registers read
    /// interest in that case, and single-threaded cooperative scheduling guarantees nothing
    /// else touches this buffer between registration and dispatch.
    pub fn recv(&mut self, transport: &Transport) -> Result<usize> {
        debug_assert!(self.room() > 0);
        if self.end == self.data.len() {
            self.compact();
        }
        let n = transport.try_read(&mut self.data[self.end..])?;
        self.end += n;
        Ok(n)
    }

    /// Writes from the head of the buffer to `transport`, advancing the head by the number
    /// of bytes accepted. A short write is normal, not an error. Resets to the empty state
    /// (`start == end == 0`) once fully drained so later recv calls get the full capacity
    /// contiguously.
    ///
    /// Callers must only call this when `len() > 0`.
    pub fn send(&mut self, transport: &Transport) -> Result<usize> {
        debug_assert!(self.len() > 0);
        let n = transport.try_write(&self.data[self.start..self.end])?;
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_and_len_track_capacity() {
        let buf = Buffer::new(16);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.room(), 16);
        assert!(buf.is_empty());
    }

    #[test]
    fn peek_is_idempotent_without_mutation() {
        let mut buf = Buffer::new(16);
        buf.data[0..5].copy_from_slice(b"hello");
        buf.end = 5;

        let mut a = [0u8; 5];
        let mut b = [0u8; 5];
        assert_eq!(buf.peek(&mut a), 5);
        assert_eq!(buf.peek(&mut b), 5);
        assert_eq!(a, b);
        assert_eq!(buf.len(), 5); // peek never consumes
    }

    #[test]
    fn compact_reclaims_head_room() {
        let mut buf = Buffer::new(8);
        buf.data.copy_from_slice(b"abcdefgh");
        buf.start = 6;
        buf.end = 8;
        buf.compact();
        assert_eq!(buf.start, 0);
        assert_eq!(buf.end, 2);
        assert_eq!(&buf.data[0..2], b"gh");
    }
}
