//! Per-connection outbound buffering.
//!
//! Responses are appended to an `OutboundQueue` while input is processed and
//! drained whenever the socket accepts writes. The queue is bounded so a peer
//! that never reads cannot grow server memory without limit.

use crate::error::ConnError;
use bytes::{Buf, BytesMut};
use std::io::{self, Write};

/// Outcome of a drain attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Every queued byte was written.
    Complete,
    /// The writer would block; bytes remain queued.
    Blocked,
}

/// Bounded FIFO of bytes waiting to be written.
#[derive(Debug)]
pub struct OutboundQueue {
    buf: BytesMut,
    limit: usize,
}

impl OutboundQueue {
    /// Create an empty queue holding at most `limit` pending bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            limit,
        }
    }

    /// Append bytes, failing if the queue would exceed its limit.
    pub fn enqueue(&mut self, data: &[u8]) -> Result<(), ConnError> {
        let pending = self.buf.len() + data.len();
        if pending > self.limit {
            return Err(ConnError::OutboundOverflow {
                pending,
                limit: self.limit,
            });
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    /// Bytes not yet written.
    #[cfg(test)]
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write as much as `writer` accepts without blocking.
    ///
    /// A write of zero bytes is reported as `WriteZero`.
    pub fn drain_into<W: Write>(&mut self, writer: &mut W) -> io::Result<Drain> {
        while !self.buf.is_empty() {
            match writer.write(&self.buf) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => self.buf.advance(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Drain::Blocked),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Drain::Complete)
    }
}
