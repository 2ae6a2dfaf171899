//! Status-coded, retryable I/O over non-blocking byte streams.
//!
//! Every primitive in this module reports a [`Transfer`] outcome instead of
//! an `io::Result`. `WouldBlock` is not an error: the caller leaves its state
//! untouched and retries on the next readiness tick. `Interrupted` is retried
//! in place.
//!
//! The primitives are generic over `Read`/`Write`, so the same code drives
//! client sockets, upstream sockets and CGI pipes.

use bytes::{Buf, BytesMut};
use std::io::{self, ErrorKind, Read, Write};

/// Outcome of a single transfer attempt.
#[derive(Debug)]
pub enum Transfer {
    /// Progress was made and the descriptor is still usable.
    Open,
    /// Reads: the peer closed. Writes: everything pending has been flushed.
    EndOfInput,
    /// No progress is possible right now.
    WouldBlock,
    /// Fatal I/O error; the descriptor must be torn down.
    Failed(io::Error),
}

impl Transfer {
    pub fn is_open(&self) -> bool {
        matches!(self, Transfer::Open)
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Transfer::EndOfInput)
    }

    pub fn is_would_block(&self) -> bool {
        matches!(self, Transfer::WouldBlock)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Transfer::Failed(_))
    }
}

/// Reads at most `max` bytes from `src`, appending them to `buf`.
///
/// A zero `max` means the caller has no room to receive and yields
/// `WouldBlock` without touching the descriptor.
pub fn read_into<R: Read + ?Sized>(src: &mut R, buf: &mut BytesMut, max: usize) -> Transfer {
    if max == 0 {
        return Transfer::WouldBlock;
    }

    let start = buf.len();
    buf.resize(start + max, 0);

    let outcome = loop {
        match src.read(&mut buf[start..]) {
            Ok(0) => break (0, Transfer::EndOfInput),
            Ok(n) => break (n, Transfer::Open),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => break (0, Transfer::WouldBlock),
            Err(e) => break (0, Transfer::Failed(e)),
        }
    };

    buf.truncate(start + outcome.0);
    outcome.1
}

/// A byte buffer plus a cursor recording how much of it the peer has
/// already accepted.
///
/// Repeated [`write_all`](WriteCursor::write_all) calls resume at the
/// cursor, so acknowledged bytes are never sent twice.
#[derive(Debug, Default)]
pub struct WriteCursor {
    buf: Vec<u8>,
    pos: usize,
}

impl WriteCursor {
    pub fn new(buf: impl Into<Vec<u8>>) -> Self {
        Self {
            buf: buf.into(),
            pos: 0,
        }
    }

    /// Bytes not yet accepted by the destination.
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Bytes already accepted by the destination.
    pub fn written(&self) -> usize {
        self.pos
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Writes as much of the pending region as `dst` accepts.
    ///
    /// Returns `EndOfInput` once nothing is left (immediately, if nothing was
    /// pending), `Open` if some bytes went out before the destination
    /// blocked, and `WouldBlock` if none did.
    pub fn write_all<W: Write + ?Sized>(&mut self, dst: &mut W) -> Transfer {
        let mut progressed = false;

        while self.pos < self.buf.len() {
            match dst.write(&self.buf[self.pos..]) {
                Ok(0) => return Transfer::Failed(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.pos += n;
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return if progressed {
                        Transfer::Open
                    } else {
                        Transfer::WouldBlock
                    };
                }
                Err(e) => return Transfer::Failed(e),
            }
        }

        Transfer::EndOfInput
    }
}

/// Number of leading bytes a [`Pipe`] remembers for inspection.
const SAMPLE_LEN: usize = 64;

/// Moves bytes from a source to a destination through a bounded buffer.
///
/// Both sides are non-blocking; either may stall independently.
#[derive(Debug)]
pub struct Pipe {
    buf: BytesMut,
    capacity: usize,
    source_done: bool,
    written: usize,
    sample: Vec<u8>,
}

impl Pipe {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            source_done: false,
            written: 0,
            sample: Vec::new(),
        }
    }

    /// The source is still open and the buffer has room.
    pub fn wants_read(&self) -> bool {
        !self.source_done && self.buf.len() < self.capacity
    }

    /// Buffered bytes are waiting for the destination.
    pub fn wants_write(&self) -> bool {
        !self.buf.is_empty()
    }

    pub fn is_source_done(&self) -> bool {
        self.source_done
    }

    /// Total bytes delivered to the destination.
    pub fn written(&self) -> usize {
        self.written
    }

    /// The first bytes ever read from the source.
    pub fn sample(&self) -> &[u8] {
        &self.sample
    }

    /// One read step followed by a write step.
    ///
    /// `Open` while either side still has work, `EndOfInput` only once the
    /// source is exhausted and the buffer is fully flushed.
    pub fn pipe_all<R, W>(&mut self, src: &mut R, dst: &mut W) -> Transfer
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let mut progressed = false;

        if self.wants_read() {
            let start = self.buf.len();
            let room = self.capacity - start;
            match read_into(src, &mut self.buf, room) {
                Transfer::Open => {
                    progressed = true;
                    if self.sample.len() < SAMPLE_LEN {
                        let take = (SAMPLE_LEN - self.sample.len()).min(self.buf.len() - start);
                        self.sample.extend_from_slice(&self.buf[start..start + take]);
                    }
                }
                Transfer::EndOfInput => {
                    self.source_done = true;
                    progressed = true;
                }
                Transfer::WouldBlock => {}
                Transfer::Failed(e) => return Transfer::Failed(e),
            }
        }

        while !self.buf.is_empty() {
            match dst.write(&self.buf) {
                Ok(0) => return Transfer::Failed(ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.buf.advance(n);
                    self.written += n;
                    progressed = true;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Transfer::Failed(e),
            }
        }

        if self.source_done && self.buf.is_empty() {
            Transfer::EndOfInput
        } else if progressed {
            Transfer::Open
        } else {
            Transfer::WouldBlock
        }
    }
}
