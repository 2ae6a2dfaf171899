use bytes::{Bytes, BytesMut};
use std::io::Read;

use crate::io::transfer::{read_into, Transfer};

pub const DEFAULT_CAPACITY: usize = 4096;

/// Line-at-a-time reads over a non-blocking descriptor.
///
/// The descriptor is passed on every call rather than owned, so the same
/// socket can be written through other paths once the head is consumed.
/// Bytes already buffered are always served before the descriptor is
/// touched again.
#[derive(Debug)]
pub struct LineReader {
    buf: BytesMut,
    capacity: usize,
    closed: bool,
}

impl LineReader {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Hands over whatever was read past the last returned line.
    pub fn take_buffered(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Appends the next line to `line`, terminator included when present.
    ///
    /// When the buffered bytes hold no `\n`, they are returned as a fragment
    /// and the rest of the line arrives on a later call. After the peer
    /// closes, every call returns `EndOfInput` without further I/O.
    pub fn read_line<R: Read + ?Sized>(&mut self, src: &mut R, line: &mut Vec<u8>) -> Transfer {
        if self.buf.is_empty() {
            if self.closed {
                return Transfer::EndOfInput;
            }
            match read_into(src, &mut self.buf, self.capacity) {
                Transfer::Open => {}
                Transfer::EndOfInput => {
                    self.closed = true;
                    return Transfer::EndOfInput;
                }
                other => return other,
            }
        }

        let end = self
            .buf
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(self.buf.len());

        line.extend_from_slice(&self.buf.split_to(end));
        Transfer::Open
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
