use std::collections::VecDeque;
use std::io::Write;

use crate::http::request::Request;
use crate::http::response::Response;
use crate::io::transfer::{Transfer, WriteCursor};

/// Ordered buffers still to be flushed to one destination.
///
/// Each buffer keeps its own cursor, so a flush interrupted by `WouldBlock`
/// resumes exactly where the destination stopped accepting bytes.
#[derive(Debug, Default)]
pub struct SendList {
    parts: VecDeque<WriteCursor>,
    sent: usize,
}

impl SendList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the response's head and body, finalizing it first unless that
    /// already happened (a HEAD response keeps its head, minus the body).
    pub fn from_response(response: &mut Response) -> Self {
        if response.head().is_empty() {
            response.finalize();
        }
        let (head, body) = response.take_wire();

        let mut list = Self::new();
        list.push(head);
        list.push(body);
        list
    }

    /// Queues the request's finalized head followed by its body.
    pub fn from_request(request: &Request) -> Self {
        let mut list = Self::new();
        list.push(request.head().to_vec());
        list.push(request.body.clone());
        list
    }

    /// Queues a buffer; empty buffers are skipped.
    pub fn push(&mut self, buf: Vec<u8>) {
        if !buf.is_empty() {
            self.parts.push_back(WriteCursor::new(buf));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Bytes queued but not yet accepted.
    pub fn pending(&self) -> usize {
        self.parts.iter().map(WriteCursor::remaining).sum()
    }

    /// Bytes accepted by the destination so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Writes queued buffers in order until done or the destination blocks.
    pub fn flush<W: Write + ?Sized>(&mut self, dst: &mut W) -> Transfer {
        let mut progressed = false;

        while let Some(part) = self.parts.front_mut() {
            let before = part.written();
            let outcome = part.write_all(dst);
            let delta = part.written() - before;
            self.sent += delta;
            progressed |= delta > 0;

            match outcome {
                Transfer::EndOfInput => {
                    self.parts.pop_front();
                }
                Transfer::Open => return Transfer::Open,
                Transfer::WouldBlock if progressed => return Transfer::Open,
                other => return other,
            }
        }

        Transfer::EndOfInput
    }
}
