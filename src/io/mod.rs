//! Non-blocking byte transfer.
//!
//! - **`transfer`**: read / write-all / pipe primitives returning a four-valued status
//! - **`line_reader`**: buffered line-at-a-time reads for request heads

pub mod line_reader;
pub mod transfer;

pub use line_reader::LineReader;
pub use transfer::{Pipe, Transfer, WriteCursor};
