//! HTTP protocol implementation.
//!
//! One request per connection, HTTP/1.0 style: the response ends when the
//! connection closes.
//!
//! # Architecture
//!
//! - **`headers`**: case-insensitive, last-write-wins header multimap
//! - **`request`**: request representation; derives path, filename and query from the URI
//! - **`parser`**: incremental parser fed head lines, then raw body chunks
//! - **`response`**: response representation; `finalize` serializes the head
//! - **`writer`**: the send list flushing queued buffers across partial writes
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Parser states
//!
//! ```text
//!        ┌─────────────┐
//!        │    Head     │ ← request line, then header lines
//!        └──────┬──────┘
//!               │ blank line
//!               ▼
//!        ┌──────────────────┐
//!        │  HeadComplete    │ ← raw body chunks
//!        └──────┬───────────┘
//!               │ body length ≥ Content-Length
//!               ▼
//!        ┌──────────────────┐
//!        │  BodyComplete    │
//!        └──────────────────┘
//! ```
//!
//! Without a Content-Length the parser moves straight from `Head` to
//! `BodyComplete` on the blank line.

pub mod headers;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
