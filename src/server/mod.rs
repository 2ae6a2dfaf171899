//! Connection engine.
//!
//! A single thread waits on every live descriptor with `mio`, then hands
//! each ready one to the handler for its context's state. Nothing blocks:
//! a handler that cannot finish returns and runs again on a later tick.
//!
//! # Modules
//!
//! - **`listener`**: the event loop; accepts, dispatches, expires, reaps
//! - **`context`**: per-connection state records
//! - **`registry`**: context storage with end-of-tick removal
//! - **`handlers`**: one handler per state
//! - **`resolve`**: static / CGI / proxy decision for a parsed request
//! - **`access_log`**: one line per finished session
//!
//! # Session states
//!
//! ```text
//! ReadingRequest ──parsed──▶ ResolvingRequest
//!                              │
//!        ┌─────────────────────┼──────────────────────┐
//!        ▼ static / error      ▼ CGI                  ▼ proxy
//! WritingResponse ◀──EOF── ReadingCgiOutput    WritingProxyRequest
//!        │                 (+ WritingCgiInput)        │ sent
//!        ▼ drained                                    ▼
//!    terminated  ◀──────upstream EOF, flushed── PipingProxyResponse
//! ```

pub mod access_log;
pub mod context;
pub mod handlers;
pub mod listener;
pub mod registry;
pub mod resolve;

pub use listener::{Server, ShutdownHandle};
