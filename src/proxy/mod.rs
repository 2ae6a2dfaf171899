//! Reverse proxy functionality
//!
//! A host route with a proxy target forwards every request to one upstream
//! over a fresh connection; see [`upstream`].

pub mod upstream;

pub use upstream::{connect, connection_state, parse_target, prepare_request, sniff_status};
