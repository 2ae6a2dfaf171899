//! Lantern - single-threaded HTTP/1.0 server
//!
//! Serves static files, CGI scripts and reverse-proxied upstreams from one
//! non-blocking event loop.

pub mod cgi;
pub mod config;
pub mod http;
pub mod io;
pub mod proxy;
pub mod routes;
pub mod server;
