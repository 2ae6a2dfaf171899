//! Upstream connection and request forwarding
//!
//! The request head is regenerated for the wire and sent to the upstream;
//! the upstream's response is then piped back to the client byte for byte,
//! without reparsing.

use anyhow::Context;
use mio::net::TcpStream;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};

use crate::http::request::Request;
use crate::io::transfer::Transfer;

/// Buffer size for piping upstream responses
pub const PIPE_CAPACITY: usize = 16 * 1024;

/// Headers that describe one hop and must not be forwarded
const HOP_BY_HOP: [&str; 5] = [
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Transfer-Encoding",
    "Upgrade",
];

/// Parses a proxy target, `host:port` or `http://host[:port]`, and resolves it once.
pub fn parse_target(target: &str) -> anyhow::Result<SocketAddr> {
    let target = target.trim();

    let (host, port) = if target.contains("://") {
        let url = url::Url::parse(target).context("Invalid upstream URL")?;
        let host = url.host_str().context("Upstream URL missing host")?.to_string();
        let port = url.port_or_known_default().unwrap_or(80);
        (host, port)
    } else {
        let (host, port) = target
            .rsplit_once(':')
            .context("Upstream must be host:port")?;
        let port: u16 = port.parse().context("Invalid upstream port")?;
        (host.trim_matches(|c| c == '[' || c == ']').to_string(), port)
    };

    (host.as_str(), port)
        .to_socket_addrs()
        .with_context(|| format!("Failed to resolve upstream {}", target))?
        .next()
        .with_context(|| format!("Upstream {} resolved to no address", target))
}

/// Starts a non-blocking connect. Completion shows up as writability.
pub fn connect(addr: SocketAddr) -> io::Result<TcpStream> {
    TcpStream::connect(addr)
}

/// Whether a non-blocking connect has finished.
///
/// `Open` once connected, `WouldBlock` while in progress, `Failed` if the
/// connect was refused or otherwise errored.
pub fn connection_state(stream: &TcpStream) -> Transfer {
    match stream.take_error() {
        Ok(Some(e)) | Err(e) => return Transfer::Failed(e),
        Ok(None) => {}
    }

    match stream.peer_addr() {
        Ok(_) => Transfer::Open,
        Err(e) if e.kind() == ErrorKind::NotConnected => Transfer::WouldBlock,
        Err(e) => Transfer::Failed(e),
    }
}

/// Rewrites the request for the upstream and regenerates its head.
///
/// Hop-by-hop headers are dropped and `Connection: close` is added so the
/// upstream ends its response by closing the connection.
pub fn prepare_request(request: &mut Request) {
    for name in HOP_BY_HOP {
        request.headers.remove(name);
    }
    request.headers.insert("Connection", "close");

    if request.uri.is_empty() {
        request.set_uri("/");
    }

    request.finalize();
}

/// Status code from the start of a raw response (`HTTP/1.x NNN ...`).
pub fn sniff_status(bytes: &[u8]) -> Option<u16> {
    let line_end = bytes.iter().position(|&b| b == b'\n').unwrap_or(bytes.len());
    let line = std::str::from_utf8(&bytes[..line_end]).ok()?;

    let mut parts = line.split_whitespace();
    if !parts.next()?.starts_with("HTTP/") {
        return None;
    }
    let code = parts.next()?;
    if code.len() != 3 {
        return None;
    }
    code.parse().ok()
}
