use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;

use crate::http::response::SERVER_NAME;
use crate::http::request::Request;

/// Builds the complete environment for one CGI invocation.
///
/// The child gets exactly this map; nothing is inherited from the server
/// process except `PATH`.
pub fn build(
    document_root: &Path,
    script: &Path,
    request: &Request,
    peer: SocketAddr,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    let mut set = |key: &str, value: String| {
        env.insert(key.to_string(), value);
    };

    set("GATEWAY_INTERFACE", "CGI/1.1".to_string());
    set("SERVER_SOFTWARE", SERVER_NAME.to_string());
    set("SERVER_PROTOCOL", protocol(request).to_string());
    set("REDIRECT_STATUS", "200".to_string());

    set("DOCUMENT_ROOT", document_root.display().to_string());
    set("SCRIPT_FILENAME", script.display().to_string());
    set("SCRIPT_NAME", request.path.clone());
    set("PATH_INFO", request.path.clone());
    set("REQUEST_METHOD", request.method.clone());
    set("REQUEST_URI", request.uri.clone());
    set("QUERY_STRING", request.query.clone());

    set("CONTENT_LENGTH", request.body.len().to_string());
    if let Some(content_type) = request.header("Content-Type") {
        set("CONTENT_TYPE", content_type.to_string());
    }

    set("REMOTE_ADDR", peer.ip().to_string());
    set("REMOTE_PORT", peer.port().to_string());

    if let Some(agent) = request.header("User-Agent") {
        set("HTTP_USER_AGENT", agent.to_string());
    }
    if let Some(host) = request.host() {
        set("HTTP_HOST", host.to_string());
    }

    if let Some(path) = std::env::var_os("PATH") {
        set("PATH", path.to_string_lossy().into_owned());
    }

    env
}

fn protocol(request: &Request) -> &str {
    if request.version.is_empty() {
        "HTTP/1.0"
    } else {
        &request.version
    }
}
