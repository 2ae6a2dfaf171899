use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::http::request::{Method, Request};
use crate::http::response::StatusCode;
use crate::routes::{confine, HostRoute, RouteTable};

/// Files tried, in order, when a request names a directory.
pub const INDEX_FILES: [&str; 2] = ["index.html", "index.htm"];

/// How a completed request will be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A regular file inside the document root, already canonical.
    Static(PathBuf),
    /// A script inside the CGI directory, already canonical.
    Cgi { script: PathBuf, root: PathBuf },
    /// Forward to this upstream.
    Proxy(SocketAddr),
    /// Answer with an error page.
    Error(StatusCode),
}

/// Decides static, CGI or proxy handling. Touches the filesystem only to
/// canonicalize and stat candidate paths.
pub fn resolve(request: &Request, routes: &RouteTable) -> Resolution {
    let Some(route) = routes.lookup(request.host()) else {
        return Resolution::Error(StatusCode::NotFound);
    };

    if let Some(upstream) = route.proxy {
        return Resolution::Proxy(upstream);
    }

    let Some(root) = route.root.as_deref() else {
        return Resolution::Error(StatusCode::NotFound);
    };

    let Some(method) = request.method() else {
        return Resolution::Error(StatusCode::NotImplemented);
    };

    let path = route.rewrite(&request.path);
    let candidate = root.join(path.trim_start_matches('/'));

    if let Some(cgi_dir) = in_cgi_dir(route, &candidate) {
        if !matches!(method, Method::GET | Method::HEAD | Method::POST) {
            return Resolution::Error(StatusCode::NotImplemented);
        }
        return match confine(cgi_dir, &candidate) {
            Some(script) if script.is_file() => Resolution::Cgi {
                script,
                root: root.to_path_buf(),
            },
            _ => Resolution::Error(StatusCode::NotFound),
        };
    }

    if !matches!(method, Method::GET | Method::HEAD) {
        return Resolution::Error(StatusCode::NotImplemented);
    }

    match static_file(root, &candidate) {
        Some(file) => Resolution::Static(file),
        None => Resolution::Error(StatusCode::NotFound),
    }
}

/// The route's CGI directory, if `candidate` lies under it before any
/// `..` or symlink is resolved.
fn in_cgi_dir<'a>(route: &'a HostRoute, candidate: &Path) -> Option<&'a Path> {
    route
        .cgi_dir
        .as_deref()
        .filter(|dir| candidate.starts_with(dir))
}

fn static_file(root: &Path, candidate: &Path) -> Option<PathBuf> {
    let resolved = confine(root, candidate)?;
    if resolved.is_file() {
        return Some(resolved);
    }
    if !resolved.is_dir() {
        return None;
    }

    INDEX_FILES
        .iter()
        .filter_map(|index| confine(root, &resolved.join(index)))
        .find(|file| file.is_file())
}
