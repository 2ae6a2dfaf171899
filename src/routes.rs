//! Host routing: which document root, CGI directory or upstream serves a
//! request, looked up by its `Host` header.

use anyhow::Context;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::config::HostConfig;
use crate::proxy::upstream;

/// Host name of the fallback route.
pub const WILDCARD: &str = "*";

/// One path prefix rewrite, applied before filesystem resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub from: String,
    pub to: String,
}

/// How requests for one host are served.
///
/// A route with a `proxy` target forwards everything; `root` and `cgi_dir`
/// are then never consulted.
#[derive(Debug, Clone, Default)]
pub struct HostRoute {
    pub hostname: String,
    /// Absolute, canonical document root
    pub root: Option<PathBuf>,
    /// Absolute, canonical CGI directory
    pub cgi_dir: Option<PathBuf>,
    pub proxy: Option<SocketAddr>,
    pub aliases: Vec<Alias>,
}

impl HostRoute {
    pub fn from_config(cfg: &HostConfig) -> anyhow::Result<Self> {
        let root = cfg
            .root
            .as_deref()
            .map(|p| canonical_dir(p, "document root"))
            .transpose()?;
        let cgi_dir = cfg
            .cgi
            .as_deref()
            .map(|p| canonical_dir(p, "CGI directory"))
            .transpose()?;
        let proxy = cfg
            .proxy
            .as_deref()
            .map(upstream::parse_target)
            .transpose()
            .with_context(|| format!("Invalid proxy target for host {}", cfg.name))?;

        let aliases = cfg
            .aliases
            .iter()
            .map(|(from, to)| Alias {
                from: from.trim_end_matches('/').to_string(),
                to: to.trim_end_matches('/').to_string(),
            })
            .collect();

        Ok(Self {
            hostname: cfg.name.to_ascii_lowercase(),
            root,
            cgi_dir,
            proxy,
            aliases,
        })
    }

    /// Rewrites `path` through the alias with the longest matching prefix.
    ///
    /// A prefix only matches whole path segments: `/docs` rewrites
    /// `/docs/a` but not `/docsx`.
    pub fn rewrite(&self, path: &str) -> String {
        let best = self
            .aliases
            .iter()
            .filter(|alias| {
                path.strip_prefix(alias.from.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
            })
            .max_by_key(|alias| alias.from.len());

        match best {
            Some(alias) => format!("{}{}", alias.to, &path[alias.from.len()..]),
            None => path.to_string(),
        }
    }
}

/// All configured hosts, plus the optional wildcard fallback.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, HostRoute>,
    fallback: Option<HostRoute>,
}

impl RouteTable {
    pub fn new(routes: Vec<HostRoute>) -> Self {
        let mut table = Self::default();
        for route in routes {
            if route.hostname == WILDCARD {
                table.fallback = Some(route);
            } else {
                table.routes.insert(route.hostname.to_ascii_lowercase(), route);
            }
        }
        table
    }

    pub fn from_config(hosts: &[HostConfig]) -> anyhow::Result<Self> {
        let routes = hosts
            .iter()
            .map(HostRoute::from_config)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(routes))
    }

    /// Finds the route for a `Host` header value; the port is ignored.
    pub fn lookup(&self, host: Option<&str>) -> Option<&HostRoute> {
        host.map(strip_port)
            .and_then(|name| self.routes.get(&name.to_ascii_lowercase()))
            .or(self.fallback.as_ref())
    }

    pub fn len(&self) -> usize {
        self.routes.len() + usize::from(self.fallback.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Canonicalizes `candidate` and returns it only if it lies inside `base`.
///
/// Symlinks and `..` segments are resolved first, so neither can escape.
pub fn confine(base: &Path, candidate: &Path) -> Option<PathBuf> {
    let base = base.canonicalize().ok()?;
    let resolved = candidate.canonicalize().ok()?;
    resolved.starts_with(&base).then_some(resolved)
}

fn strip_port(host: &str) -> &str {
    let host = host.trim();
    if host.starts_with('[') {
        // [v6]:port
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

fn canonical_dir(path: &Path, what: &str) -> anyhow::Result<PathBuf> {
    let dir = path
        .canonicalize()
        .with_context(|| format!("Cannot resolve {} {}", what, path.display()))?;
    if !dir.is_dir() {
        anyhow::bail!("{} {} is not a directory", what, dir.display());
    }
    Ok(dir)
}
