//! CGI script execution.
//!
//! - **`env`**: per-request environment map handed to the child
//! - **`output`**: translation of the child's stdout into a response
//!
//! Scripts run as children with piped stdin/stdout. Both pipe ends are
//! switched to non-blocking mode and driven by the event loop; nothing here
//! waits on the child.

pub mod env;
pub mod output;

use mio::unix::pipe;
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};

/// A running script and the server's ends of its pipes.
pub struct CgiProcess {
    pub child: Child,
    /// Present only when a request body will be fed to the script
    pub stdin: Option<pipe::Sender>,
    pub stdout: pipe::Receiver,
}

/// Starts `script` with exactly `env` as its environment.
pub fn spawn(script: &Path, env: &BTreeMap<String, String>, feed_stdin: bool) -> io::Result<CgiProcess> {
    let mut command = Command::new(script);
    command
        .env_clear()
        .envs(env)
        .stdin(if feed_stdin { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    if let Some(dir) = script.parent() {
        command.current_dir(dir);
    }

    let mut child = command.spawn()?;

    match attach_pipes(&mut child) {
        Ok((stdin, stdout)) => {
            tracing::debug!(script = %script.display(), pid = child.id(), "Spawned CGI script");
            Ok(CgiProcess { child, stdin, stdout })
        }
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(e)
        }
    }
}

fn attach_pipes(child: &mut Child) -> io::Result<(Option<pipe::Sender>, pipe::Receiver)> {
    let stdout = child
        .stdout
        .take()
        .map(pipe::Receiver::from)
        .ok_or_else(|| io::Error::other("CGI child has no stdout pipe"))?;
    stdout.set_nonblocking(true)?;

    let stdin = child.stdin.take().map(pipe::Sender::from);
    if let Some(stdin) = &stdin {
        stdin.set_nonblocking(true)?;
    }

    Ok((stdin, stdout))
}

/// Children whose output is no longer needed, waiting to be reaped.
#[derive(Default)]
pub struct Reaper {
    children: Vec<Child>,
}

impl Reaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a child that is expected to exit on its own.
    pub fn adopt(&mut self, child: Child) {
        self.children.push(child);
    }

    /// Kills a child whose session was torn down, then adopts it.
    pub fn terminate(&mut self, mut child: Child) {
        if let Err(e) = child.kill() {
            tracing::trace!(pid = child.id(), error = %e, "CGI child already gone");
        }
        self.children.push(child);
    }

    /// Collects every child that has exited, without blocking.
    pub fn reap(&mut self) {
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                tracing::trace!(pid = child.id(), %status, "Reaped CGI child");
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(pid = child.id(), error = %e, "Failed to poll CGI child");
                false
            }
        });
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}
