//! Helpers shared by the integration tests

#![allow(dead_code)]

use lantern::config::{HostConfig, ServerConfig};
use lantern::routes::RouteTable;
use lantern::server::{Server, ShutdownHandle};
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

/// A scratch directory built on `temp_dir::TempDir`, removed on drop.
///
/// `path` is canonical so it compares equal to resolved route paths.
pub struct Scratch {
    dir: temp_dir::TempDir,
    path: PathBuf,
}

impl Scratch {
    pub fn new(prefix: &str) -> Self {
        let dir = temp_dir::TempDir::with_prefix(format!("lantern-{}-", prefix)).unwrap();
        let path = dir.path().canonicalize().unwrap();
        Self { dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mkdir(&self, rel: &str) -> PathBuf {
        let dir = self.path.join(rel);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn write(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let file = self.path.join(rel);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&file, contents).unwrap();
        file
    }

    /// Writes an executable shell script.
    pub fn script(&self, rel: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let file = self.write(rel, format!("#!/bin/sh\n{}", body).as_bytes());
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o755)).unwrap();
        file
    }
}

pub fn host(name: &str) -> HostConfig {
    HostConfig {
        name: name.to_string(),
        root: None,
        cgi: None,
        proxy: None,
        aliases: BTreeMap::new(),
    }
}

/// One step of a [`ScriptedReader`].
pub enum Step {
    Data(Vec<u8>),
    Block,
}

/// A reader that yields its steps in order, then end of input.
pub struct ScriptedReader {
    steps: VecDeque<Step>,
}

impl ScriptedReader {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
        }
    }

    pub fn data(chunks: &[&str]) -> Self {
        Self::new(chunks.iter().map(|c| Step::Data(c.as_bytes().to_vec())).collect())
    }
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            None => Ok(0),
            Some(Step::Block) => Err(ErrorKind::WouldBlock.into()),
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.steps.push_front(Step::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}

/// A writer that accepts at most `chunk` bytes per call and blocks on
/// every other call.
pub struct ThrottledWriter {
    pub written: Vec<u8>,
    chunk: usize,
    block_next: bool,
}

impl ThrottledWriter {
    pub fn new(chunk: usize) -> Self {
        Self {
            written: Vec::new(),
            chunk,
            block_next: false,
        }
    }
}

impl Write for ThrottledWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.block_next {
            self.block_next = false;
            return Err(ErrorKind::WouldBlock.into());
        }
        self.block_next = true;
        let n = buf.len().min(self.chunk);
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A server bound to an ephemeral port, running on its own thread.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<anyhow::Result<()>>>,
}

impl TestServer {
    pub fn start(hosts: Vec<HostConfig>) -> Self {
        let settings = ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            tick_millis: 50,
            ..ServerConfig::default()
        };
        Self::start_with(settings, hosts)
    }

    pub fn start_with(settings: ServerConfig, hosts: Vec<HostConfig>) -> Self {
        let routes = RouteTable::from_config(&hosts).unwrap();
        let mut server = Server::bind(&settings, routes).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let thread = std::thread::spawn(move || server.run());

        Self {
            addr,
            shutdown,
            thread: Some(thread),
        }
    }

    pub fn stop(mut self) {
        self.shutdown.trigger();
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap().unwrap();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Sends `raw` and reads until the server closes the connection.
pub async fn exchange(addr: SocketAddr, raw: &[u8]) -> Vec<u8> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    response
}

/// Splits a raw response into its head (as text) and body.
pub fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no blank line");
    (
        String::from_utf8_lossy(&raw[..end]).into_owned(),
        raw[end + 4..].to_vec(),
    )
}

/// Value of a header in a head produced by [`split_response`].
pub fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (k, v) = line.split_once(':')?;
        k.eq_ignore_ascii_case(name).then(|| v.trim())
    })
}
