use anyhow::Context as _;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::cgi::Reaper;
use crate::config::{Config, ServerConfig};
use crate::routes::RouteTable;
use crate::server::context::{Allocator, ClientContext, Context, Outcome};
use crate::server::handlers::{self, Tick};
use crate::server::registry::{Effect, Registry};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_DYNAMIC_TOKEN: usize = 2;

const EVENTS_CAPACITY: usize = 1024;

/// Stops a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Asks the loop to close every session and return. Takes effect at the
    /// next tick boundary.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake event loop");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The single-threaded event loop: one listener, every live session, and
/// the CGI children still to be reaped.
pub struct Server {
    poll: Poll,
    listener: TcpListener,
    registry: Registry,
    routes: RouteTable,
    settings: ServerConfig,
    ids: Allocator,
    reaper: Reaper,
    shutdown: ShutdownHandle,
}

impl Server {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let routes = RouteTable::from_config(&cfg.hosts)?;
        if routes.is_empty() {
            warn!("No hosts configured, every request will get 404");
        }
        Self::bind(&cfg.server, routes)
    }

    pub fn bind(settings: &ServerConfig, routes: RouteTable) -> anyhow::Result<Self> {
        let addr = resolve_listen(&settings.listen_addr)?;

        let poll = Poll::new().context("Failed to create poll instance")?;
        let mut listener =
            TcpListener::bind(addr).with_context(|| format!("Failed to bind {}", addr))?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .context("Failed to register listener")?;
        let waker = Waker::new(poll.registry(), WAKER).context("Failed to create waker")?;

        Ok(Self {
            poll,
            listener,
            registry: Registry::new(),
            routes,
            settings: settings.clone(),
            ids: Allocator::new(FIRST_DYNAMIC_TOKEN),
            reaper: Reaper::new(),
            shutdown: ShutdownHandle {
                flag: Arc::new(AtomicBool::new(false)),
                waker: Arc::new(waker),
            },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Runs until the shutdown handle is triggered.
    pub fn run(&mut self) -> anyhow::Result<()> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        info!(addr = %self.local_addr()?, "Listening");

        while !self.shutdown.is_triggered() {
            self.sync_interest();

            match self.poll.poll(&mut events, Some(self.settings.tick())) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("Readiness wait failed"),
            }

            if self.shutdown.is_triggered() {
                break;
            }

            let mut ready = HashSet::new();
            let mut accept = false;
            for event in events.iter() {
                match event.token() {
                    LISTENER => accept = true,
                    WAKER => {}
                    token => {
                        ready.insert(token);
                    }
                }
            }

            if accept {
                self.accept_pending();
            }
            self.dispatch(&ready);
            self.expire_idle();
            self.reaper.reap();
        }

        info!(sessions = self.registry.len(), "Shutting down");
        self.registry
            .close_all(Outcome::Shutdown, self.poll.registry(), &mut self.reaper);
        self.reaper.reap();
        Ok(())
    }

    /// Accepts every queued connection, each into a fresh session.
    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let token = self.ids.token();
                    let ctx = ClientContext::new(
                        self.ids.context(),
                        self.ids.session(),
                        stream,
                        token,
                        peer,
                        self.settings.parser_limits(),
                        Instant::now(),
                    );
                    debug!(%peer, token = token.0, "Accepted connection");
                    self.registry.push(Context::Client(Box::new(ctx)));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    break;
                }
            }
        }
    }

    /// Runs the handler for every ready descriptor, in registry order.
    fn dispatch(&mut self, ready: &HashSet<Token>) {
        let Self {
            poll,
            registry,
            routes,
            settings,
            ids,
            reaper,
            ..
        } = self;
        let now = Instant::now();

        for id in registry.ids() {
            for token in registry.tokens_of(id) {
                if !ready.contains(&token) || registry.is_doomed(id) {
                    continue;
                }
                let Some((_, role)) = registry.find(token) else {
                    continue;
                };
                let Some(ctx) = registry.get_mut(id) else {
                    break;
                };

                let mut tick = Tick {
                    routes: &*routes,
                    settings: &*settings,
                    ids: &mut *ids,
                    reaper: &mut *reaper,
                    effects: Vec::new(),
                    now,
                };
                handlers::dispatch(&mut tick, ctx, token, role);
                let effects = tick.effects;
                registry.defer_all(effects);
            }
        }

        registry.commit(poll.registry(), reaper);
    }

    fn expire_idle(&mut self) {
        let timeout = self.settings.idle_timeout();
        for token in self.registry.expired(Instant::now(), timeout) {
            debug!(token = token.0, "Closing idle session");
            self.registry.defer(Effect::CloseSession {
                token,
                outcome: Outcome::IdleTimeout,
            });
        }
        self.registry.commit(self.poll.registry(), &mut self.reaper);
    }

    fn sync_interest(&mut self) {
        let broken = self.registry.sync_interest(self.poll.registry());
        if broken.is_empty() {
            return;
        }
        for token in broken {
            self.registry.defer(Effect::CloseSession {
                token,
                outcome: Outcome::Failed,
            });
        }
        self.registry.commit(self.poll.registry(), &mut self.reaper);
    }
}

fn resolve_listen(listen: &str) -> anyhow::Result<SocketAddr> {
    listen
        .to_socket_addrs()
        .with_context(|| format!("Invalid listen address {}", listen))?
        .next()
        .with_context(|| format!("Listen address {} resolved to nothing", listen))
}
