//! Per-connection state records driven by the dispatcher.
//!
//! A client session is one [`ClientContext`]. While a CGI script consumes a
//! request body, the session also owns a sibling [`CgiInputContext`] that
//! shares its [`SessionId`], so tearing the session down finds and closes
//! both.

use bytes::BytesMut;
use mio::event::Source;
use mio::net::TcpStream;
use mio::unix::pipe;
use mio::{Interest, Token};
use std::net::SocketAddr;
use std::process::Child;
use std::time::Instant;

use crate::http::parser::{ParserLimits, RequestParser};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::SendList;
use crate::io::line_reader::LineReader;
use crate::io::transfer::{Pipe, WriteCursor};

/// Stable identity of a context; ordering follows creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u64);

/// Shared by every context belonging to one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

/// What a context is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    ReadingRequest,
    /// Transient: resolution runs inline once the request is parsed.
    ResolvingRequest,
    ReadingCgiOutput,
    WritingCgiInput,
    WritingProxyRequest,
    PipingProxyResponse,
    WritingResponse,
}

/// How a session ended, for the access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    ClientClosed,
    Failed,
    IdleTimeout,
    Shutdown,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::ClientClosed => "client_closed",
            Outcome::Failed => "failed",
            Outcome::IdleTimeout => "idle_timeout",
            Outcome::Shutdown => "shutdown",
        }
    }
}

/// Which descriptor of a context an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Aux,
    CgiInput,
}

/// Hands out tokens and ids; never reuses one.
#[derive(Debug)]
pub struct Allocator {
    next_token: usize,
    next_context: u64,
    next_session: u64,
}

impl Allocator {
    /// Tokens below `first_token` are reserved by the caller.
    pub fn new(first_token: usize) -> Self {
        Self {
            next_token: first_token,
            next_context: 0,
            next_session: 0,
        }
    }

    pub fn token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    pub fn context(&mut self) -> ContextId {
        self.next_context += 1;
        ContextId(self.next_context)
    }

    pub fn session(&mut self) -> SessionId {
        self.next_session += 1;
        SessionId(self.next_session)
    }
}

/// The descriptor a client session drives besides its socket.
pub enum Aux {
    Cgi {
        stdout: pipe::Receiver,
        token: Token,
        output: BytesMut,
        child: Option<Child>,
    },
    Proxy {
        stream: TcpStream,
        token: Token,
        pipe: Pipe,
    },
}

impl Aux {
    pub fn token(&self) -> Token {
        match self {
            Aux::Cgi { token, .. } | Aux::Proxy { token, .. } => *token,
        }
    }

    pub fn source_mut(&mut self) -> &mut dyn Source {
        match self {
            Aux::Cgi { stdout, .. } => stdout as &mut dyn Source,
            Aux::Proxy { stream, .. } => stream as &mut dyn Source,
        }
    }

    pub fn take_child(&mut self) -> Option<Child> {
        match self {
            Aux::Cgi { child, .. } => child.take(),
            Aux::Proxy { .. } => None,
        }
    }
}

pub struct ClientContext {
    pub id: ContextId,
    pub session: SessionId,
    pub state: State,
    pub peer: SocketAddr,
    pub client: TcpStream,
    pub client_token: Token,
    pub aux: Option<Aux>,
    pub lines: LineReader,
    pub parser: RequestParser,
    pub response: Response,
    pub send: SendList,
    /// Final status, once known
    pub status: Option<u16>,
    /// Bytes delivered to the client
    pub bytes_out: usize,
    pub started: Instant,
    pub last_activity: Instant,
}

impl ClientContext {
    pub fn new(
        id: ContextId,
        session: SessionId,
        client: TcpStream,
        client_token: Token,
        peer: SocketAddr,
        limits: ParserLimits,
        now: Instant,
    ) -> Self {
        Self {
            id,
            session,
            state: State::ReadingRequest,
            peer,
            client,
            client_token,
            aux: None,
            lines: LineReader::default(),
            parser: RequestParser::new(limits),
            response: Response::new(),
            send: SendList::new(),
            status: None,
            bytes_out: 0,
            started: now,
            last_activity: now,
        }
    }

    pub fn request(&self) -> &Request {
        self.parser.request()
    }

    pub fn aux_token(&self) -> Option<Token> {
        self.aux.as_ref().map(Aux::token)
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// The request line for logging, `-` if none arrived.
    pub fn request_line(&self) -> String {
        let request = self.request();
        if request.method.is_empty() && request.uri.is_empty() {
            "-".to_string()
        } else {
            request.request_line()
        }
    }

    /// Interest per owned descriptor, derived from the current state.
    pub fn interests(&self) -> Vec<(Token, Option<Interest>)> {
        let client = match (self.state, &self.aux) {
            (State::ReadingRequest, _) => Some(Interest::READABLE),
            (State::WritingResponse, _) => Some(Interest::WRITABLE),
            (State::PipingProxyResponse, Some(Aux::Proxy { pipe, .. })) if pipe.wants_write() => {
                Some(Interest::WRITABLE)
            }
            _ => None,
        };

        let mut interests = vec![(self.client_token, client)];

        if let Some(aux) = &self.aux {
            let wanted = match (self.state, aux) {
                (State::ReadingCgiOutput, Aux::Cgi { .. }) => Some(Interest::READABLE),
                (State::WritingProxyRequest, Aux::Proxy { .. }) => Some(Interest::WRITABLE),
                (State::PipingProxyResponse, Aux::Proxy { pipe, .. }) if pipe.wants_read() => {
                    Some(Interest::READABLE)
                }
                _ => None,
            };
            interests.push((aux.token(), wanted));
        }

        interests
    }
}

/// Feeds a request body to a CGI script's stdin, then closes it.
pub struct CgiInputContext {
    pub id: ContextId,
    pub session: SessionId,
    pub stdin: pipe::Sender,
    pub token: Token,
    pub body: WriteCursor,
    pub last_activity: Instant,
}

impl CgiInputContext {
    pub fn new(
        id: ContextId,
        session: SessionId,
        stdin: pipe::Sender,
        token: Token,
        body: Vec<u8>,
        now: Instant,
    ) -> Self {
        Self {
            id,
            session,
            stdin,
            token,
            body: WriteCursor::new(body),
            last_activity: now,
        }
    }
}

pub enum Context {
    Client(Box<ClientContext>),
    CgiInput(CgiInputContext),
}

impl Context {
    pub fn id(&self) -> ContextId {
        match self {
            Context::Client(ctx) => ctx.id,
            Context::CgiInput(ctx) => ctx.id,
        }
    }

    pub fn session(&self) -> SessionId {
        match self {
            Context::Client(ctx) => ctx.session,
            Context::CgiInput(ctx) => ctx.session,
        }
    }

    pub fn last_activity(&self) -> Instant {
        match self {
            Context::Client(ctx) => ctx.last_activity,
            Context::CgiInput(ctx) => ctx.last_activity,
        }
    }

    pub fn state(&self) -> State {
        match self {
            Context::Client(ctx) => ctx.state,
            Context::CgiInput(_) => State::WritingCgiInput,
        }
    }

    /// Every descriptor this context owns, client first.
    pub fn tokens(&self) -> Vec<Token> {
        match self {
            Context::Client(ctx) => std::iter::once(ctx.client_token)
                .chain(ctx.aux_token())
                .collect(),
            Context::CgiInput(ctx) => vec![ctx.token],
        }
    }

    pub fn role(&self, token: Token) -> Option<Role> {
        match self {
            Context::Client(ctx) if ctx.client_token == token => Some(Role::Client),
            Context::Client(ctx) if ctx.aux_token() == Some(token) => Some(Role::Aux),
            Context::CgiInput(ctx) if ctx.token == token => Some(Role::CgiInput),
            _ => None,
        }
    }

    pub fn interests(&self) -> Vec<(Token, Option<Interest>)> {
        match self {
            Context::Client(ctx) => ctx.interests(),
            Context::CgiInput(ctx) => vec![(ctx.token, Some(Interest::WRITABLE))],
        }
    }

    pub fn source_mut(&mut self, token: Token) -> Option<&mut dyn Source> {
        match self {
            Context::Client(ctx) => {
                let ctx = &mut **ctx;
                if ctx.client_token == token {
                    Some(&mut ctx.client as &mut dyn Source)
                } else {
                    ctx.aux
                        .as_mut()
                        .filter(|aux| aux.token() == token)
                        .map(Aux::source_mut)
                }
            }
            Context::CgiInput(ctx) if ctx.token == token => Some(&mut ctx.stdin as &mut dyn Source),
            Context::CgiInput(_) => None,
        }
    }
}
