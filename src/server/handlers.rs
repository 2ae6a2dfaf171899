//! State handlers.
//!
//! Each handler is invoked for one ready descriptor, does as much work as
//! the descriptor allows without blocking, and returns. A handler that
//! cannot finish leaves the state unchanged and is simply called again on
//! a later tick. Structural changes (new contexts, closed descriptors, ended
//! sessions) are queued as [`Effect`]s on the [`Tick`].

use bytes::BytesMut;
use mio::Token;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Instant;

use crate::cgi::{self, CgiProcess, Reaper};
use crate::config::ServerConfig;
use crate::http::mime;
use crate::http::response::{Response, ResponseBuilder, StatusCode, SERVER_NAME};
use crate::http::writer::SendList;
use crate::io::transfer::{read_into, Pipe, Transfer};
use crate::proxy::upstream;
use crate::routes::RouteTable;
use crate::server::context::{
    Allocator, Aux, CgiInputContext, ClientContext, Context, Outcome, Role, State,
};
use crate::server::registry::Effect;
use crate::server::resolve::{resolve, Resolution};

/// Upper bound on read rounds per descriptor per tick, so one busy
/// session cannot starve the others.
const MAX_ROUNDS: usize = 16;

/// Bytes requested per read of a body, CGI output or upstream response.
const CHUNK: usize = 16 * 1024;

/// Everything a handler may touch besides its own context.
pub struct Tick<'a> {
    pub routes: &'a RouteTable,
    pub settings: &'a ServerConfig,
    pub ids: &'a mut Allocator,
    pub reaper: &'a mut Reaper,
    pub effects: Vec<Effect>,
    pub now: Instant,
}

impl Tick<'_> {
    fn close_session(&mut self, ctx: &ClientContext, outcome: Outcome) {
        self.effects.push(Effect::CloseSession {
            token: ctx.client_token,
            outcome,
        });
    }
}

/// Routes a ready descriptor to the handler for its context's state.
pub fn dispatch(tick: &mut Tick<'_>, ctx: &mut Context, token: Token, role: Role) {
    match ctx {
        Context::Client(client) => on_client_ready(tick, client, role),
        Context::CgiInput(input) => on_cgi_input_ready(tick, input),
    }
    tracing::trace!(token = token.0, ?role, state = ?ctx.state(), "Dispatched");
}

fn on_client_ready(tick: &mut Tick<'_>, ctx: &mut ClientContext, role: Role) {
    match (ctx.state, role) {
        (State::ReadingRequest, Role::Client) => read_request(tick, ctx),
        (State::ReadingCgiOutput, Role::Aux) => read_cgi_output(tick, ctx),
        (State::WritingProxyRequest, Role::Aux) => write_proxy_request(tick, ctx),
        (State::PipingProxyResponse, _) => pipe_proxy_response(tick, ctx),
        (State::WritingResponse, Role::Client) => write_response(tick, ctx),
        (state, role) => {
            tracing::trace!(?state, ?role, "Ignoring event for idle descriptor");
        }
    }
}

fn read_request(tick: &mut Tick<'_>, ctx: &mut ClientContext) {
    while !ctx.parser.is_head_complete() {
        let mut line = Vec::new();
        match ctx.lines.read_line(&mut ctx.client, &mut line) {
            Transfer::Open => {
                ctx.touch(tick.now);
                if let Err(e) = ctx.parser.feed_line(&line) {
                    tracing::debug!(client = %ctx.peer, error = ?e, "Rejecting request");
                    respond(ctx, Response::error(e.status()));
                    return;
                }
            }
            Transfer::WouldBlock => return,
            Transfer::EndOfInput => {
                tick.close_session(ctx, Outcome::ClientClosed);
                return;
            }
            Transfer::Failed(e) => {
                tracing::debug!(client = %ctx.peer, error = %e, "Client read failed");
                tick.close_session(ctx, Outcome::Failed);
                return;
            }
        }
    }

    // Whatever the line reader pulled in past the head belongs to the body.
    if ctx.lines.buffered() > 0 {
        let rest = ctx.lines.take_buffered();
        ctx.parser.feed_body(&rest);
    }

    while !ctx.parser.is_body_complete() {
        let mut chunk = BytesMut::new();
        let want = ctx.parser.remaining_body().min(CHUNK);
        match read_into(&mut ctx.client, &mut chunk, want) {
            Transfer::Open => {
                ctx.touch(tick.now);
                ctx.parser.feed_body(&chunk);
            }
            Transfer::WouldBlock => return,
            Transfer::EndOfInput => {
                tracing::debug!(
                    client = %ctx.peer,
                    missing = ctx.parser.remaining_body(),
                    "Client closed before sending the full body"
                );
                tick.close_session(ctx, Outcome::ClientClosed);
                return;
            }
            Transfer::Failed(e) => {
                tracing::debug!(client = %ctx.peer, error = %e, "Client read failed");
                tick.close_session(ctx, Outcome::Failed);
                return;
            }
        }
    }

    ctx.state = State::ResolvingRequest;
    resolve_request(tick, ctx);
}

fn resolve_request(tick: &mut Tick<'_>, ctx: &mut ClientContext) {
    let resolution = resolve(ctx.request(), tick.routes);
    tracing::debug!(
        client = %ctx.peer,
        request = %ctx.request_line(),
        ?resolution,
        "Resolved request"
    );

    match resolution {
        Resolution::Static(path) => serve_static(ctx, &path),
        Resolution::Cgi { script, root } => start_cgi(tick, ctx, &script, &root),
        Resolution::Proxy(addr) => start_proxy(tick, ctx, addr),
        Resolution::Error(status) => respond(ctx, Response::error(status)),
    }
}

fn serve_static(ctx: &mut ClientContext, path: &Path) {
    match std::fs::read(path) {
        Ok(body) => {
            let response = ResponseBuilder::new(StatusCode::Ok)
                .header("Content-Type", mime::content_type(path))
                .header("Connection", "close")
                .header("Server", SERVER_NAME)
                .body(body)
                .build();
            respond(ctx, response);
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read static file");
            let status = match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => StatusCode::NotFound,
                _ => StatusCode::InternalServerError,
            };
            respond(ctx, Response::error(status));
        }
    }
}

fn start_cgi(tick: &mut Tick<'_>, ctx: &mut ClientContext, script: &Path, root: &Path) {
    let env = cgi::env::build(root, script, ctx.request(), ctx.peer);
    let feed_stdin = !ctx.request().body.is_empty();

    let CgiProcess {
        child,
        stdin,
        stdout,
    } = match cgi::spawn(script, &env, feed_stdin) {
        Ok(process) => process,
        Err(e) => {
            tracing::warn!(script = %script.display(), error = %e, "Failed to spawn CGI script");
            respond(ctx, Response::internal_error());
            return;
        }
    };

    let token = tick.ids.token();
    ctx.aux = Some(Aux::Cgi {
        stdout,
        token,
        output: BytesMut::new(),
        child: Some(child),
    });
    tick.effects.push(Effect::Attach {
        token,
        context: ctx.id,
    });

    if let Some(stdin) = stdin {
        let input = CgiInputContext::new(
            tick.ids.context(),
            ctx.session,
            stdin,
            tick.ids.token(),
            ctx.request().body.clone(),
            tick.now,
        );
        tick.effects.push(Effect::Append(Context::CgiInput(input)));
    }

    ctx.state = State::ReadingCgiOutput;
}

fn read_cgi_output(tick: &mut Tick<'_>, ctx: &mut ClientContext) {
    let limit = tick.settings.max_body_bytes;
    let Some(Aux::Cgi { stdout, output, .. }) = ctx.aux.as_mut() else {
        return;
    };

    let mut progressed = false;
    let mut outcome = Transfer::WouldBlock;
    for _ in 0..MAX_ROUNDS {
        outcome = read_into(stdout, output, CHUNK);
        if !outcome.is_open() {
            break;
        }
        progressed = true;
        if output.len() > limit {
            outcome = Transfer::Failed(std::io::Error::other("CGI output exceeds body limit"));
            break;
        }
    }

    if progressed {
        ctx.touch(tick.now);
    }

    match outcome {
        Transfer::Open | Transfer::WouldBlock => {}
        Transfer::EndOfInput => {
            let response = match &ctx.aux {
                Some(Aux::Cgi { output, .. }) => cgi::output::translate(output),
                _ => Response::internal_error(),
            };
            if let Some(token) = ctx.aux_token() {
                tick.effects.push(Effect::CloseDescriptor(token));
            }
            respond(ctx, response);
        }
        Transfer::Failed(e) => {
            tracing::warn!(client = %ctx.peer, error = %e, "Reading CGI output failed");
            fail(tick, ctx, StatusCode::InternalServerError);
        }
    }
}

/// Feeds the request body to a CGI script; the pipe is closed once drained
/// so the script sees end of input.
fn on_cgi_input_ready(tick: &mut Tick<'_>, input: &mut CgiInputContext) {
    let before = input.body.written();
    let outcome = input.body.write_all(&mut input.stdin);
    if input.body.written() > before {
        input.last_activity = tick.now;
    }
    match outcome {
        Transfer::Open | Transfer::WouldBlock => {}
        Transfer::EndOfInput => {
            tracing::trace!(written = input.body.written(), "CGI input drained");
            tick.effects.push(Effect::CloseDescriptor(input.token));
        }
        Transfer::Failed(e) => {
            // The script may exit without reading its input.
            tracing::debug!(
                written = input.body.written(),
                error = %e,
                "CGI input closed early"
            );
            tick.effects.push(Effect::CloseDescriptor(input.token));
        }
    }
}

fn start_proxy(tick: &mut Tick<'_>, ctx: &mut ClientContext, addr: SocketAddr) {
    upstream::prepare_request(ctx.parser.request_mut());

    let stream = match upstream::connect(addr) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(upstream = %addr, error = %e, "Upstream connect failed");
            respond(ctx, Response::internal_error());
            return;
        }
    };
    tracing::debug!(client = %ctx.peer, upstream = %addr, "Connecting to upstream");

    let token = tick.ids.token();
    ctx.send = SendList::from_request(ctx.request());
    ctx.aux = Some(Aux::Proxy {
        stream,
        token,
        pipe: Pipe::new(upstream::PIPE_CAPACITY),
    });
    tick.effects.push(Effect::Attach {
        token,
        context: ctx.id,
    });
    ctx.state = State::WritingProxyRequest;
}

fn write_proxy_request(tick: &mut Tick<'_>, ctx: &mut ClientContext) {
    let Some(Aux::Proxy { stream, .. }) = ctx.aux.as_mut() else {
        return;
    };

    let outcome = match upstream::connection_state(stream) {
        Transfer::Open => ctx.send.flush(stream),
        other => other,
    };

    match outcome {
        Transfer::Open => ctx.touch(tick.now),
        Transfer::WouldBlock => {}
        Transfer::EndOfInput => {
            ctx.touch(tick.now);
            ctx.send = SendList::new();
            ctx.state = State::PipingProxyResponse;
        }
        Transfer::Failed(e) => {
            tracing::warn!(client = %ctx.peer, error = %e, "Sending request upstream failed");
            fail(tick, ctx, StatusCode::InternalServerError);
        }
    }
}

fn pipe_proxy_response(tick: &mut Tick<'_>, ctx: &mut ClientContext) {
    let Some(Aux::Proxy { stream, pipe, .. }) = ctx.aux.as_mut() else {
        return;
    };

    let mut outcome = Transfer::WouldBlock;
    let mut progressed = false;
    for _ in 0..MAX_ROUNDS {
        outcome = pipe.pipe_all(stream, &mut ctx.client);
        if !outcome.is_open() {
            break;
        }
        progressed = true;
    }

    let written = pipe.written();
    let sniffed = upstream::sniff_status(pipe.sample());
    ctx.bytes_out = written;
    if ctx.status.is_none() {
        ctx.status = sniffed;
    }
    if progressed {
        ctx.touch(tick.now);
    }

    match outcome {
        Transfer::Open | Transfer::WouldBlock => {}
        Transfer::EndOfInput if written == 0 => {
            tracing::warn!(client = %ctx.peer, "Upstream closed without a response");
            fail(tick, ctx, StatusCode::BadGateway);
        }
        Transfer::EndOfInput => tick.close_session(ctx, Outcome::Completed),
        Transfer::Failed(e) => {
            tracing::warn!(client = %ctx.peer, error = %e, "Proxying response failed");
            fail(tick, ctx, StatusCode::InternalServerError);
        }
    }
}

fn write_response(tick: &mut Tick<'_>, ctx: &mut ClientContext) {
    let outcome = ctx.send.flush(&mut ctx.client);
    ctx.bytes_out = ctx.send.sent();

    match outcome {
        Transfer::Open => ctx.touch(tick.now),
        Transfer::WouldBlock => {}
        Transfer::EndOfInput => tick.close_session(ctx, Outcome::Completed),
        Transfer::Failed(e) => {
            tracing::debug!(client = %ctx.peer, error = %e, "Client write failed");
            tick.close_session(ctx, Outcome::Failed);
        }
    }
}

/// Moves the context to `WritingResponse` with `response` queued.
///
/// For HEAD requests the body is dropped after finalizing, so
/// Content-Length still describes the full resource.
fn respond(ctx: &mut ClientContext, mut response: Response) {
    response.finalize();
    if ctx.request().is_head() {
        response.strip_body();
    }

    ctx.status = Some(response.status_code());
    ctx.response = response;
    ctx.send = SendList::from_response(&mut ctx.response);
    ctx.state = State::WritingResponse;
}

/// Degrades to an error page while nothing has reached the client yet,
/// otherwise ends the session.
fn fail(tick: &mut Tick<'_>, ctx: &mut ClientContext, status: StatusCode) {
    if ctx.bytes_out > 0 {
        tick.close_session(ctx, Outcome::Failed);
        return;
    }

    if let Some(child) = ctx.aux.as_mut().and_then(Aux::take_child) {
        tick.reaper.terminate(child);
    }
    if let Some(token) = ctx.aux_token() {
        tick.effects.push(Effect::CloseDescriptor(token));
    }
    respond(ctx, Response::error(status));
}
