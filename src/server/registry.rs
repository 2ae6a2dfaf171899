//! The collection of in-flight contexts.
//!
//! Contexts live in a `BTreeMap` keyed by a monotonically increasing
//! [`ContextId`], so iteration follows creation order and ids stay valid
//! across removals. Every descriptor's token maps back to its owner.
//!
//! Handlers never change the collection directly. They queue [`Effect`]s,
//! which are applied by [`commit`](Registry::commit) at the end of the tick;
//! contexts scheduled for removal are skipped for the rest of that tick.

use mio::{Interest, Token};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::cgi::Reaper;
use crate::server::access_log;
use crate::server::context::{Context, ContextId, Outcome, Role, SessionId};

/// A structural change requested by a handler.
pub enum Effect {
    /// Register a new context.
    Append(Context),
    /// A context gained a descriptor.
    Attach { token: Token, context: ContextId },
    /// Close one descriptor's role, leaving the rest of its session alive.
    CloseDescriptor(Token),
    /// Close the whole session owning this client descriptor.
    CloseSession { token: Token, outcome: Outcome },
}

#[derive(Default)]
pub struct Registry {
    contexts: BTreeMap<ContextId, Context>,
    tokens: HashMap<Token, ContextId>,
    registered: HashMap<Token, Interest>,
    pending: Vec<Effect>,
    doomed: HashSet<ContextId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Appends a context and indexes its descriptors.
    pub fn push(&mut self, ctx: Context) -> ContextId {
        let id = ctx.id();
        for token in ctx.tokens() {
            self.tokens.insert(token, id);
        }
        self.contexts.insert(id, ctx);
        id
    }

    /// Ids in registry order.
    pub fn ids(&self) -> Vec<ContextId> {
        self.contexts.keys().copied().collect()
    }

    pub fn get(&self, id: ContextId) -> Option<&Context> {
        self.contexts.get(&id)
    }

    pub fn get_mut(&mut self, id: ContextId) -> Option<&mut Context> {
        self.contexts.get_mut(&id)
    }

    /// The context owning a descriptor, and the descriptor's role in it.
    pub fn find(&self, token: Token) -> Option<(ContextId, Role)> {
        let id = *self.tokens.get(&token)?;
        let role = self.contexts.get(&id)?.role(token)?;
        Some((id, role))
    }

    pub fn tokens_of(&self, id: ContextId) -> Vec<Token> {
        self.contexts.get(&id).map(Context::tokens).unwrap_or_default()
    }

    /// Scheduled for removal at the end of this tick.
    pub fn is_doomed(&self, id: ContextId) -> bool {
        self.doomed.contains(&id)
    }

    pub fn is_registered(&self, token: Token) -> bool {
        self.registered.contains_key(&token)
    }

    /// Queues an effect for [`commit`](Registry::commit).
    pub fn defer(&mut self, effect: Effect) {
        match &effect {
            Effect::CloseSession { token, .. } => {
                if let Some(session) = self.session_of(*token) {
                    let members: Vec<ContextId> = self.members(session);
                    self.doomed.extend(members);
                }
            }
            Effect::CloseDescriptor(token) => {
                if let Some((id, Role::Client | Role::CgiInput)) = self.find(*token) {
                    match self.contexts.get(&id) {
                        Some(Context::Client(ctx)) => {
                            let members = self.members(ctx.session);
                            self.doomed.extend(members);
                        }
                        _ => {
                            self.doomed.insert(id);
                        }
                    }
                }
            }
            Effect::Append(_) | Effect::Attach { .. } => {}
        }
        self.pending.push(effect);
    }

    pub fn defer_all(&mut self, effects: impl IntoIterator<Item = Effect>) {
        for effect in effects {
            self.defer(effect);
        }
    }

    /// Applies every queued effect, in the order queued.
    pub fn commit(&mut self, poll: &mio::Registry, reaper: &mut Reaper) {
        for effect in std::mem::take(&mut self.pending) {
            match effect {
                Effect::Append(ctx) => {
                    self.push(ctx);
                }
                Effect::Attach { token, context } => {
                    if self.contexts.contains_key(&context) {
                        self.tokens.insert(token, context);
                    }
                }
                Effect::CloseDescriptor(token) => self.remove_by_descriptor(token, poll, reaper),
                Effect::CloseSession { token, outcome } => {
                    self.remove_by_client(token, outcome, poll, reaper)
                }
            }
        }
        self.doomed.clear();
    }

    /// Brings every descriptor's registration in line with its context's state.
    ///
    /// Descriptors are reregistered every tick even when their interest is
    /// unchanged: this re-arms mio's edge-triggered sources, so a descriptor
    /// that is still ready is reported again. Returns the client tokens of
    /// sessions whose descriptors could not be registered.
    pub fn sync_interest(&mut self, poll: &mio::Registry) -> Vec<Token> {
        let mut broken = Vec::new();

        for ctx in self.contexts.values_mut() {
            for (token, wanted) in ctx.interests() {
                let Some(source) = ctx.source_mut(token) else {
                    continue;
                };

                let result = match (self.registered.contains_key(&token), wanted) {
                    (false, Some(interest)) => poll.register(source, token, interest),
                    (true, Some(interest)) => poll.reregister(source, token, interest),
                    (true, None) => poll.deregister(source),
                    (false, None) => Ok(()),
                };

                match (result, wanted) {
                    (Ok(()), Some(interest)) => {
                        self.registered.insert(token, interest);
                    }
                    (Ok(()), None) => {
                        self.registered.remove(&token);
                    }
                    (Err(e), _) => {
                        tracing::warn!(token = token.0, error = %e, "Failed to register descriptor");
                        if let Some(client) = ctx.tokens().first() {
                            broken.push(*client);
                        }
                    }
                }
            }
        }

        broken
    }

    /// Terminates the session owning `token`: every context sharing its
    /// session is removed and every descriptor they own is closed.
    pub fn remove_by_client(&mut self, token: Token, outcome: Outcome, poll: &mio::Registry, reaper: &mut Reaper) {
        let Some(session) = self.session_of(token) else {
            return;
        };

        for id in self.members(session) {
            if let Some(ctx) = self.contexts.remove(&id) {
                self.release(ctx, outcome, poll, reaper);
            }
        }
    }

    /// Terminates only the role `token` plays.
    ///
    /// A client descriptor ends its whole session; an auxiliary descriptor
    /// (CGI stdout, upstream socket) is closed and detached from its
    /// context; a CGI input descriptor takes its context with it.
    pub fn remove_by_descriptor(&mut self, token: Token, poll: &mio::Registry, reaper: &mut Reaper) {
        let Some((id, role)) = self.find(token) else {
            return;
        };

        match role {
            Role::Client => self.remove_by_client(token, Outcome::Completed, poll, reaper),
            Role::Aux => {
                if let Some(Context::Client(ctx)) = self.contexts.get_mut(&id) {
                    if let Some(mut aux) = ctx.aux.take() {
                        deregister(&mut self.registered, poll, token, aux.source_mut());
                        self.tokens.remove(&token);
                        if let Some(child) = aux.take_child() {
                            reaper.adopt(child);
                        }
                        tracing::trace!(token = token.0, "Closed auxiliary descriptor");
                    }
                }
            }
            Role::CgiInput => {
                if let Some(ctx) = self.contexts.remove(&id) {
                    self.release(ctx, Outcome::Completed, poll, reaper);
                }
            }
        }
    }

    /// Client tokens of sessions idle for longer than `timeout`.
    ///
    /// A session is as recent as its most recently active member.
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<Token> {
        let mut latest: HashMap<SessionId, Instant> = HashMap::new();
        for ctx in self.contexts.values() {
            let at = latest.entry(ctx.session()).or_insert(ctx.last_activity());
            *at = (*at).max(ctx.last_activity());
        }

        self.contexts
            .values()
            .filter_map(|ctx| match ctx {
                Context::Client(client) => {
                    let last = latest.get(&client.session).copied().unwrap_or(client.last_activity);
                    (now.duration_since(last) > timeout).then_some(client.client_token)
                }
                Context::CgiInput(_) => None,
            })
            .collect()
    }

    /// Ends every session, e.g. on shutdown.
    pub fn close_all(&mut self, outcome: Outcome, poll: &mio::Registry, reaper: &mut Reaper) {
        for (_, ctx) in std::mem::take(&mut self.contexts) {
            self.release(ctx, outcome, poll, reaper);
        }
        self.pending.clear();
        self.doomed.clear();
    }

    fn session_of(&self, token: Token) -> Option<SessionId> {
        let id = self.tokens.get(&token)?;
        self.contexts.get(id).map(Context::session)
    }

    fn members(&self, session: SessionId) -> Vec<ContextId> {
        self.contexts
            .iter()
            .filter(|(_, ctx)| ctx.session() == session)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Closes everything a removed context owns.
    fn release(&mut self, mut ctx: Context, outcome: Outcome, poll: &mio::Registry, reaper: &mut Reaper) {
        for token in ctx.tokens() {
            self.tokens.remove(&token);
            if let Some(source) = ctx.source_mut(token) {
                deregister(&mut self.registered, poll, token, source);
            }
        }

        match ctx {
            Context::Client(mut client) => {
                if let Some(child) = client.aux.as_mut().and_then(|aux| aux.take_child()) {
                    reaper.terminate(child);
                }
                access_log::record(&client, outcome);
            }
            Context::CgiInput(input) => {
                tracing::trace!(
                    token = input.token.0,
                    written = input.body.written(),
                    "Closed CGI input"
                );
            }
        }
    }
}

fn deregister(
    registered: &mut HashMap<Token, Interest>,
    poll: &mio::Registry,
    token: Token,
    source: &mut dyn mio::event::Source,
) {
    if registered.remove(&token).is_some() {
        if let Err(e) = poll.deregister(source) {
            tracing::trace!(token = token.0, error = %e, "Deregister failed");
        }
    }
}
