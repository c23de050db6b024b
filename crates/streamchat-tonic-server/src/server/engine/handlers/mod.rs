//! Call state machines, one variant per RPC shape.
//!
//! Each variant carries its own state enum and implements a single
//! `proceed` transition, invoked once per completed asynchronous operation.
//! A variant that accepts incoming calls spawns and registers a fresh
//! sibling instance upon accepting one, so the server is always listening
//! for new connections of that shape.

mod chat_read;
mod chat_write;
mod greet;
mod list_users;

pub use chat_read::ChatReadHandler;
pub use chat_write::{ChatWriteHandler, WELCOME_TEXT};
pub use greet::GreetHandler;
pub use list_users::ListUsersHandler;

use super::EngineCtx;
use super::ops::Event;
use super::registry::CorrelationId;

/// What the dispatcher should do with a handler after a transition.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Flow {
    /// The handler stays registered and awaits its next completion.
    Continue,
    /// The handler reached its terminal state and unregisters itself.
    Finished,
}

/// Closed set of call state machines, matched explicitly by the dispatcher.
pub enum Handler {
    Greet(GreetHandler),
    ChatRead(ChatReadHandler),
    ChatWrite(ChatWriteHandler),
    ListUsers(ListUsersHandler),
}

impl Handler {
    /// Records the correlation id assigned by the registry. Called exactly
    /// once, before the handler's first transition.
    pub(crate) fn bind(&mut self, id: CorrelationId) {
        match self {
            Handler::Greet(h) => h.bind(id),
            Handler::ChatRead(h) => h.bind(id),
            Handler::ChatWrite(h) => h.bind(id),
            Handler::ListUsers(h) => h.bind(id),
        }
    }

    /// Advances the state machine by one completed operation.
    pub(crate) fn proceed(&mut self, ctx: &mut EngineCtx, event: Event) -> Flow {
        match self {
            Handler::Greet(h) => h.proceed(ctx, event),
            Handler::ChatRead(h) => h.proceed(ctx, event),
            Handler::ChatWrite(h) => h.proceed(ctx, event),
            Handler::ListUsers(h) => h.proceed(ctx, event),
        }
    }

    /// Tears the handler down after a failed operation (peer disconnect or
    /// stream cancellation). No further transitions are invoked.
    pub(crate) fn canceled(self, ctx: &mut EngineCtx) {
        match self {
            Handler::ChatRead(h) => h.canceled(ctx),
            Handler::ChatWrite(h) => h.canceled(ctx),
            // Greeting and list-users calls own no shared state; dropping
            // them releases everything.
            Handler::Greet(_) | Handler::ListUsers(_) => {}
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Handler::Greet(_) => "greet",
            Handler::ChatRead(_) => "chat-read",
            Handler::ChatWrite(_) => "chat-write",
            Handler::ListUsers(_) => "list-users",
        }
    }
}
