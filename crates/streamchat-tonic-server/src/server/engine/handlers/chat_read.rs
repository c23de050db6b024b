//! Read side of a chat stream.
//!
//! Accepts the next incoming chat call, pairs itself with a write handler
//! through the shared session, and then interprets inbound messages:
//! registrations mutate the room directory, chat text fans out to every
//! other session, and an empty-username registration triggers the farewell
//! sequence.

use std::sync::Arc;

use streamchat_tonic_core::proto::{ClientMessage, client_message};
use tokio::sync::Mutex as AsyncMutex;

use super::chat_write::{ChatWriteHandler, WELCOME_TEXT};
use super::{Flow, Handler};
use crate::server::engine::EngineCtx;
use crate::server::engine::calls::{Acceptor, ChatCall, SharedInbound};
use crate::server::engine::ops::{Event, Ops};
use crate::server::engine::registry::CorrelationId;
use crate::server::engine::session::{ChatSession, SharedSession};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ReadState {
    Created,
    AwaitFirstMessage,
    Active,
    /// Farewell requested; waiting for the write side to close the stream.
    Finished,
}

pub struct ChatReadHandler {
    id: CorrelationId,
    state: ReadState,
    ops: Ops,
    acceptor: Acceptor<ChatCall>,
    session: SharedSession,
    inbound: Option<SharedInbound>,
}

impl ChatReadHandler {
    /// Builds a fresh handler with its own session; the paired write handler
    /// is registered during the first transition.
    pub fn new(ops: Ops, acceptor: Acceptor<ChatCall>) -> Self {
        Self {
            id: 0,
            state: ReadState::Created,
            ops,
            acceptor,
            session: ChatSession::shared(),
            inbound: None,
        }
    }

    pub(super) fn bind(&mut self, id: CorrelationId) {
        self.id = id;
    }

    pub fn proceed(&mut self, ctx: &mut EngineCtx, event: Event) -> Flow {
        match (self.state, event) {
            (ReadState::Created, Event::Start) => {
                self.session.lock().read_id = Some(self.id);
                self.ops
                    .accept(self.id, self.acceptor.clone(), Event::ChatAccepted);
                // Pair a write handler against the same session.
                ctx.register(Handler::ChatWrite(ChatWriteHandler::new(
                    self.ops.clone(),
                    Arc::clone(&self.session),
                    ctx.config.session_queue_limit,
                )));
                self.state = ReadState::AwaitFirstMessage;
                Flow::Continue
            }
            (ReadState::AwaitFirstMessage, Event::ChatAccepted(call)) => {
                // Keep a fresh sibling listening for the next chat stream.
                ctx.register(Handler::ChatRead(ChatReadHandler::new(
                    self.ops.clone(),
                    self.acceptor.clone(),
                )));

                let inbound: SharedInbound = Arc::new(AsyncMutex::new(call.inbound));
                self.inbound = Some(Arc::clone(&inbound));
                {
                    let mut session = self.session.lock();
                    session.session_id = Some(self.id);
                    session.outbound = Some(call.outbound);
                }
                self.ops.read(self.id, inbound);

                let write_id = self.session.lock().write_id;
                if let Some(Handler::ChatWrite(writer)) =
                    write_id.and_then(|id| ctx.registry.get_mut(id))
                {
                    writer.post_message(WELCOME_TEXT);
                }
                self.state = ReadState::Active;
                Flow::Continue
            }
            (ReadState::Active, Event::MessageRead(message)) => {
                // Keep listening before interpreting the message just read.
                if let Some(inbound) = &self.inbound {
                    self.ops.read(self.id, Arc::clone(inbound));
                }
                self.interpret(ctx, message)
            }
            // Farewell pending; late messages are ignored.
            (ReadState::Finished, Event::MessageRead(_)) => Flow::Continue,
            _ => unreachable!("chat read handler received a completion it never issued"),
        }
    }

    pub fn canceled(self, ctx: &mut EngineCtx) {
        ctx.release_session(&self.session, false);
    }

    fn interpret(&mut self, ctx: &mut EngineCtx, message: ClientMessage) -> Flow {
        match message.event {
            Some(client_message::Event::Registration(reg)) if !reg.username.is_empty() => {
                self.set_username(ctx, reg.username);
                Flow::Continue
            }
            // Empty username is the logout signal.
            Some(client_message::Event::Registration(_)) => self.logout(ctx),
            Some(client_message::Event::Chat(chat)) => {
                let (in_room, session_id) = {
                    let session = self.session.lock();
                    (session.in_room, session.session_id)
                };
                match (in_room, session_id) {
                    (true, Some(origin)) => ctx.broadcast(origin, &chat.text),
                    // Messages from sessions outside the room are discarded.
                    _ => {}
                }
                Flow::Continue
            }
            None => Flow::Continue,
        }
    }

    /// Registers (or re-registers) this session in the room directory. A new
    /// username for an already-registered session replaces exactly one entry.
    fn set_username(&mut self, ctx: &mut EngineCtx, username: String) {
        let (session_id, write_id, was_in_room) = {
            let session = self.session.lock();
            (session.session_id, session.write_id, session.in_room)
        };
        let Some(session_id) = session_id else {
            return;
        };
        if was_in_room {
            ctx.directory.leave(session_id);
        }
        match write_id {
            Some(target) => {
                {
                    let mut session = self.session.lock();
                    session.username = username.clone();
                    session.in_room = true;
                }
                ctx.directory.enter(username, session_id, target);
            }
            // No writer left to deliver to; remember the name but stay out of
            // the room.
            None => {
                let mut session = self.session.lock();
                session.username = username;
                session.in_room = false;
            }
        }
    }

    fn logout(&mut self, ctx: &mut EngineCtx) -> Flow {
        let write_id = self.session.lock().write_id;
        if let Some(Handler::ChatWrite(writer)) = write_id.and_then(|id| ctx.registry.get_mut(id))
        {
            writer.say_goodbye();
            self.state = ReadState::Finished;
            Flow::Continue
        } else {
            // No writer to say goodbye through; cancel the stream outright.
            ctx.release_session(&self.session, true);
            Flow::Finished
        }
    }
}
