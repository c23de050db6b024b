//! Server-streamed greeting calls.
//!
//! Replies `"Hello, <name> (<n>)"` exactly `max(1, num_greetings)` times,
//! pausing `pause_milliseconds` before every reply except the first. The
//! final reply closes the stream with OK status.

use core::time::Duration;

use super::{Flow, Handler};
use crate::server::engine::EngineCtx;
use crate::server::engine::calls::{Acceptor, GreetCall};
use crate::server::engine::ops::{Event, Ops};
use crate::server::engine::registry::CorrelationId;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum GreetState {
    Created,
    AwaitRequest,
    Replying,
    TimerElapsed,
    Finished,
}

pub struct GreetHandler {
    id: CorrelationId,
    state: GreetState,
    ops: Ops,
    acceptor: Acceptor<GreetCall>,
    call: Option<GreetCall>,
    /// 1-indexed number of the next reply to produce.
    next_reply: u32,
}

impl GreetHandler {
    pub fn new(ops: Ops, acceptor: Acceptor<GreetCall>) -> Self {
        Self {
            id: 0,
            state: GreetState::Created,
            ops,
            acceptor,
            call: None,
            next_reply: 0,
        }
    }

    pub(super) fn bind(&mut self, id: CorrelationId) {
        self.id = id;
    }

    pub fn proceed(&mut self, ctx: &mut EngineCtx, event: Event) -> Flow {
        match (self.state, event) {
            (GreetState::Created, Event::Start) => {
                self.ops
                    .accept(self.id, self.acceptor.clone(), Event::GreetAccepted);
                self.state = GreetState::AwaitRequest;
                Flow::Continue
            }
            (GreetState::AwaitRequest, Event::GreetAccepted(call)) => {
                // Keep a fresh sibling listening for the next SayHello call.
                ctx.register(Handler::Greet(GreetHandler::new(
                    self.ops.clone(),
                    self.acceptor.clone(),
                )));
                self.call = Some(call);
                self.next_reply = 1;
                self.write_reply();
                Flow::Continue
            }
            (GreetState::Replying, Event::WriteFlushed) => {
                let pause = self.pause_millis();
                if pause > 0 {
                    // Pacing applies before every reply except the first.
                    self.state = GreetState::TimerElapsed;
                    self.ops.timer(self.id, Duration::from_millis(u64::from(pause)));
                } else {
                    self.write_reply();
                }
                Flow::Continue
            }
            (GreetState::TimerElapsed, Event::TimerFired) => {
                self.write_reply();
                Flow::Continue
            }
            (GreetState::Finished, Event::WriteFlushed) => Flow::Finished,
            _ => unreachable!("greeting stream handler received a completion it never issued"),
        }
    }

    fn pause_millis(&self) -> u32 {
        self.call
            .as_ref()
            .map(|call| call.request.pause_milliseconds)
            .unwrap_or(0)
    }

    /// Composes and flushes the next reply; the reply numbered
    /// `num_greetings` (or the very first, if `num_greetings <= 1`) is final.
    fn write_reply(&mut self) {
        let n = self.next_reply;
        self.next_reply += 1;
        let (message, last, reply_tx) = {
            let Some(call) = &self.call else {
                unreachable!("greeting reply without an accepted call")
            };
            (
                format!("Hello, {} ({})", call.request.name, n),
                call.request.num_greetings <= n,
                call.reply_tx.clone(),
            )
        };
        self.state = if last {
            GreetState::Finished
        } else {
            GreetState::Replying
        };
        self.ops.send_greeting(self.id, reply_tx, message);
    }
}
