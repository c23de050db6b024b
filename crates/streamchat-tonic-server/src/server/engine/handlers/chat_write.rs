//! Write side of a chat stream.
//!
//! Owns the per-session outbound FIFO. At most one write is outstanding per
//! session at any instant; everything else queues behind it. The read side
//! drives the protocol: this handler issues no I/O until asked to send a
//! welcome, a relayed broadcast, or a farewell.

use std::collections::VecDeque;

use super::Flow;
use crate::server::engine::EngineCtx;
use crate::server::engine::ops::{Event, Ops};
use crate::server::engine::registry::CorrelationId;
use crate::server::engine::session::SharedSession;

pub const WELCOME_TEXT: &str = "Welcome to the chat!";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum WriteState {
    Created,
    Idle,
    Writing,
    Finished,
}

pub struct ChatWriteHandler {
    id: CorrelationId,
    state: WriteState,
    ops: Ops,
    session: SharedSession,
    queue: VecDeque<String>,
    queue_limit: usize,
    /// Once a farewell has been requested, no further application messages
    /// go out.
    goodbye: bool,
}

impl ChatWriteHandler {
    pub fn new(ops: Ops, session: SharedSession, queue_limit: usize) -> Self {
        Self {
            id: 0,
            state: WriteState::Created,
            ops,
            session,
            queue: VecDeque::new(),
            queue_limit,
            goodbye: false,
        }
    }

    pub(super) fn bind(&mut self, id: CorrelationId) {
        self.id = id;
    }

    pub fn proceed(&mut self, ctx: &mut EngineCtx, event: Event) -> Flow {
        match (self.state, event) {
            (WriteState::Created, Event::Start) => {
                self.session.lock().write_id = Some(self.id);
                self.state = WriteState::Idle;
                Flow::Continue
            }
            (WriteState::Writing, Event::WriteFlushed) => {
                self.state = WriteState::Idle;
                if let Some(text) = self.queue.pop_front() {
                    let last = self.queue.is_empty() && self.goodbye;
                    self.write(text, last);
                }
                Flow::Continue
            }
            (WriteState::Finished, Event::WriteFlushed) => {
                // The finishing write completed; the session goes with it.
                ctx.release_session(&self.session, false);
                Flow::Finished
            }
            _ => unreachable!("chat write handler received a completion it never issued"),
        }
    }

    pub fn canceled(self, ctx: &mut EngineCtx) {
        ctx.release_session(&self.session, false);
    }

    /// Sends or queues one outbound message (welcome text or relayed chat).
    pub fn post_message(&mut self, text: &str) {
        if self.goodbye {
            return;
        }
        match self.state {
            WriteState::Idle => self.write(text.to_owned(), false),
            WriteState::Writing => self.enqueue(text.to_owned()),
            WriteState::Created | WriteState::Finished => {}
        }
    }

    /// Requests the farewell sequence: compose the farewell text, send it as
    /// the last message, and finish the stream with OK status. While a write
    /// is in flight the farewell becomes the final queue item.
    pub fn say_goodbye(&mut self) {
        if self.goodbye {
            return;
        }
        match self.state {
            WriteState::Idle => {
                self.goodbye = true;
                let text = self.farewell_text();
                self.write(text, true);
            }
            WriteState::Writing => {
                self.goodbye = true;
                // The farewell skips the queue cap; it must not be dropped.
                let text = self.farewell_text();
                self.queue.push_back(text);
            }
            WriteState::Created | WriteState::Finished => {}
        }
    }

    fn farewell_text(&self) -> String {
        format!("Good bye, {}.", self.session.lock().username)
    }

    fn enqueue(&mut self, text: String) {
        if self.queue.len() >= self.queue_limit {
            tracing::warn!(id = self.id, "outbound queue full, dropping chat message");
            return;
        }
        self.queue.push_back(text);
    }

    fn write(&mut self, text: String, last: bool) {
        assert_eq!(
            self.state,
            WriteState::Idle,
            "chat write issued while another is in flight"
        );
        let outbound = {
            let mut session = self.session.lock();
            if last {
                session.outbound.take()
            } else {
                session.outbound.clone()
            }
        };
        self.state = if last {
            WriteState::Finished
        } else {
            WriteState::Writing
        };
        match outbound {
            Some(outbound) => self.ops.send_chat(self.id, outbound, text),
            // Stream already gone; fail the write so teardown runs.
            None => self.ops.abort(self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::ServerConfig;
    use crate::server::engine::handlers::Handler;
    use crate::server::engine::ops::Completion;
    use crate::server::engine::session::ChatSession;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_ctx() -> (EngineCtx, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EngineCtx::new(Ops::new(tx), ServerConfig::test_default()), rx)
    }

    /// Replays one completion through the registry the way the dispatcher
    /// does.
    fn pump(ctx: &mut EngineCtx, completion: Completion) -> Flow {
        let mut handler = ctx.registry.take(completion.id).expect("handler registered");
        let flow = handler.proceed(ctx, completion.event.expect("successful completion"));
        if flow == Flow::Continue {
            ctx.registry.restore(completion.id, handler);
        }
        flow
    }

    fn writer(ctx: &mut EngineCtx, id: u64) -> &mut ChatWriteHandler {
        match ctx.registry.get_mut(id) {
            Some(Handler::ChatWrite(writer)) => writer,
            _ => panic!("write handler not registered"),
        }
    }

    #[tokio::test]
    async fn writes_are_serialized_through_the_fifo() {
        let (mut ctx, mut completions) = test_ctx();
        let session = ChatSession::shared();
        let (out_tx, mut out_rx) = mpsc::channel(8);
        session.lock().outbound = Some(out_tx);

        let ops = ctx.ops.clone();
        let id = ctx.register(Handler::ChatWrite(ChatWriteHandler::new(
            ops,
            Arc::clone(&session),
            8,
        )));

        let w = writer(&mut ctx, id);
        w.post_message("one");
        w.post_message("two");
        w.post_message("three");

        // Only the first write goes out; the rest wait behind it.
        assert_eq!(out_rx.recv().await.unwrap().unwrap().text, "one");
        assert!(out_rx.try_recv().is_err());

        let flushed = completions.recv().await.unwrap();
        assert_eq!(pump(&mut ctx, flushed), Flow::Continue);
        assert_eq!(out_rx.recv().await.unwrap().unwrap().text, "two");

        let flushed = completions.recv().await.unwrap();
        assert_eq!(pump(&mut ctx, flushed), Flow::Continue);
        assert_eq!(out_rx.recv().await.unwrap().unwrap().text, "three");
    }

    #[tokio::test]
    async fn goodbye_while_writing_becomes_the_final_message() {
        let (mut ctx, mut completions) = test_ctx();
        let session = ChatSession::shared();
        let (out_tx, mut out_rx) = mpsc::channel(8);
        {
            let mut s = session.lock();
            s.outbound = Some(out_tx);
            s.username = "alice".into();
        }

        let ops = ctx.ops.clone();
        let id = ctx.register(Handler::ChatWrite(ChatWriteHandler::new(
            ops,
            Arc::clone(&session),
            8,
        )));

        let w = writer(&mut ctx, id);
        w.post_message("hi");
        w.say_goodbye();
        // Application messages after a requested farewell are suppressed.
        w.post_message("never sent");

        assert_eq!(out_rx.recv().await.unwrap().unwrap().text, "hi");
        let flushed = completions.recv().await.unwrap();
        assert_eq!(pump(&mut ctx, flushed), Flow::Continue);

        assert_eq!(out_rx.recv().await.unwrap().unwrap().text, "Good bye, alice.");
        let flushed = completions.recv().await.unwrap();
        assert_eq!(pump(&mut ctx, flushed), Flow::Finished);

        // The session's sender was taken for the final write, so the stream
        // is now closed.
        assert!(out_rx.recv().await.is_none());
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn overflowing_queue_drops_the_newest_message() {
        let (mut ctx, mut completions) = test_ctx();
        let session = ChatSession::shared();
        let (out_tx, mut out_rx) = mpsc::channel(8);
        session.lock().outbound = Some(out_tx);

        let ops = ctx.ops.clone();
        let id = ctx.register(Handler::ChatWrite(ChatWriteHandler::new(
            ops,
            Arc::clone(&session),
            2,
        )));

        let w = writer(&mut ctx, id);
        w.post_message("a");
        w.post_message("b");
        w.post_message("c");
        w.post_message("dropped");

        let mut delivered = Vec::new();
        delivered.push(out_rx.recv().await.unwrap().unwrap().text);
        for _ in 0..2 {
            let flushed = completions.recv().await.unwrap();
            pump(&mut ctx, flushed);
            delivered.push(out_rx.recv().await.unwrap().unwrap().text);
        }
        assert_eq!(delivered, ["a", "b", "c"]);

        // Back to idle with nothing left queued.
        let flushed = completions.recv().await.unwrap();
        assert_eq!(pump(&mut ctx, flushed), Flow::Continue);
        assert!(out_rx.try_recv().is_err());
    }
}
