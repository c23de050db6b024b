//! Asynchronous operations and their completions.
//!
//! Every suspension point of the engine - accepting the next call, reading
//! one inbound message, flushing one outbound write, a pacing timer, a unary
//! response - is issued through [`Ops`] as a spawned task that posts exactly
//! one [`Completion`] tagged with the issuing handler's correlation id. The
//! dispatch loop resolves the tag and drives the owning state machine's next
//! transition.
//!
//! A completion carrying `None` means the operation could not complete (peer
//! disconnected, stream canceled, or the queue closed); the owning handler
//! can make no further progress and is torn down.

use core::time::Duration;
use futures::StreamExt;
use streamchat_tonic_core::proto::{
    ClientMessage, HelloReply, ListUsersResponse, ServerMessage,
};
use tokio::sync::{mpsc, oneshot};
use tonic::Status;

use super::calls::{Acceptor, ChatCall, GreetCall, ListUsersCall, SharedInbound};
use super::registry::CorrelationId;
use super::session::OutboundSender;

/// What a completed operation produced.
///
/// Timer completions enter through the same dispatch path as I/O
/// completions; the handler tells them apart by the sub-state that issued
/// the operation.
pub enum Event {
    /// Synthetic event driving a freshly registered handler out of its
    /// initial state.
    Start,
    GreetAccepted(GreetCall),
    ChatAccepted(ChatCall),
    ListUsersAccepted(ListUsersCall),
    MessageRead(ClientMessage),
    WriteFlushed,
    TimerFired,
}

/// One completed asynchronous operation, resolved by correlation id.
pub struct Completion {
    pub id: CorrelationId,
    /// `None` when the operation failed and the handler cannot progress.
    pub event: Option<Event>,
}

/// Issues asynchronous operations on behalf of call handlers.
///
/// Cheap to clone; every handler holds one.
#[derive(Clone)]
pub struct Ops {
    completions: mpsc::UnboundedSender<Completion>,
}

impl Ops {
    pub fn new(completions: mpsc::UnboundedSender<Completion>) -> Self {
        Self { completions }
    }

    fn post(&self, id: CorrelationId, event: Option<Event>) {
        if self.completions.send(Completion { id, event }).is_err() {
            tracing::trace!(id, "dispatch loop is gone, dropping completion");
        }
    }

    /// Posts a failed completion for `id`, as if an operation had been issued
    /// and could not complete. Used when a write is requested but the stream
    /// is already gone.
    pub fn abort(&self, id: CorrelationId) {
        self.post(id, None);
    }

    /// Waits for the next incoming call of one RPC shape.
    pub fn accept<T: Send + 'static>(
        &self,
        id: CorrelationId,
        acceptor: Acceptor<T>,
        into_event: fn(T) -> Event,
    ) {
        let ops = self.clone();
        tokio::spawn(async move {
            match acceptor.accept().await {
                Some(call) => ops.post(id, Some(into_event(call))),
                None => ops.post(id, None),
            }
        });
    }

    /// Reads one message from a chat call's inbound stream.
    pub fn read(&self, id: CorrelationId, inbound: SharedInbound) {
        let ops = self.clone();
        tokio::spawn(async move {
            let next = inbound.lock().await.next().await;
            match next {
                Some(Ok(message)) => ops.post(id, Some(Event::MessageRead(message))),
                Some(Err(_)) | None => ops.post(id, None),
            }
        });
    }

    /// Flushes one greeting down a `SayHello` reply stream.
    pub fn send_greeting(
        &self,
        id: CorrelationId,
        reply_tx: mpsc::Sender<Result<HelloReply, Status>>,
        message: String,
    ) {
        let ops = self.clone();
        tokio::spawn(async move {
            match reply_tx.send(Ok(HelloReply { message })).await {
                Ok(()) => ops.post(id, Some(Event::WriteFlushed)),
                Err(_) => ops.post(id, None),
            }
        });
    }

    /// Flushes one message down a chat call's response stream. For the final
    /// write the caller passes the session's own sender (not a clone) so the
    /// stream closes with OK once the write completes.
    pub fn send_chat(&self, id: CorrelationId, outbound: OutboundSender, text: String) {
        let ops = self.clone();
        tokio::spawn(async move {
            match outbound.send(Ok(ServerMessage { text })).await {
                Ok(()) => ops.post(id, Some(Event::WriteFlushed)),
                Err(_) => ops.post(id, None),
            }
        });
    }

    /// Schedules a pacing timer. Cannot be revoked once issued; it simply
    /// fires and its completion is handled as a normal transition.
    pub fn timer(&self, id: CorrelationId, delay: Duration) {
        let ops = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            ops.post(id, Some(Event::TimerFired));
        });
    }

    /// Completes a unary `ListUsers` call.
    pub fn respond_users(
        &self,
        id: CorrelationId,
        reply_tx: oneshot::Sender<ListUsersResponse>,
        response: ListUsersResponse,
    ) {
        match reply_tx.send(response) {
            Ok(()) => self.post(id, Some(Event::WriteFlushed)),
            Err(_) => self.post(id, None),
        }
    }
}
