//! Accept queues bridging the tonic services to the dispatch engine.
//!
//! Each RPC shape has one bounded queue. The tonic side wraps an incoming
//! call into a call record and offers it through an [`Intake`]; on the engine
//! side, the handler currently in its accepting state waits on the matching
//! [`Acceptor`]. Queue closure (process shutdown) completes a pending accept
//! as failed.

use core::pin::Pin;
use futures::Stream;
use std::sync::Arc;
use streamchat_tonic_core::Error;
use streamchat_tonic_core::proto::{ClientMessage, HelloReply, HelloRequest, ListUsersResponse};
use tokio::sync::{Mutex, mpsc, oneshot};
use tonic::Status;

use super::session::OutboundSender;

/// Boxed client-to-server message stream of a chat call.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<ClientMessage, Status>> + Send>>;

/// Shared handle to a chat call's inbound stream. Only one read operation is
/// in flight per session, so the lock is never contended; it hands the stream
/// from one read operation to the next.
pub type SharedInbound = Arc<Mutex<InboundStream>>;

/// An accepted `SayHello` call: the request plus the reply stream. Dropping
/// the last sender clone ends the stream with OK status.
pub struct GreetCall {
    pub request: HelloRequest,
    pub reply_tx: mpsc::Sender<Result<HelloReply, Status>>,
}

/// An accepted `Chat` call: both directions of the bidirectional stream.
pub struct ChatCall {
    pub inbound: InboundStream,
    pub outbound: OutboundSender,
}

/// An accepted `ListUsers` call; the unary response goes back on the oneshot.
pub struct ListUsersCall {
    pub reply_tx: oneshot::Sender<ListUsersResponse>,
}

/// Producer side of an accept queue, held by a tonic service.
pub struct Intake<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for Intake<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Intake<T> {
    /// Hands an incoming call to the engine.
    pub async fn offer(&self, call: T) -> Result<(), Error> {
        self.tx.send(call).await.map_err(|_| Error::ServiceShutdown)
    }
}

/// Consumer side of an accept queue, held by the handler variant that serves
/// this RPC shape. Cloned into each fresh sibling so it can accept the next
/// call.
pub struct Acceptor<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for Acceptor<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> Acceptor<T> {
    /// Waits for the next incoming call of this shape. Returns `None` once
    /// every intake has been dropped. At most one accept is pending per shape,
    /// so the lock is never contended.
    pub async fn accept(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }
}

/// Creates the accept queue for one RPC shape.
pub fn accept_queue<T>(capacity: usize) -> (Intake<T>, Acceptor<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        Intake { tx },
        Acceptor {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}
