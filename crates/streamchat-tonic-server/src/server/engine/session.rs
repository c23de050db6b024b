//! Per-connection chat state shared by a paired read and write handler.

use super::registry::CorrelationId;
use parking_lot::Mutex;
use std::sync::Arc;
use streamchat_tonic_core::proto::ServerMessage;
use tokio::sync::mpsc;
use tonic::Status;

/// Sender half of a chat call's response stream.
pub type OutboundSender = mpsc::Sender<Result<ServerMessage, Status>>;

/// Shared handle to a [`ChatSession`].
///
/// Held by both handlers of the pair (and briefly by in-flight write
/// operations); the session is released when the last holder drops it. The
/// mutex is only ever locked from the dispatch task and is never contended;
/// it exists to keep the engine task `Send`.
pub type SharedSession = Arc<Mutex<ChatSession>>;

/// Identity and in-flight state of one chat connection.
#[derive(Default)]
pub struct ChatSession {
    /// Correlation id of the read handler, recorded once the stream is
    /// accepted; doubles as the directory key for this connection.
    pub session_id: Option<CorrelationId>,
    pub username: String,
    pub in_room: bool,
    pub read_id: Option<CorrelationId>,
    pub write_id: Option<CorrelationId>,
    /// Response stream for this connection. Taken (not cloned) for the final
    /// write so the stream closes with OK once that write completes.
    pub outbound: Option<OutboundSender>,
}

impl ChatSession {
    pub fn shared() -> SharedSession {
        Arc::new(Mutex::new(Self::default()))
    }
}
