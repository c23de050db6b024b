//! The `ChatRoom` service.

use core::pin::Pin;
use streamchat_tonic_core::{
    Error,
    proto::{
        ClientMessage, ListUsersRequest, ListUsersResponse, ServerMessage,
        chat_room_server::ChatRoom,
    },
};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::{Request, Response, Status, Streaming};

use crate::server::config::ServerConfig;
use crate::server::engine::calls::{ChatCall, InboundStream, Intake, ListUsersCall};

/// Bridges `Chat` streams and `ListUsers` snapshots into the dispatch
/// engine. Session state lives entirely inside the engine; this service
/// only moves the stream endpoints across.
#[derive(Clone)]
pub struct ChatService {
    chat_intake: Intake<ChatCall>,
    list_users_intake: Intake<ListUsersCall>,
    config: ServerConfig,
}

impl ChatService {
    pub fn new(
        chat_intake: Intake<ChatCall>,
        list_users_intake: Intake<ListUsersCall>,
        config: ServerConfig,
    ) -> Self {
        Self {
            chat_intake,
            list_users_intake,
            config,
        }
    }
}

#[tonic::async_trait]
impl ChatRoom for ChatService {
    type ChatStream = Pin<Box<dyn Stream<Item = Result<ServerMessage, Status>> + Send>>;

    #[tracing::instrument(skip_all)]
    async fn chat(
        &self,
        req: Request<Streaming<ClientMessage>>,
    ) -> Result<Response<Self::ChatStream>, Status> {
        let inbound: InboundStream = Box::pin(req.into_inner());
        let (outbound, outbound_rx) =
            mpsc::channel::<Result<ServerMessage, Status>>(self.config.stream_buffer_size);
        self.chat_intake.offer(ChatCall { inbound, outbound }).await?;

        Ok(Response::new(Box::pin(ReceiverStream::new(outbound_rx))))
    }

    #[tracing::instrument(skip_all)]
    async fn list_users(
        &self,
        _req: Request<ListUsersRequest>,
    ) -> Result<Response<ListUsersResponse>, Status> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.list_users_intake.offer(ListUsersCall { reply_tx }).await?;

        let response = reply_rx.await.map_err(|_| Error::ChannelError {
            context: "directory snapshot response dropped".to_string(),
        })?;
        Ok(Response::new(response))
    }
}
