//! The `MultiGreeter` service.

use core::pin::Pin;
use streamchat_tonic_core::{
    Error,
    proto::{HelloReply, HelloRequest, multi_greeter_server::MultiGreeter},
};
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::{Request, Response, Status};

use crate::server::config::ServerConfig;
use crate::server::engine::calls::{GreetCall, Intake};

/// Validates `SayHello` requests and hands them to the dispatch engine. The
/// reply stream is fed one greeting at a time by the serving handler.
#[derive(Clone)]
pub struct GreeterService {
    intake: Intake<GreetCall>,
    config: ServerConfig,
}

impl GreeterService {
    pub fn new(intake: Intake<GreetCall>, config: ServerConfig) -> Self {
        Self { intake, config }
    }
}

#[tonic::async_trait]
impl MultiGreeter for GreeterService {
    type SayHelloStream = Pin<Box<dyn Stream<Item = Result<HelloReply, Status>> + Send>>;

    #[tracing::instrument(skip_all, fields(name = %req.get_ref().name, count = req.get_ref().num_greetings))]
    async fn say_hello(
        &self,
        req: Request<HelloRequest>,
    ) -> Result<Response<Self::SayHelloStream>, Status> {
        let request = req.into_inner();
        if request.num_greetings > self.config.max_greetings {
            return Err(Error::InvalidRequest {
                reason: format!(
                    "num_greetings {} exceeds maximum allowed ({})",
                    request.num_greetings, self.config.max_greetings
                ),
            }
            .into());
        }

        let (reply_tx, reply_rx) =
            mpsc::channel::<Result<HelloReply, Status>>(self.config.stream_buffer_size);
        self.intake.offer(GreetCall { request, reply_tx }).await?;

        Ok(Response::new(Box::pin(ReceiverStream::new(reply_rx))))
    }
}
