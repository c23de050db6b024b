//! The asynchronous call-lifecycle core.
//!
//! A single dispatch task owns the [`HandlerRegistry`] and the
//! [`RoomDirectory`]. It blocks on a completion channel, resolves each
//! completed operation's correlation id back to the owning call state
//! machine, and invokes that machine's transition. Handler transitions and
//! directory mutation are thereby fully serialized; no further locking
//! discipline is needed.
//!
//! ## Structure
//!
//! - [`registry`] - correlation ids and handler ownership.
//! - [`ops`] - asynchronous operations and their completions.
//! - [`calls`] - accept queues fed by the tonic services.
//! - [`handlers`] - the per-RPC-shape state machines.
//! - [`session`] / [`directory`] - shared chat state.

pub mod calls;
pub mod directory;
pub mod handlers;
pub mod ops;
pub mod registry;
pub mod session;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use crate::server::config::ServerConfig;
use calls::{Acceptor, ChatCall, GreetCall, Intake, ListUsersCall, accept_queue};
use directory::RoomDirectory;
use handlers::{ChatReadHandler, Flow, GreetHandler, Handler, ListUsersHandler};
use ops::{Completion, Event, Ops};
use registry::{CorrelationId, HandlerRegistry};
use session::SharedSession;

/// Intake handles for the tonic services, one per RPC shape.
pub struct ServiceChannels {
    pub greet: Intake<GreetCall>,
    pub chat: Intake<ChatCall>,
    pub list_users: Intake<ListUsersCall>,
}

/// Mutable state threaded through every handler transition: the registry,
/// the room directory, and the operation issuer. Constructed once at server
/// startup; never a global.
pub struct EngineCtx {
    pub registry: HandlerRegistry,
    pub directory: RoomDirectory,
    pub ops: Ops,
    pub config: ServerConfig,
}

impl EngineCtx {
    pub fn new(ops: Ops, config: ServerConfig) -> Self {
        Self {
            registry: HandlerRegistry::new(),
            directory: RoomDirectory::new(),
            ops,
            config,
        }
    }

    /// Takes ownership of a handler, assigns it the next unused correlation
    /// id, and immediately drives its first transition (out of its initial
    /// state and into its awaiting-work state).
    pub fn register(&mut self, mut handler: Handler) -> CorrelationId {
        let id = self.registry.allocate();
        handler.bind(id);
        tracing::debug!(id, kind = handler.kind(), "registering call handler");
        match handler.proceed(self, Event::Start) {
            Flow::Continue => self.registry.insert(id, handler),
            Flow::Finished => {}
        }
        id
    }

    /// Delivers a chat message to every directory entry except the origin
    /// session. Delivery goes through each target write handler, which
    /// enforces the single-in-flight-write rule per session.
    pub fn broadcast(&mut self, origin: CorrelationId, text: &str) {
        for target in self.directory.broadcast_targets(origin) {
            if let Some(Handler::ChatWrite(writer)) = self.registry.get_mut(target) {
                writer.post_message(text);
            }
        }
    }

    /// Tears down a chat session: leaves the directory, unregisters both
    /// paired handlers, and drops the outbound stream. With `cancel` set the
    /// stream is terminated with a CANCELLED status instead of closing
    /// cleanly. Idempotent.
    pub fn release_session(&mut self, session: &SharedSession, cancel: bool) {
        let (session_id, read_id, write_id, in_room, outbound) = {
            let mut session = session.lock();
            let snapshot = (
                session.session_id,
                session.read_id.take(),
                session.write_id.take(),
                session.in_room,
                session.outbound.take(),
            );
            session.in_room = false;
            snapshot
        };
        if in_room {
            if let Some(session_id) = session_id {
                self.directory.leave(session_id);
            }
        }
        if cancel {
            if let Some(outbound) = outbound {
                let _ = outbound.try_send(Err(Status::cancelled("chat stream canceled by server")));
            }
        }
        if let Some(id) = read_id {
            self.registry.remove(id);
        }
        if let Some(id) = write_id {
            self.registry.remove(id);
        }
    }
}

/// The completion dispatcher.
///
/// Owns the only receiver of the completion channel; everything else holds
/// an [`Ops`] clone of the sender.
pub struct Engine {
    ctx: EngineCtx,
    completions: mpsc::UnboundedReceiver<Completion>,
    greet_acceptor: Acceptor<GreetCall>,
    chat_acceptor: Acceptor<ChatCall>,
    list_users_acceptor: Acceptor<ListUsersCall>,
}

impl Engine {
    pub fn new(config: ServerConfig) -> (Self, ServiceChannels) {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let ops = Ops::new(completions_tx);

        let (greet_intake, greet_acceptor) = accept_queue(config.accept_backlog);
        let (chat_intake, chat_acceptor) = accept_queue(config.accept_backlog);
        let (list_users_intake, list_users_acceptor) = accept_queue(config.accept_backlog);

        let engine = Self {
            ctx: EngineCtx::new(ops, config),
            completions: completions_rx,
            greet_acceptor,
            chat_acceptor,
            list_users_acceptor,
        };
        let channels = ServiceChannels {
            greet: greet_intake,
            chat: chat_intake,
            list_users: list_users_intake,
        };
        (engine, channels)
    }

    /// Runs the dispatch loop until `shutdown` fires. One handler per RPC
    /// shape starts out listening; each spawns its own sibling when it
    /// accepts a call.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let ops = self.ctx.ops.clone();
        self.ctx.register(Handler::Greet(GreetHandler::new(
            ops.clone(),
            self.greet_acceptor.clone(),
        )));
        self.ctx.register(Handler::ChatRead(ChatReadHandler::new(
            ops.clone(),
            self.chat_acceptor.clone(),
        )));
        self.ctx.register(Handler::ListUsers(ListUsersHandler::new(
            ops,
            self.list_users_acceptor.clone(),
        )));

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                completion = self.completions.recv() => match completion {
                    Some(completion) => self.dispatch(completion),
                    None => break,
                },
            }
        }
        tracing::info!(live_handlers = self.ctx.registry.len(), "dispatch loop stopped");
    }

    fn dispatch(&mut self, Completion { id, event }: Completion) {
        let Some(event) = event else {
            // The peer disconnected or the stream was canceled; the owning
            // handler can make no further progress and is torn down without
            // invoking another transition.
            if let Some(handler) = self.ctx.registry.take(id) {
                tracing::debug!(id, kind = handler.kind(), "operation failed, tearing down handler");
                handler.canceled(&mut self.ctx);
            }
            return;
        };
        let Some(mut handler) = self.ctx.registry.take(id) else {
            // Benign race: the operation completed after its handler was
            // already torn down.
            tracing::debug!(id, "completion for unknown correlation id, discarding");
            return;
        };
        match handler.proceed(&mut self.ctx, event) {
            Flow::Continue => self.ctx.registry.restore(id, handler),
            Flow::Finished => tracing::debug!(id, "call handler finished"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::calls::InboundStream;
    use core::time::Duration;
    use futures::StreamExt;
    use streamchat_tonic_core::proto::{
        ChatText, ClientMessage, HelloRequest, Registration, ServerMessage, client_message,
    };
    use tokio::sync::{mpsc, oneshot};
    use tokio_stream::wrappers::ReceiverStream;

    struct TestServer {
        channels: ServiceChannels,
        token: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    impl TestServer {
        fn start() -> Self {
            let (engine, channels) = Engine::new(ServerConfig::test_default());
            let token = CancellationToken::new();
            let task = tokio::spawn(engine.run(token.clone()));
            Self {
                channels,
                token,
                task,
            }
        }

        async fn stop(self) {
            self.token.cancel();
            self.task.await.unwrap();
        }

        async fn greet(&self, name: &str, num_greetings: u32, pause_milliseconds: u32) -> Vec<String> {
            let (reply_tx, mut reply_rx) = mpsc::channel(16);
            self.channels
                .greet
                .offer(GreetCall {
                    request: HelloRequest {
                        name: name.into(),
                        num_greetings,
                        pause_milliseconds,
                    },
                    reply_tx,
                })
                .await
                .unwrap();
            let mut messages = Vec::new();
            while let Some(reply) = reply_rx.recv().await {
                messages.push(reply.unwrap().message);
            }
            messages
        }

        async fn list_users(&self) -> Vec<String> {
            let (reply_tx, reply_rx) = oneshot::channel();
            self.channels
                .list_users
                .offer(ListUsersCall { reply_tx })
                .await
                .unwrap();
            reply_rx.await.unwrap().usernames
        }

        async fn connect_chat(&self) -> ChatClient {
            let (in_tx, in_rx) = mpsc::channel::<ClientMessage>(16);
            let inbound: InboundStream = Box::pin(ReceiverStream::new(in_rx).map(Ok));
            let (out_tx, out_rx) = mpsc::channel(16);
            self.channels
                .chat
                .offer(ChatCall {
                    inbound,
                    outbound: out_tx,
                })
                .await
                .unwrap();
            ChatClient {
                tx: in_tx,
                rx: out_rx,
            }
        }
    }

    struct ChatClient {
        tx: mpsc::Sender<ClientMessage>,
        rx: mpsc::Receiver<Result<ServerMessage, Status>>,
    }

    impl ChatClient {
        async fn register(&self, username: &str) {
            self.tx
                .send(ClientMessage {
                    event: Some(client_message::Event::Registration(Registration {
                        username: username.into(),
                    })),
                })
                .await
                .unwrap();
        }

        async fn say(&self, text: &str) {
            self.tx
                .send(ClientMessage {
                    event: Some(client_message::Event::Chat(ChatText { text: text.into() })),
                })
                .await
                .unwrap();
        }

        /// Next server message, or `None` when the stream closed cleanly.
        async fn recv(&mut self) -> Option<String> {
            match self.rx.recv().await {
                Some(Ok(message)) => Some(message.text),
                Some(Err(status)) => panic!("stream errored: {status}"),
                None => None,
            }
        }
    }

    async fn wait_for_users(server: &TestServer, expected: &[&str]) {
        for _ in 0..400 {
            if server.list_users().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "directory never reached {expected:?}, last saw {:?}",
            server.list_users().await
        );
    }

    #[tokio::test]
    async fn greet_streams_exactly_n_replies_in_order() {
        let server = TestServer::start();
        assert_eq!(
            server.greet("world", 3, 0).await,
            ["Hello, world (1)", "Hello, world (2)", "Hello, world (3)"]
        );
        server.stop().await;
    }

    #[tokio::test]
    async fn greet_zero_and_one_collapse_to_a_single_reply() {
        let server = TestServer::start();
        assert_eq!(server.greet("a", 0, 0).await, ["Hello, a (1)"]);
        assert_eq!(server.greet("b", 1, 0).await, ["Hello, b (1)"]);
        server.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn greet_paces_replies_after_the_first() {
        let server = TestServer::start();
        assert_eq!(
            server.greet("paced", 4, 250).await,
            [
                "Hello, paced (1)",
                "Hello, paced (2)",
                "Hello, paced (3)",
                "Hello, paced (4)"
            ]
        );
        server.stop().await;
    }

    #[tokio::test]
    async fn greet_keeps_listening_while_serving() {
        let server = TestServer::start();
        let (first, second) = tokio::join!(server.greet("a", 3, 10), server.greet("b", 3, 10));
        assert_eq!(first.len(), 3);
        assert_eq!(second.len(), 3);
        assert!(first.iter().all(|m| m.contains("a")));
        assert!(second.iter().all(|m| m.contains("b")));
        server.stop().await;
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_but_the_sender() {
        let server = TestServer::start();

        let mut alice = server.connect_chat().await;
        assert_eq!(alice.recv().await.as_deref(), Some("Welcome to the chat!"));
        alice.register("alice").await;
        wait_for_users(&server, &["alice"]).await;

        let mut bob = server.connect_chat().await;
        assert_eq!(bob.recv().await.as_deref(), Some("Welcome to the chat!"));
        bob.register("bob").await;
        wait_for_users(&server, &["alice", "bob"]).await;

        alice.say("hi").await;
        assert_eq!(bob.recv().await.as_deref(), Some("hi"));

        // Bob's reply arriving first proves "hi" was never echoed back to
        // its sender.
        bob.say("yo").await;
        assert_eq!(alice.recv().await.as_deref(), Some("yo"));

        server.stop().await;
    }

    #[tokio::test]
    async fn reregistration_replaces_exactly_one_entry() {
        let server = TestServer::start();
        let mut alice = server.connect_chat().await;
        assert!(alice.recv().await.is_some());
        alice.register("alice").await;
        wait_for_users(&server, &["alice"]).await;
        alice.register("alicia").await;
        wait_for_users(&server, &["alicia"]).await;
        server.stop().await;
    }

    #[tokio::test]
    async fn messages_from_unregistered_sessions_are_discarded() {
        let server = TestServer::start();

        let mut alice = server.connect_chat().await;
        assert!(alice.recv().await.is_some());
        alice.register("alice").await;
        let mut bob = server.connect_chat().await;
        assert!(bob.recv().await.is_some());
        bob.register("bob").await;
        wait_for_users(&server, &["alice", "bob"]).await;

        let mut lurker = server.connect_chat().await;
        assert!(lurker.recv().await.is_some());
        lurker.say("spam").await;

        alice.say("real").await;
        // Bob sees only the registered sender's message.
        assert_eq!(bob.recv().await.as_deref(), Some("real"));

        server.stop().await;
    }

    #[tokio::test]
    async fn logout_sends_one_farewell_then_closes_the_stream() {
        let server = TestServer::start();
        let mut alice = server.connect_chat().await;
        assert!(alice.recv().await.is_some());
        alice.register("alice").await;
        wait_for_users(&server, &["alice"]).await;

        alice.register("").await;
        assert_eq!(alice.recv().await.as_deref(), Some("Good bye, alice."));
        assert_eq!(alice.recv().await, None);
        wait_for_users(&server, &[]).await;
        server.stop().await;
    }

    #[tokio::test]
    async fn disconnect_tears_the_session_down() {
        let server = TestServer::start();
        let mut alice = server.connect_chat().await;
        assert!(alice.recv().await.is_some());
        alice.register("alice").await;
        wait_for_users(&server, &["alice"]).await;

        drop(alice);
        wait_for_users(&server, &[]).await;
        server.stop().await;
    }

    #[tokio::test]
    async fn list_users_on_an_empty_room_is_empty() {
        let server = TestServer::start();
        assert!(server.list_users().await.is_empty());
        server.stop().await;
    }

    #[tokio::test]
    async fn completions_for_unknown_ids_are_discarded() {
        let (mut engine, _channels) = Engine::new(ServerConfig::test_default());
        engine.dispatch(Completion {
            id: 9999,
            event: Some(Event::WriteFlushed),
        });
        engine.dispatch(Completion {
            id: 9999,
            event: None,
        });
        assert!(engine.ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn registration_assigns_increasing_ids_and_first_transition_runs() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let ops = Ops::new(tx);
        let mut ctx = EngineCtx::new(ops.clone(), ServerConfig::test_default());
        let (_intake, acceptor) = accept_queue::<GreetCall>(4);

        let a = ctx.register(Handler::Greet(GreetHandler::new(ops.clone(), acceptor.clone())));
        let b = ctx.register(Handler::Greet(GreetHandler::new(ops, acceptor)));
        assert!(a < b);
        // Both moved out of CREATED and are awaiting work in the registry.
        assert_eq!(ctx.registry.len(), 2);
    }
}
