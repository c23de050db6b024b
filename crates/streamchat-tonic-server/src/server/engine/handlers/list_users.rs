//! Unary directory-snapshot calls.

use streamchat_tonic_core::proto::ListUsersResponse;

use super::{Flow, Handler};
use crate::server::engine::EngineCtx;
use crate::server::engine::calls::{Acceptor, ListUsersCall};
use crate::server::engine::ops::{Event, Ops};
use crate::server::engine::registry::CorrelationId;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ListState {
    Created,
    AwaitRequest,
    Finished,
}

pub struct ListUsersHandler {
    id: CorrelationId,
    state: ListState,
    ops: Ops,
    acceptor: Acceptor<ListUsersCall>,
}

impl ListUsersHandler {
    pub fn new(ops: Ops, acceptor: Acceptor<ListUsersCall>) -> Self {
        Self {
            id: 0,
            state: ListState::Created,
            ops,
            acceptor,
        }
    }

    pub(super) fn bind(&mut self, id: CorrelationId) {
        self.id = id;
    }

    pub fn proceed(&mut self, ctx: &mut EngineCtx, event: Event) -> Flow {
        match (self.state, event) {
            (ListState::Created, Event::Start) => {
                self.ops
                    .accept(self.id, self.acceptor.clone(), Event::ListUsersAccepted);
                self.state = ListState::AwaitRequest;
                Flow::Continue
            }
            (ListState::AwaitRequest, Event::ListUsersAccepted(call)) => {
                // Keep a fresh sibling listening for the next ListUsers call.
                ctx.register(Handler::ListUsers(ListUsersHandler::new(
                    self.ops.clone(),
                    self.acceptor.clone(),
                )));
                let usernames = ctx.directory.list_usernames();
                self.ops
                    .respond_users(self.id, call.reply_tx, ListUsersResponse { usernames });
                self.state = ListState::Finished;
                Flow::Continue
            }
            (ListState::Finished, Event::WriteFlushed) => Flow::Finished,
            _ => unreachable!("list-users handler received a completion it never issued"),
        }
    }
}
