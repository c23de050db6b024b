//! The chat-room user directory.
//!
//! Maps each logged-in session to its username and a delivery target (the
//! correlation id of the session's write handler). The directory is owned by
//! the dispatch task and passed by reference into handler transitions; all
//! mutation is serialized through that single task.

use super::registry::CorrelationId;
use std::collections::BTreeMap;

pub struct DirectoryEntry {
    pub username: String,
    /// Correlation id of the write handler that delivers to this session.
    pub target: CorrelationId,
}

/// Process-wide table of currently-logged-in chat users.
///
/// Keyed by session id in a `BTreeMap`; session ids are allocated
/// monotonically, so iteration order is the order sessions joined.
#[derive(Default)]
pub struct RoomDirectory {
    entries: BTreeMap<CorrelationId, DirectoryEntry>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self, username: String, session_id: CorrelationId, target: CorrelationId) {
        let prev = self.entries.insert(session_id, DirectoryEntry { username, target });
        debug_assert!(prev.is_none(), "session {session_id} entered the room twice");
    }

    /// Idempotent: leaving a room the session is not in is a no-op.
    pub fn leave(&mut self, session_id: CorrelationId) {
        self.entries.remove(&session_id);
    }

    pub fn contains(&self, session_id: CorrelationId) -> bool {
        self.entries.contains_key(&session_id)
    }

    /// Delivery targets for a broadcast: every entry except the origin
    /// session.
    pub fn broadcast_targets(&self, origin: CorrelationId) -> Vec<CorrelationId> {
        self.entries
            .iter()
            .filter(|(session_id, _)| **session_id != origin)
            .map(|(_, entry)| entry.target)
            .collect()
    }

    /// Snapshot of usernames in directory iteration order.
    pub fn list_usernames(&self) -> Vec<String> {
        self.entries
            .values()
            .map(|entry| entry.username.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_listed_in_session_order() {
        let mut directory = RoomDirectory::new();
        directory.enter("carol".into(), 7, 8);
        directory.enter("alice".into(), 1, 2);
        directory.enter("bob".into(), 4, 5);
        assert_eq!(directory.list_usernames(), ["alice", "bob", "carol"]);
    }

    #[test]
    fn broadcast_excludes_the_origin_session() {
        let mut directory = RoomDirectory::new();
        directory.enter("alice".into(), 1, 2);
        directory.enter("bob".into(), 4, 5);
        directory.enter("carol".into(), 7, 8);
        assert_eq!(directory.broadcast_targets(4), [2, 8]);
    }

    #[test]
    fn leave_is_idempotent() {
        let mut directory = RoomDirectory::new();
        directory.enter("alice".into(), 1, 2);
        directory.leave(1);
        directory.leave(1);
        assert!(directory.is_empty());
    }

    #[test]
    fn reentering_after_leave_replaces_the_entry() {
        let mut directory = RoomDirectory::new();
        directory.enter("alice".into(), 1, 2);
        directory.leave(1);
        directory.enter("alicia".into(), 1, 2);
        assert_eq!(directory.list_usernames(), ["alicia"]);
        assert_eq!(directory.len(), 1);
    }
}
