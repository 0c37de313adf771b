//! In-process room registry and local fan-out.
//!
//! A room exists locally iff it has an entry here; removing the last session
//! deletes the entry. Global room existence is defined by the cache and the
//! durable log, not by any single process's registry.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use super::protocol::ServerFrame;
use super::session::{SendOutcome, Session};

/// Who to skip during a broadcast.
#[derive(Debug, Clone, Copy)]
pub enum Exclude<'a> {
    Nobody,
    /// The originating session (local fan-out).
    Session(&'a str),
    /// Every local session of a user (cross-process echo avoidance).
    User(&'a str),
}

/// Registry of locally-connected sessions, keyed by room.
pub struct RoomRouter {
    rooms: DashMap<String, HashMap<String, Arc<Session>>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    pub fn join(&self, room_id: &str, session: Arc<Session>) {
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(session.session_id.clone(), session);
    }

    /// Remove a session; drops the room entry when it becomes empty.
    pub fn leave(&self, room_id: &str, session_id: &str) {
        if let Some(mut entry) = self.rooms.get_mut(room_id) {
            entry.remove(session_id);
            if entry.is_empty() {
                drop(entry);
                self.rooms
                    .remove_if(room_id, |_, sessions| sessions.is_empty());
            }
        }
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn session_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map(|entry| entry.len()).unwrap_or(0)
    }

    /// Send a frame to every session in the room except the excluded one.
    ///
    /// The frame is serialized once and the session set snapshotted before
    /// sending, so a concurrent join/leave neither corrupts nor duplicates
    /// delivery. A full outbound queue kicks that session; every other
    /// failure is logged and skipped.
    pub fn broadcast(&self, room_id: &str, frame: &ServerFrame, exclude: Exclude<'_>) {
        let targets: Vec<Arc<Session>> = match self.rooms.get(room_id) {
            Some(entry) => entry.values().cloned().collect(),
            None => return,
        };

        let json = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(err) => {
                tracing::error!(%room_id, %err, "broadcast serialization failed");
                return;
            }
        };

        for session in targets {
            let skip = match exclude {
                Exclude::Nobody => false,
                Exclude::Session(session_id) => session.session_id == session_id,
                Exclude::User(user_id) => session
                    .membership()
                    .is_some_and(|m| m.user_id == user_id),
            };
            if skip {
                continue;
            }

            match session.try_send_text(json.clone()) {
                SendOutcome::Sent => {}
                SendOutcome::Full => {
                    tracing::warn!(
                        session_id = %session.session_id,
                        %room_id,
                        "outbound queue full, kicking slow session"
                    );
                    session.kick();
                }
                SendOutcome::Closed => {
                    tracing::debug!(
                        session_id = %session.session_id,
                        %room_id,
                        "skipping closed session during broadcast"
                    );
                }
            }
        }
    }
}

impl Default for RoomRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    fn make_session(id: &str, capacity: usize) -> (Arc<Session>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Arc::new(Session::new(id.to_string(), tx)), rx)
    }

    fn recv_text(rx: &mut mpsc::Receiver<Message>) -> Option<String> {
        match rx.try_recv() {
            Ok(Message::Text(text)) => Some(text.to_string()),
            _ => None,
        }
    }

    #[test]
    fn join_and_leave_manage_room_entries() {
        let router = RoomRouter::new();
        let (a, _rx_a) = make_session("sess_a", 8);
        let (b, _rx_b) = make_session("sess_b", 8);

        router.join("42", a.clone());
        router.join("42", b.clone());
        assert_eq!(router.session_count("42"), 2);

        router.leave("42", "sess_a");
        assert_eq!(router.session_count("42"), 1);
        assert!(router.contains_room("42"));

        router.leave("42", "sess_b");
        assert!(!router.contains_room("42"));
        assert_eq!(router.room_count(), 0);
    }

    #[test]
    fn leave_of_unknown_session_is_a_no_op() {
        let router = RoomRouter::new();
        router.leave("42", "sess_ghost");
        assert!(!router.contains_room("42"));
    }

    #[test]
    fn broadcast_excludes_the_sender() {
        let router = RoomRouter::new();
        let (a, mut rx_a) = make_session("sess_a", 8);
        let (b, mut rx_b) = make_session("sess_b", 8);
        router.join("42", a);
        router.join("42", b);

        router.broadcast(
            "42",
            &ServerFrame::UserJoined {
                user_id: "alice".to_string(),
            },
            Exclude::Session("sess_a"),
        );

        assert!(recv_text(&mut rx_a).is_none());
        let text = recv_text(&mut rx_b).unwrap();
        assert!(text.contains("user_joined"));
    }

    #[test]
    fn broadcast_excludes_every_session_of_a_user() {
        let router = RoomRouter::new();
        let (a, mut rx_a) = make_session("sess_a", 8);
        let (b, mut rx_b) = make_session("sess_b", 8);
        a.join("42".to_string(), "alice".to_string());
        b.join("42".to_string(), "bob".to_string());
        router.join("42", a);
        router.join("42", b);

        router.broadcast(
            "42",
            &ServerFrame::error("x"),
            Exclude::User("alice"),
        );

        assert!(recv_text(&mut rx_a).is_none());
        assert!(recv_text(&mut rx_b).is_some());
    }

    #[test]
    fn broadcast_to_unknown_room_is_a_no_op() {
        let router = RoomRouter::new();
        router.broadcast("missing", &ServerFrame::error("x"), Exclude::Nobody);
    }

    #[test]
    fn slow_session_is_kicked_without_blocking_the_rest() {
        let router = RoomRouter::new();
        // Capacity 1 and nobody draining: the second broadcast overflows.
        let (slow, _rx_slow) = make_session("sess_slow", 1);
        let (fast, mut rx_fast) = make_session("sess_fast", 8);
        router.join("42", slow.clone());
        router.join("42", fast);

        router.broadcast("42", &ServerFrame::error("one"), Exclude::Nobody);
        router.broadcast("42", &ServerFrame::error("two"), Exclude::Nobody);

        // The fast session got both frames despite the slow one overflowing.
        assert!(recv_text(&mut rx_fast).unwrap().contains("one"));
        assert!(recv_text(&mut rx_fast).unwrap().contains("two"));
    }

    #[tokio::test]
    async fn kicked_slow_session_is_signalled() {
        let router = RoomRouter::new();
        let (slow, _rx_slow) = make_session("sess_slow", 1);
        router.join("42", slow.clone());

        router.broadcast("42", &ServerFrame::error("one"), Exclude::Nobody);
        router.broadcast("42", &ServerFrame::error("two"), Exclude::Nobody);

        // The kick from the overflow is already pending.
        tokio::time::timeout(std::time::Duration::from_secs(1), slow.kicked())
            .await
            .expect("kick signal");
    }
}
