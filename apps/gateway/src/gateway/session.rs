//! Per-connection session state.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::Message;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;

use super::protocol::ServerFrame;

/// The room/user pair a session acquires at join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub room_id: String,
    pub user_id: String,
}

/// Result of a non-blocking send into a session's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The bounded queue is full — the consumer is too slow to keep.
    Full,
    /// The connection task is gone.
    Closed,
}

/// State for a single WebSocket connection.
///
/// Membership is set exactly once (at join) and taken exactly once (at
/// leave/disconnect). All outbound traffic goes through the bounded queue
/// drained by the connection's send task; a full queue never blocks the
/// sender.
pub struct Session {
    pub session_id: String,
    tx: mpsc::Sender<Message>,
    membership: Mutex<Option<Membership>>,
    alive: AtomicBool,
    kick: Notify,
}

impl Session {
    pub fn new(session_id: String, tx: mpsc::Sender<Message>) -> Self {
        Self {
            session_id,
            tx,
            membership: Mutex::new(None),
            alive: AtomicBool::new(true),
            kick: Notify::new(),
        }
    }

    /// Set membership. Returns `false` if the session already joined a room.
    pub fn join(&self, room_id: String, user_id: String) -> bool {
        let mut membership = self.membership.lock();
        if membership.is_some() {
            return false;
        }
        *membership = Some(Membership { room_id, user_id });
        true
    }

    pub fn membership(&self) -> Option<Membership> {
        self.membership.lock().clone()
    }

    /// Clear membership, returning it. `None` on the second call.
    pub fn take_membership(&self) -> Option<Membership> {
        self.membership.lock().take()
    }

    pub fn try_send_frame(&self, frame: &ServerFrame) -> SendOutcome {
        let json = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(err) => {
                tracing::error!(session_id = %self.session_id, %err, "frame serialization failed");
                return SendOutcome::Closed;
            }
        };
        self.try_send_message(Message::Text(json.into()))
    }

    pub fn try_send_text(&self, text: String) -> SendOutcome {
        self.try_send_message(Message::Text(text.into()))
    }

    pub fn try_send_message(&self, message: Message) -> SendOutcome {
        match self.tx.try_send(message) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Record a liveness probe response.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Consume the liveness flag ahead of the next probe. Returns `false`
    /// when the previous probe went unanswered.
    pub fn probe(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Ask the connection task to close this session.
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    /// Resolves when the session has been kicked.
    pub async fn kicked(&self) {
        self.kick.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_capacity(capacity: usize) -> (Session, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Session::new("sess_test".to_string(), tx), rx)
    }

    #[test]
    fn membership_is_set_once() {
        let (session, _rx) = session_with_capacity(1);
        assert!(session.join("42".to_string(), "alice".to_string()));
        assert!(!session.join("43".to_string(), "alice".to_string()));

        let membership = session.membership().unwrap();
        assert_eq!(membership.room_id, "42");
    }

    #[test]
    fn membership_is_taken_once() {
        let (session, _rx) = session_with_capacity(1);
        session.join("42".to_string(), "alice".to_string());

        assert!(session.take_membership().is_some());
        assert!(session.take_membership().is_none());
        assert!(session.membership().is_none());
    }

    #[test]
    fn full_queue_is_reported() {
        let (session, _rx) = session_with_capacity(1);
        assert_eq!(
            session.try_send_frame(&ServerFrame::error("a")),
            SendOutcome::Sent
        );
        assert_eq!(
            session.try_send_frame(&ServerFrame::error("b")),
            SendOutcome::Full
        );
    }

    #[test]
    fn closed_queue_is_reported() {
        let (session, rx) = session_with_capacity(1);
        drop(rx);
        assert_eq!(
            session.try_send_frame(&ServerFrame::error("a")),
            SendOutcome::Closed
        );
    }

    #[test]
    fn probe_consumes_the_liveness_flag() {
        let (session, _rx) = session_with_capacity(1);
        assert!(session.probe());
        assert!(!session.probe());
        session.mark_alive();
        assert!(session.probe());
    }
}
