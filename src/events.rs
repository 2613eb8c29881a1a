//! Lifecycle Event Bus
//!
//! Typed broadcast channel for session lifecycle fan-out. Handlers subscribe
//! explicitly; emission always happens after authoritative state has been
//! cleared, so a subscriber reacting to `Ended` can immediately re-initiate
//! without observing a stale active session.

use tokio::sync::broadcast;
use tracing::debug;

/// Session lifecycle events.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// Two channels were paired into a session.
    Matched {
        session_id: String,
        channel_ids: [String; 2],
    },
    /// Session ended (hangup or skip).
    Ended {
        session_id: String,
        duration_secs: i64,
    },
    /// A user became present on one side.
    ParticipantJoined {
        session_id: String,
        channel_id: String,
        user_id: String,
    },
    /// A present user left one side.
    ParticipantLeft {
        session_id: String,
        channel_id: String,
        user_id: String,
    },
    /// A participant side crossed the minimum-message threshold.
    MessageMilestone {
        session_id: String,
        channel_id: String,
        user_id: String,
        message_count: u64,
    },
}

/// Broadcast bus for call lifecycle events.
#[derive(Clone)]
pub struct CallEventBus {
    tx: broadcast::Sender<CallEvent>,
}

impl CallEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. A bus with no subscribers is not an error.
    pub fn emit(&self, event: CallEvent) {
        match self.tx.send(event) {
            Ok(receivers) => debug!("Event delivered to {} subscribers", receivers),
            Err(_) => debug!("Event emitted with no subscribers"),
        }
    }
}

impl Default for CallEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_and_emit() {
        let bus = CallEventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(CallEvent::Ended {
            session_id: "s1".to_string(),
            duration_secs: 42,
        });

        match rx.recv().await.unwrap() {
            CallEvent::Ended { session_id, duration_secs } => {
                assert_eq!(session_id, "s1");
                assert_eq!(duration_secs, 42);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = CallEventBus::new(16);
        bus.emit(CallEvent::Matched {
            session_id: "s1".to_string(),
            channel_ids: ["a".to_string(), "b".to_string()],
        });
    }
}
