//! Call Engine Data Model
//!
//! Core records for the userphone matchmaking engine: pending match
//! requests, active sessions with their two participants, relayed message
//! snapshots, and the tagged outcome callers branch on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Default cap on the rolling in-memory message log per session.
pub const DEFAULT_MESSAGE_LOG_CAP: usize = 100;

/// Session lifecycle status. Monotonic: never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallStatus {
    Queued,
    Active,
    Ended,
}

impl CallStatus {
    /// Database column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Queued => "QUEUED",
            CallStatus::Active => "ACTIVE",
            CallStatus::Ended => "ENDED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ACTIVE" => CallStatus::Active,
            "ENDED" => CallStatus::Ended,
            _ => CallStatus::Queued,
        }
    }
}

/// A pending match request sitting in the call queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRequest {
    pub id: String,
    pub channel_id: String,
    pub guild_id: String,
    pub initiator_id: String,
    /// Channel-bound webhook URL used for relay once matched.
    pub webhook_url: String,
    pub enqueued_at: DateTime<Utc>,
    /// Reserved, currently always zero.
    pub priority: u8,
}

impl CallRequest {
    pub fn new(channel_id: &str, guild_id: &str, initiator_id: &str, webhook_url: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            channel_id: channel_id.to_string(),
            guild_id: guild_id.to_string(),
            initiator_id: initiator_id.to_string(),
            webhook_url: webhook_url.to_string(),
            enqueued_at: Utc::now(),
            priority: 0,
        }
    }
}

/// One side of a session. Owned by its session; destroyed with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub channel_id: String,
    pub guild_id: String,
    pub webhook_url: String,
    /// Users currently present in this channel's side of the call.
    pub users: Vec<String>,
    pub message_count: u64,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    /// Set once this side crossed the minimum-message threshold and the
    /// leaderboard credit was applied. Never applied twice.
    pub leaderboard_counted: bool,
}

impl Participant {
    pub fn from_request(request: &CallRequest) -> Self {
        Self {
            channel_id: request.channel_id.clone(),
            guild_id: request.guild_id.clone(),
            webhook_url: request.webhook_url.clone(),
            users: vec![request.initiator_id.clone()],
            message_count: 0,
            joined_at: Utc::now(),
            left_at: None,
            leaderboard_counted: false,
        }
    }

    pub fn has_user(&self, user_id: &str) -> bool {
        self.users.iter().any(|u| u == user_id)
    }
}

/// A relayed chat message snapshot kept for moderation and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub attachment_url: Option<String>,
}

/// A matched pairing of two channels, with its rolling message log.
///
/// This is the shape cached per channel and mirrored to distributed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub id: String,
    pub status: CallStatus,
    pub initiator_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<Participant>,
    pub messages: VecDeque<SessionMessage>,
}

impl CallSession {
    /// Materialize an active session from a request and its matched partner.
    ///
    /// The session inherits the queued partner's request id and initiator:
    /// that request's creation record, persisted at enqueue time, becomes
    /// the session row when the match lands.
    pub fn from_match(request: &CallRequest, partner: &CallRequest) -> Self {
        let now = Utc::now();
        Self {
            id: partner.id.clone(),
            status: CallStatus::Active,
            initiator_id: partner.initiator_id.clone(),
            started_at: now,
            ended_at: None,
            created_at: now,
            participants: vec![
                Participant::from_request(request),
                Participant::from_request(partner),
            ],
            messages: VecDeque::new(),
        }
    }

    pub fn participant(&self, channel_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.channel_id == channel_id)
    }

    pub fn participant_mut(&mut self, channel_id: &str) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| p.channel_id == channel_id)
    }

    /// The side opposite to `channel_id`.
    pub fn peer(&self, channel_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.channel_id != channel_id)
    }

    /// Append to the rolling log, evicting the oldest entry past the cap.
    pub fn push_message(&mut self, message: SessionMessage, cap: usize) {
        self.messages.push_back(message);
        while self.messages.len() > cap {
            self.messages.pop_front();
        }
    }

    /// Transition to ENDED. Returns false if already ended (status is
    /// monotonic, the first transition wins).
    pub fn end(&mut self) -> bool {
        if self.status == CallStatus::Ended {
            return false;
        }
        self.status = CallStatus::Ended;
        self.ended_at = Some(Utc::now());
        true
    }

    pub fn duration_secs(&self) -> i64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_seconds().max(0)
    }
}

/// Tagged outcome of a public call operation.
///
/// Callers branch on the variant; display text comes from [`CallOutcome::message`]
/// and is never parsed back to infer state.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// Request entered the queue without an immediate match.
    Queued { position: usize, queue_len: usize },
    /// Request matched a queued partner synchronously.
    Connected { session_id: String },
    /// Channel was only queued; the queue entry was removed.
    QueueLeft,
    /// Active session ended.
    Ended { session_id: String, duration_secs: i64 },
    /// Skip: session ended, re-initiation outcome wrapped.
    Skipped { next: Box<CallOutcome> },
    /// User-actionable failure; `reason` is ready for display.
    Failed { reason: String },
}

impl CallOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CallOutcome::Failed { .. })
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        CallOutcome::Failed { reason: reason.into() }
    }

    /// Human-readable summary for the command layer.
    pub fn message(&self) -> String {
        match self {
            CallOutcome::Queued { position, queue_len } => format!(
                "Waiting for a match... you're #{position} of {queue_len} in the queue. Use /hangup to leave."
            ),
            CallOutcome::Connected { .. } => {
                "Connected! Say hi. Use /hangup to end the call or /skip to find someone else.".to_string()
            }
            CallOutcome::QueueLeft => "You left the call queue.".to_string(),
            CallOutcome::Ended { duration_secs, .. } => {
                format!("Call ended after {duration_secs}s. Use /call to start another.")
            }
            CallOutcome::Skipped { next } => match next.as_ref() {
                // Collapse hangup + queue-entry into one simplified message.
                CallOutcome::Queued { .. } => "Call ended. Looking for a new match...".to_string(),
                other => other.message(),
            },
            CallOutcome::Failed { reason } => reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(channel: &str, guild: &str, user: &str) -> CallRequest {
        CallRequest::new(channel, guild, user, "https://hooks.example/a")
    }

    #[test]
    fn test_session_from_match() {
        let a = request("chan-a", "guild-1", "user-1");
        let b = request("chan-b", "guild-2", "user-2");
        let session = CallSession::from_match(&a, &b);

        assert_eq!(session.status, CallStatus::Active);
        assert_eq!(session.participants.len(), 2);
        // The queued partner's request identity carries over.
        assert_eq!(session.id, b.id);
        assert_eq!(session.initiator_id, "user-2");
        assert!(session.participant("chan-a").unwrap().has_user("user-1"));
        assert!(session.participant("chan-b").unwrap().has_user("user-2"));
        assert_eq!(session.peer("chan-a").unwrap().channel_id, "chan-b");
    }

    #[test]
    fn test_end_is_monotonic() {
        let a = request("chan-a", "guild-1", "user-1");
        let b = request("chan-b", "guild-2", "user-2");
        let mut session = CallSession::from_match(&a, &b);

        assert!(session.end());
        let first_end = session.ended_at;
        assert!(!session.end());
        assert_eq!(session.ended_at, first_end);
        assert_eq!(session.status, CallStatus::Ended);
    }

    #[test]
    fn test_message_log_eviction() {
        let a = request("chan-a", "guild-1", "user-1");
        let b = request("chan-b", "guild-2", "user-2");
        let mut session = CallSession::from_match(&a, &b);

        for i in 0..101 {
            session.push_message(
                SessionMessage {
                    author_id: "user-1".to_string(),
                    author_name: "one".to_string(),
                    content: format!("msg {i}"),
                    timestamp: Utc::now(),
                    attachment_url: None,
                },
                100,
            );
        }

        assert_eq!(session.messages.len(), 100);
        // Oldest entry ("msg 0") was evicted, "msg 1" is now the front.
        assert_eq!(session.messages.front().unwrap().content, "msg 1");
        assert_eq!(session.messages.back().unwrap().content, "msg 100");
    }

    #[test]
    fn test_outcome_messages() {
        let queued = CallOutcome::Queued { position: 2, queue_len: 5 };
        assert!(queued.message().contains("#2 of 5"));

        let skipped = CallOutcome::Skipped { next: Box::new(queued) };
        assert_eq!(skipped.message(), "Call ended. Looking for a new match...");

        let skipped_connected = CallOutcome::Skipped {
            next: Box::new(CallOutcome::Connected { session_id: "s".to_string() }),
        };
        assert!(skipped_connected.message().contains("Connected"));

        assert!(CallOutcome::failed("nope").is_failure());
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [CallStatus::Queued, CallStatus::Active, CallStatus::Ended] {
            assert_eq!(CallStatus::from_str(status.as_str()), status);
        }
    }

    #[test]
    fn test_session_snapshot_roundtrip() {
        let a = request("chan-a", "guild-1", "user-1");
        let b = request("chan-b", "guild-2", "user-2");
        let session = CallSession::from_match(&a, &b);

        let json = serde_json::to_string(&session).unwrap();
        let parsed: CallSession = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, session.id);
        assert_eq!(parsed.participants.len(), 2);
    }
}
