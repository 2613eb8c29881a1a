//! Distributed Session State
//!
//! Optional mirror of active-session state across shard processes, so any
//! shard can resolve the session for a channel it owns. Writes are
//! best-effort and run alongside the authoritative cache writes; reads are
//! consulted only on a local cache miss. Unavailability is treated as a
//! cache miss, never an error.

use crate::types::{CallSession, SessionMessage};
use anyhow::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

/// Participant set transition mirrored across shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantChange {
    Joined,
    Left,
}

/// Cross-shard session state mirror.
#[async_trait]
pub trait DistributedState: Send + Sync {
    /// Mirror a session snapshot (called on match and on snapshot mutation).
    async fn publish_active_call(&self, session: &CallSession) -> Result<()>;

    /// Resolve the active session for a channel owned by another shard.
    async fn get_active_call_by_channel(&self, channel_id: &str) -> Result<Option<CallSession>>;

    /// Drop a session from the mirror (hangup/skip).
    async fn remove_active_call(&self, session_id: &str) -> Result<()>;

    /// Mirror a participant set change.
    async fn update_call_participant(
        &self,
        session_id: &str,
        channel_id: &str,
        user_id: &str,
        change: ParticipantChange,
    ) -> Result<()>;

    /// Mirror a relayed message into the session's rolling log.
    async fn add_call_message(&self, session_id: &str, message: &SessionMessage) -> Result<()>;
}

/// Redis-backed mirror.
///
/// Layout: `userphone:call:{id}` holds the JSON snapshot,
/// `userphone:channel:{channel_id}` indexes channel to session id. Both are
/// TTL-bounded so a crashed shard cannot leak sessions forever.
pub struct RedisCallState {
    conn: ConnectionManager,
    /// Safety-net expiry on mirrored entries.
    ttl_secs: u64,
    /// Rolling log cap, matching the cache snapshot.
    message_log_cap: usize,
}

impl RedisCallState {
    pub async fn connect(redis_url: &str, message_log_cap: usize) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        debug!("Connected to redis for distributed call state");
        Ok(Self {
            conn,
            ttl_secs: 24 * 60 * 60,
            message_log_cap,
        })
    }

    fn session_key(session_id: &str) -> String {
        format!("userphone:call:{session_id}")
    }

    fn channel_key(channel_id: &str) -> String {
        format!("userphone:channel:{channel_id}")
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<CallSession>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::session_key(session_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store_session(&self, session: &CallSession) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(session)?;
        let _: () = conn
            .set_ex(Self::session_key(&session.id), json, self.ttl_secs)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DistributedState for RedisCallState {
    async fn publish_active_call(&self, session: &CallSession) -> Result<()> {
        self.store_session(session).await?;

        let mut conn = self.conn.clone();
        for participant in &session.participants {
            let _: () = conn
                .set_ex(
                    Self::channel_key(&participant.channel_id),
                    session.id.clone(),
                    self.ttl_secs,
                )
                .await?;
        }
        Ok(())
    }

    async fn get_active_call_by_channel(&self, channel_id: &str) -> Result<Option<CallSession>> {
        let mut conn = self.conn.clone();
        let session_id: Option<String> = conn.get(Self::channel_key(channel_id)).await?;
        match session_id {
            Some(id) => self.load_session(&id).await,
            None => Ok(None),
        }
    }

    async fn remove_active_call(&self, session_id: &str) -> Result<()> {
        // Resolve channels from the snapshot before deleting it, so the
        // channel index never outlives the session entry.
        let session = self.load_session(session_id).await?;

        let mut conn = self.conn.clone();
        if let Some(session) = session {
            for participant in &session.participants {
                let _: () = conn.del(Self::channel_key(&participant.channel_id)).await?;
            }
        }
        let _: () = conn.del(Self::session_key(session_id)).await?;
        Ok(())
    }

    async fn update_call_participant(
        &self,
        session_id: &str,
        channel_id: &str,
        user_id: &str,
        change: ParticipantChange,
    ) -> Result<()> {
        let Some(mut session) = self.load_session(session_id).await? else {
            return Ok(());
        };

        if let Some(participant) = session.participant_mut(channel_id) {
            match change {
                ParticipantChange::Joined => {
                    if !participant.has_user(user_id) {
                        participant.users.push(user_id.to_string());
                    }
                }
                ParticipantChange::Left => {
                    participant.users.retain(|u| u != user_id);
                }
            }
        }

        self.store_session(&session).await
    }

    async fn add_call_message(&self, session_id: &str, message: &SessionMessage) -> Result<()> {
        let Some(mut session) = self.load_session(session_id).await? else {
            return Ok(());
        };

        session.push_message(message.clone(), self.message_log_cap);
        if let Some(participant) = session
            .participants
            .iter_mut()
            .find(|p| p.has_user(&message.author_id))
        {
            participant.message_count += 1;
        }

        self.store_session(&session).await
    }
}
