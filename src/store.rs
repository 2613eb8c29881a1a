//! Session Repository
//!
//! SQLite persistence for sessions, participants, present users, and relayed
//! message snapshots. The cache is the hot path; this store is written
//! best-effort off the request path and read only by moderation tooling and
//! the cleanup sweep.

use crate::types::{CallRequest, CallSession, CallStatus, SessionMessage};
use anyhow::Result;
use rusqlite::{params, Connection};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Errors that callers are expected to branch on.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Session row is gone (ended and cleaned up mid-write).
    #[error("call not found: {0}")]
    CallNotFound(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// SQLite-backed call store.
pub struct CallStore {
    conn: Connection,
}

impl CallStore {
    /// Open or create the call database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.init_schema()?;

        info!("Call store opened: {}", path.display());
        Ok(store)
    }

    /// In-memory store, used by tests and the cache-only deployment mode.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS calls (
                id TEXT PRIMARY KEY,
                initiator_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'QUEUED',
                start_time INTEGER,
                end_time INTEGER,
                created_at INTEGER NOT NULL DEFAULT (unixepoch())
            );

            CREATE INDEX IF NOT EXISTS idx_calls_status_end ON calls(status, end_time);

            CREATE TABLE IF NOT EXISTS call_participants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                call_id TEXT NOT NULL REFERENCES calls(id) ON DELETE CASCADE,
                channel_id TEXT NOT NULL,
                guild_id TEXT NOT NULL,
                webhook_url TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0,
                joined_at INTEGER NOT NULL DEFAULT (unixepoch()),
                left_at INTEGER,
                UNIQUE(call_id, channel_id)
            );

            CREATE TABLE IF NOT EXISTS call_participant_users (
                participant_id INTEGER NOT NULL REFERENCES call_participants(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                left_at INTEGER,
                PRIMARY KEY (participant_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS call_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                call_id TEXT NOT NULL REFERENCES calls(id) ON DELETE CASCADE,
                author_id TEXT NOT NULL,
                author_name TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                attachment_url TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_call_messages_call ON call_messages(call_id);
            "#,
        )?;
        Ok(())
    }

    /// Creation record for a request entering the queue. Never downgrades a
    /// row that already progressed past QUEUED.
    pub fn create_queued_call(&self, request: &CallRequest) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO calls (id, initiator_id, status, created_at)
            VALUES (?1, ?2, 'QUEUED', ?3)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                request.id,
                request.initiator_id,
                request.enqueued_at.timestamp(),
            ],
        )?;
        debug!("Persisted queued record {}", &request.id[..8.min(request.id.len())]);
        Ok(())
    }

    /// Persist a freshly matched session with both participants and their
    /// initial present users. A creation record persisted at enqueue time
    /// keeps its row; participants are filled in around it.
    pub fn create_call(&self, session: &CallSession) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO calls (id, initiator_id, status, start_time, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                session.id,
                session.initiator_id,
                session.status.as_str(),
                session.started_at.timestamp(),
                session.created_at.timestamp(),
            ],
        )?;

        for participant in &session.participants {
            tx.execute(
                r#"
                INSERT INTO call_participants (call_id, channel_id, guild_id, webhook_url, joined_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(call_id, channel_id) DO NOTHING
                "#,
                params![
                    session.id,
                    participant.channel_id,
                    participant.guild_id,
                    participant.webhook_url,
                    participant.joined_at.timestamp(),
                ],
            )?;

            let participant_id: i64 = tx.query_row(
                "SELECT id FROM call_participants WHERE call_id = ?1 AND channel_id = ?2",
                params![session.id, participant.channel_id],
                |row| row.get(0),
            )?;

            for user_id in &participant.users {
                tx.execute(
                    r#"
                    INSERT INTO call_participant_users (participant_id, user_id)
                    VALUES (?1, ?2)
                    ON CONFLICT(participant_id, user_id) DO UPDATE SET left_at = NULL
                    "#,
                    params![participant_id, user_id],
                )?;
            }
        }

        tx.commit()?;
        debug!("Persisted call {}", &session.id[..8.min(session.id.len())]);
        Ok(())
    }

    /// Transition a QUEUED creation record to ACTIVE with its start time.
    /// Called when the record's match lands; rows first written at match
    /// time are already ACTIVE and unaffected.
    pub fn activate_call(&self, session_id: &str, start_time: i64) -> Result<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE calls
            SET status = 'ACTIVE', start_time = ?2
            WHERE id = ?1 AND status = 'QUEUED'
            "#,
            params![session_id, start_time],
        )?;
        Ok(rows > 0)
    }

    /// Mark a call ENDED with its end time. Idempotent: the first transition
    /// wins, later calls leave the row untouched.
    pub fn end_call(&self, session_id: &str, end_time: i64) -> Result<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE calls
            SET status = 'ENDED', end_time = ?2
            WHERE id = ?1 AND status != 'ENDED'
            "#,
            params![session_id, end_time],
        )?;
        Ok(rows > 0)
    }

    /// Append a relayed message row. Fails with [`StoreError::CallNotFound`]
    /// when the session row is already gone; the session manager swallows
    /// that case.
    pub fn append_message(
        &self,
        session_id: &str,
        message: &SessionMessage,
    ) -> Result<(), StoreError> {
        let exists: bool = self
            .conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM calls WHERE id = ?1)",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(StoreError::Sqlite)?;

        if !exists {
            return Err(StoreError::CallNotFound(session_id.to_string()));
        }

        self.conn.execute(
            r#"
            INSERT INTO call_messages (call_id, author_id, author_name, content, timestamp, attachment_url)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                session_id,
                message.author_id,
                message.author_name,
                message.content,
                message.timestamp.timestamp(),
                message.attachment_url,
            ],
        )?;

        self.conn.execute(
            r#"
            UPDATE call_participants
            SET message_count = message_count + 1
            WHERE call_id = ?1
              AND channel_id = (
                  SELECT p.channel_id FROM call_participants p
                  JOIN call_participant_users u ON u.participant_id = p.id
                  WHERE p.call_id = ?1 AND u.user_id = ?2
                  LIMIT 1
              )
            "#,
            params![session_id, message.author_id],
        )?;

        Ok(())
    }

    /// Record a user as present on a participant side. Rejoin clears
    /// `left_at` (upsert semantics).
    pub fn upsert_participant_user(
        &self,
        session_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO call_participant_users (participant_id, user_id)
            SELECT id, ?3 FROM call_participants WHERE call_id = ?1 AND channel_id = ?2
            ON CONFLICT(participant_id, user_id) DO UPDATE SET left_at = NULL
            "#,
            params![session_id, channel_id, user_id],
        )?;
        Ok(())
    }

    /// Stamp a present user as departed.
    pub fn mark_user_left(
        &self,
        session_id: &str,
        channel_id: &str,
        user_id: &str,
        left_at: i64,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE call_participant_users
            SET left_at = ?4
            WHERE user_id = ?3
              AND participant_id = (
                  SELECT id FROM call_participants WHERE call_id = ?1 AND channel_id = ?2
              )
            "#,
            params![session_id, channel_id, user_id, left_at],
        )?;
        Ok(())
    }

    /// Load a persisted call's status and end time, for tests and tooling.
    pub fn call_status(&self, session_id: &str) -> Result<Option<(CallStatus, Option<i64>)>> {
        let result = self.conn.query_row(
            "SELECT status, end_time FROM calls WHERE id = ?1",
            params![session_id],
            |row| {
                let status: String = row.get(0)?;
                let end_time: Option<i64> = row.get(1)?;
                Ok((CallStatus::from_str(&status), end_time))
            },
        );

        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Count of persisted message rows for a session.
    pub fn message_count(&self, session_id: &str) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM call_messages WHERE call_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?)
    }

    /// A present user's `left_at`, if the row exists.
    pub fn user_left_at(
        &self,
        session_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<Option<Option<i64>>> {
        let result = self.conn.query_row(
            r#"
            SELECT u.left_at FROM call_participant_users u
            JOIN call_participants p ON p.id = u.participant_id
            WHERE p.call_id = ?1 AND p.channel_id = ?2 AND u.user_id = ?3
            "#,
            params![session_id, channel_id, user_id],
            |row| row.get::<_, Option<i64>>(0),
        );

        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Row counts by status, for the maintenance worker's sweep log.
    pub fn status_counts(&self) -> Result<(i64, i64)> {
        let active: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM calls WHERE status != 'ENDED'",
            [],
            |row| row.get(0),
        )?;
        let ended: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM calls WHERE status = 'ENDED'",
            [],
            |row| row.get(0),
        )?;
        Ok((active, ended))
    }

    /// Delete ENDED calls whose end time is older than `max_age`.
    /// Participants, users, and messages cascade. Returns rows removed.
    pub fn cleanup_ended_before(&self, max_age: Duration) -> Result<usize> {
        let cutoff = chrono::Utc::now().timestamp() - max_age.as_secs() as i64;
        let removed = self.conn.execute(
            "DELETE FROM calls WHERE status = 'ENDED' AND end_time IS NOT NULL AND end_time < ?1",
            params![cutoff],
        )?;

        if removed > 0 {
            info!("Cleanup: removed {} ended calls", removed);
        }
        Ok(removed)
    }
}
