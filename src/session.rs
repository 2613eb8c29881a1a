//! Session Manager
//!
//! Owns the call lifecycle: initiate, match, relay, participant churn,
//! hangup, skip. Coordinates the queue, match engine, cache, repository,
//! notification gateway, and the optional distributed state mirror.
//!
//! Failure policy: every public operation catches internal errors, logs
//! them with context, and hands the caller a structured [`CallOutcome`].
//! Best-effort side channels (persistence, leaderboards, achievements)
//! never fail the primary operation.

use crate::cache::{active_call_key, ended_call_key, report_flag_key, TtlCache};
use crate::config::EngineConfig;
use crate::distributed::{DistributedState, ParticipantChange};
use crate::events::{CallEvent, CallEventBus};
use crate::gateway::{
    notify_best_effort, EventSink, LeaderboardKind, LeaderboardSink, LoggingSink,
    NotificationGateway, NotifyPayload,
};
use crate::matching::{MatchEngine, RecentMatches};
use crate::metrics::CallMetrics;
use crate::queue::CallQueue;
use crate::store::{CallStore, StoreError};
use crate::types::{CallOutcome, CallRequest, CallSession, SessionMessage};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// The call engine's core coordinator.
pub struct SessionManager {
    config: EngineConfig,
    queue: CallQueue,
    matcher: MatchEngine,
    cache: TtlCache,
    store: Arc<Mutex<CallStore>>,
    gateway: Arc<dyn NotificationGateway>,
    leaderboard: Arc<dyn LeaderboardSink>,
    sink: Arc<dyn EventSink>,
    distributed: Option<Arc<dyn DistributedState>>,
    metrics: Arc<CallMetrics>,
    bus: CallEventBus,
}

impl SessionManager {
    pub fn new(config: EngineConfig, store: CallStore, gateway: Arc<dyn NotificationGateway>) -> Self {
        let cache = TtlCache::new(100_000);
        let recent = RecentMatches::new(
            cache.clone(),
            config.recent_match_capacity,
            config.recent_match_ttl,
        );
        let metrics = Arc::new(CallMetrics::new(config.command_sla, config.matching_sla));

        Self {
            queue: CallQueue::new(),
            matcher: MatchEngine::new(recent),
            cache,
            store: Arc::new(Mutex::new(store)),
            gateway,
            leaderboard: Arc::new(LoggingSink),
            sink: Arc::new(LoggingSink),
            distributed: None,
            metrics,
            bus: CallEventBus::default(),
            config,
        }
    }

    /// Attach a cross-shard state mirror (clustered deployments).
    pub fn with_distributed(mut self, distributed: Arc<dyn DistributedState>) -> Self {
        self.distributed = Some(distributed);
        self
    }

    pub fn with_leaderboard(mut self, leaderboard: Arc<dyn LeaderboardSink>) -> Self {
        self.leaderboard = leaderboard;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn metrics(&self) -> &CallMetrics {
        &self.metrics
    }

    pub fn events(&self) -> &CallEventBus {
        &self.bus
    }

    pub fn queue(&self) -> &CallQueue {
        &self.queue
    }

    /// Repository handle, for moderation tooling and maintenance tasks.
    pub fn store(&self) -> Arc<Mutex<CallStore>> {
        Arc::clone(&self.store)
    }

    // ============ Public operations ============

    /// Start a call from a channel: queue it, or connect it immediately if
    /// a compatible partner is already waiting.
    pub async fn initiate_call(
        &self,
        channel_id: &str,
        guild_id: &str,
        initiator_id: &str,
    ) -> CallOutcome {
        let started = Instant::now();
        let outcome = match self.initiate_inner(channel_id, guild_id, initiator_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("initiate_call failed for channel {}: {:#}", channel_id, e);
                CallOutcome::failed("Something went wrong starting the call. Try /call again.")
            }
        };
        self.metrics.record_command(started.elapsed());
        outcome
    }

    /// End the call (or leave the queue) for a channel.
    pub async fn hangup(&self, channel_id: &str) -> CallOutcome {
        let started = Instant::now();
        let outcome = match self.hangup_inner(channel_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("hangup failed for channel {}: {:#}", channel_id, e);
                CallOutcome::failed("Something went wrong ending the call. Try /hangup again.")
            }
        };
        self.metrics.record_command(started.elapsed());
        outcome
    }

    /// End the current call and immediately look for a new partner.
    pub async fn skip(&self, channel_id: &str, user_id: &str) -> CallOutcome {
        let started = Instant::now();
        let outcome = match self.skip_inner(channel_id, user_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("skip failed for channel {}: {:#}", channel_id, e);
                CallOutcome::failed("Something went wrong skipping the call. Try /skip again.")
            }
        };
        self.metrics.record_command(started.elapsed());
        outcome
    }

    /// Mirror a user message to the other side of the channel's session.
    /// Silent no-op when the channel has no active session.
    pub async fn relay_message(
        &self,
        channel_id: &str,
        user_id: &str,
        username: &str,
        content: &str,
        attachment_url: Option<&str>,
    ) {
        let Some(mut session) = self.get_active_call(channel_id).await else {
            return;
        };

        let message = SessionMessage {
            author_id: user_id.to_string(),
            author_name: username.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            attachment_url: attachment_url.map(String::from),
        };

        let mut crossed_threshold = false;
        if let Some(participant) = session.participant_mut(channel_id) {
            participant.message_count += 1;
            if !participant.leaderboard_counted
                && participant.message_count >= self.config.min_messages_for_leaderboard
            {
                participant.leaderboard_counted = true;
                crossed_threshold = true;
            }
        }
        session.push_message(message.clone(), self.config.message_log_cap);

        self.write_active_snapshot(&session).await;

        // Relay to the paired channel.
        if let Some(peer) = session.peer(channel_id) {
            let relayed = match attachment_url {
                Some(url) => format!("{content}\n{url}"),
                None => content.to_string(),
            };
            notify_best_effort(
                self.gateway.as_ref(),
                &peer.webhook_url,
                NotifyPayload::relayed(relayed, username),
            )
            .await;
        }

        if crossed_threshold {
            let count = session
                .participant(channel_id)
                .map(|p| p.message_count)
                .unwrap_or_default();
            let guild_id = session
                .participant(channel_id)
                .map(|p| p.guild_id.clone())
                .unwrap_or_default();

            let leaderboard = Arc::clone(&self.leaderboard);
            let user = user_id.to_string();
            tokio::spawn(async move {
                leaderboard.update_leaderboard(LeaderboardKind::User, &user).await;
                leaderboard.update_leaderboard(LeaderboardKind::Guild, &guild_id).await;
            });

            let event = CallEvent::MessageMilestone {
                session_id: session.id.clone(),
                channel_id: channel_id.to_string(),
                user_id: user_id.to_string(),
                message_count: count,
            };
            self.sink.process_event(&event).await;
            self.bus.emit(event);
        }

        if let Some(distributed) = &self.distributed {
            let distributed = Arc::clone(distributed);
            let session_id = session.id.clone();
            let mirrored = message.clone();
            tokio::spawn(async move {
                if let Err(e) = distributed.add_call_message(&session_id, &mirrored).await {
                    warn!("Distributed message mirror failed: {:#}", e);
                }
            });
        }

        // Persist off the hot path. A session already cleaned up mid-write
        // is expected and swallowed.
        let store = Arc::clone(&self.store);
        let session_id = session.id.clone();
        tokio::spawn(async move {
            let store = store.lock().await;
            match store.append_message(&session_id, &message) {
                Ok(()) => {}
                Err(StoreError::CallNotFound(_)) => {
                    debug!("Dropped message persist for deleted call {}", session_id);
                }
                Err(e) => warn!("Message persist failed: {:#}", e),
            }
        });
    }

    /// Mark a user present on a channel's side. Returns whether a membership
    /// transition happened; re-adding a present user is a no-op and sends no
    /// notification.
    pub async fn add_participant(&self, channel_id: &str, user_id: &str) -> bool {
        let Some(mut session) = self.get_active_call(channel_id).await else {
            return false;
        };

        match session.participant_mut(channel_id) {
            Some(participant) if !participant.has_user(user_id) => {
                participant.users.push(user_id.to_string());
            }
            _ => return false,
        }

        self.write_active_snapshot(&session).await;
        self.mirror_participant(&session.id, channel_id, user_id, ParticipantChange::Joined);

        let store = Arc::clone(&self.store);
        let (session_id, channel, user) =
            (session.id.clone(), channel_id.to_string(), user_id.to_string());
        tokio::spawn(async move {
            let store = store.lock().await;
            if let Err(e) = store.upsert_participant_user(&session_id, &channel, &user) {
                warn!("Participant persist failed: {:#}", e);
            }
        });

        let leaderboard = Arc::clone(&self.leaderboard);
        let user = user_id.to_string();
        tokio::spawn(async move {
            leaderboard.update_leaderboard(LeaderboardKind::User, &user).await;
        });

        if let Some(peer) = session.peer(channel_id) {
            notify_best_effort(
                self.gateway.as_ref(),
                &peer.webhook_url,
                NotifyPayload::system("Someone joined the call on the other side."),
            )
            .await;
        }

        let event = CallEvent::ParticipantJoined {
            session_id: session.id.clone(),
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
        };
        self.sink.process_event(&event).await;
        self.bus.emit(event);
        true
    }

    /// Mark a present user as departed. Symmetric to [`add_participant`].
    pub async fn remove_participant(&self, channel_id: &str, user_id: &str) -> bool {
        let Some(mut session) = self.get_active_call(channel_id).await else {
            return false;
        };

        match session.participant_mut(channel_id) {
            Some(participant) if participant.has_user(user_id) => {
                participant.users.retain(|u| u != user_id);
            }
            _ => return false,
        }

        self.write_active_snapshot(&session).await;
        self.mirror_participant(&session.id, channel_id, user_id, ParticipantChange::Left);

        let store = Arc::clone(&self.store);
        let (session_id, channel, user) =
            (session.id.clone(), channel_id.to_string(), user_id.to_string());
        tokio::spawn(async move {
            let store = store.lock().await;
            if let Err(e) = store.mark_user_left(&session_id, &channel, &user, Utc::now().timestamp()) {
                warn!("Participant departure persist failed: {:#}", e);
            }
        });

        if let Some(peer) = session.peer(channel_id) {
            notify_best_effort(
                self.gateway.as_ref(),
                &peer.webhook_url,
                NotifyPayload::system("Someone left the call on the other side."),
            )
            .await;
        }

        let event = CallEvent::ParticipantLeft {
            session_id: session.id.clone(),
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
        };
        self.sink.process_event(&event).await;
        self.bus.emit(event);
        true
    }

    /// Resolve the active session for a channel: local cache first, then the
    /// distributed mirror. The database is deliberately not consulted here;
    /// a rare false "no session" right after a restart is the accepted price
    /// of sub-request-latency reads on every message.
    pub async fn get_active_call(&self, channel_id: &str) -> Option<CallSession> {
        if let Some(session) = self.cache.get::<CallSession>(&active_call_key(channel_id)).await {
            return Some(session);
        }

        let distributed = self.distributed.as_ref()?;
        match distributed.get_active_call_by_channel(channel_id).await {
            Ok(Some(session)) => {
                // Backfill the local cache with a short TTL only: the owning
                // shard clears the mirror on hangup but not this shard's
                // cache, so the mirror must stay authoritative here.
                self.cache
                    .set(
                        &active_call_key(channel_id),
                        &session,
                        Some(self.config.mirror_backfill_ttl),
                    )
                    .await;
                Some(session)
            }
            Ok(None) => None,
            Err(e) => {
                // Unavailable mirror is a cache miss, not an error.
                warn!("Distributed lookup failed for channel {}: {:#}", channel_id, e);
                None
            }
        }
    }

    /// Flag a session as reported, extending its post-hangup retention so
    /// moderators can review the message log.
    pub async fn report_session(&self, session_id: &str) {
        self.cache
            .set(
                &report_flag_key(session_id),
                &true,
                Some(self.config.reported_retention),
            )
            .await;

        // Already-ended snapshot gets its retention extended in place.
        let key = ended_call_key(session_id);
        if let Some(snapshot) = self.cache.get::<CallSession>(&key).await {
            self.cache
                .set(&key, &snapshot, Some(self.config.reported_retention))
                .await;
        }
        info!("Session {} flagged for moderation review", session_id);
    }

    /// An ended session's cached snapshot, while its retention lasts.
    pub async fn ended_snapshot(&self, session_id: &str) -> Option<CallSession> {
        self.cache.get(&ended_call_key(session_id)).await
    }

    /// Remove persisted ENDED sessions older than the configured age.
    pub async fn cleanup(&self) -> Result<usize> {
        let store = self.store.lock().await;
        store.cleanup_ended_before(self.config.cleanup_max_age)
    }

    // ============ Internals ============

    async fn initiate_inner(
        &self,
        channel_id: &str,
        guild_id: &str,
        initiator_id: &str,
    ) -> Result<CallOutcome> {
        if self.get_active_call(channel_id).await.is_some() {
            return Ok(CallOutcome::failed(
                "This channel is already in an active call. Use /hangup first.",
            ));
        }
        if self.queue.is_in_queue(channel_id).await {
            return Ok(CallOutcome::failed(
                "This channel is already waiting in the call queue. Use /hangup to leave it.",
            ));
        }

        let endpoint = match self.gateway.get_or_create_endpoint(channel_id, guild_id).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                return Ok(CallOutcome::failed(
                    "I couldn't set up a webhook in this channel. Check my permissions, then try /call again.",
                ));
            }
            Err(e) => {
                warn!("Endpoint provisioning failed for channel {}: {}", channel_id, e);
                return Ok(CallOutcome::failed(
                    "I couldn't set up a webhook in this channel. Check my permissions, then try /call again.",
                ));
            }
        };

        let request = CallRequest::new(channel_id, guild_id, initiator_id, &endpoint);

        if let Some(partner) = self.matcher.find_partner(&self.queue, &request).await {
            let session = CallSession::from_match(&request, &partner);

            // Partner waited in the queue since enqueue; that wait is the
            // match-acquisition latency.
            let waited = (Utc::now() - partner.enqueued_at)
                .to_std()
                .unwrap_or_default();
            self.metrics.record_match(waited);

            self.write_active_snapshot(&session).await;
            self.mirror_snapshot(&session);

            // Best-effort persistence; matching never blocks on the database.
            // The partner's creation record (written at enqueue) is activated
            // and the participants filled in.
            let store = Arc::clone(&self.store);
            let persisted = session.clone();
            tokio::spawn(async move {
                let store = store.lock().await;
                if let Err(e) = store
                    .activate_call(&persisted.id, persisted.started_at.timestamp())
                    .and_then(|_| store.create_call(&persisted))
                {
                    warn!("Call persist failed: {:#}", e);
                }
            });

            for participant in &session.participants {
                notify_best_effort(
                    self.gateway.as_ref(),
                    &participant.webhook_url,
                    NotifyPayload::system(
                        "Connected! Say hi. Use /hangup to end the call or /skip to find someone else.",
                    ),
                )
                .await;
            }

            info!(
                "Call {} connected: {} <-> {}",
                session.id, channel_id, partner.channel_id
            );

            let event = CallEvent::Matched {
                session_id: session.id.clone(),
                channel_ids: [channel_id.to_string(), partner.channel_id.clone()],
            };
            self.sink.process_event(&event).await;
            self.bus.emit(event);

            return Ok(CallOutcome::Connected { session_id: session.id });
        }

        let position = self.queue.enqueue(request.clone()).await;

        // Best-effort creation record for the queued request: activated when
        // the match lands, closed out if the channel hangs up first.
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let store = store.lock().await;
            if let Err(e) = store.create_queued_call(&request) {
                warn!("Queued call persist failed: {:#}", e);
            }
        });

        debug!("Channel {} queued at {}/{}", channel_id, position.position, position.queue_len);
        Ok(CallOutcome::Queued {
            position: position.position,
            queue_len: position.queue_len,
        })
    }

    async fn hangup_inner(&self, channel_id: &str) -> Result<CallOutcome> {
        if let Some(mut session) = self.get_active_call(channel_id).await {
            session.end();
            let duration_secs = session.duration_secs();

            if let Some(peer) = session.peer(channel_id) {
                notify_best_effort(
                    self.gateway.as_ref(),
                    &peer.webhook_url,
                    NotifyPayload::system(format!(
                        "The other side hung up after {duration_secs}s. Use /call to find a new match, or /report {} if something was wrong.",
                        session.id
                    )),
                )
                .await;
            }

            // Clear authoritative state before any lifecycle fan-out: a skip
            // arriving right after this must not see a stale active session.
            for participant in &session.participants {
                self.cache.remove(&active_call_key(&participant.channel_id)).await;
            }
            if let Some(distributed) = &self.distributed {
                if let Err(e) = distributed.remove_active_call(&session.id).await {
                    warn!("Distributed state clear failed for {}: {:#}", session.id, e);
                }
            }

            let reported = self.cache.contains(&report_flag_key(&session.id)).await;
            self.cache
                .set(
                    &ended_call_key(&session.id),
                    &session,
                    Some(self.config.retention_for(reported)),
                )
                .await;

            let store = Arc::clone(&self.store);
            let session_id = session.id.clone();
            let end_time = session.ended_at.unwrap_or_else(Utc::now).timestamp();
            tokio::spawn(async move {
                let store = store.lock().await;
                if let Err(e) = store.end_call(&session_id, end_time) {
                    warn!("Call end persist failed: {:#}", e);
                }
            });

            info!("Call {} ended after {}s", session.id, duration_secs);

            let event = CallEvent::Ended {
                session_id: session.id.clone(),
                duration_secs,
            };
            self.sink.process_event(&event).await;
            self.bus.emit(event);

            return Ok(CallOutcome::Ended { session_id: session.id, duration_secs });
        }

        if let Some(request) = self.queue.dequeue_by_channel(channel_id).await {
            let store = Arc::clone(&self.store);
            tokio::spawn(async move {
                let store = store.lock().await;
                if let Err(e) = store.end_call(&request.id, Utc::now().timestamp()) {
                    warn!("Queued record close persist failed: {:#}", e);
                }
            });
            debug!("Channel {} left the queue", channel_id);
            return Ok(CallOutcome::QueueLeft);
        }

        Ok(CallOutcome::failed(
            "There's no active call in this channel. Use /call to start one.",
        ))
    }

    async fn skip_inner(&self, channel_id: &str, user_id: &str) -> Result<CallOutcome> {
        // Capture the guild before hangup tears the state down.
        let guild_id = if let Some(session) = self.get_active_call(channel_id).await {
            session.participant(channel_id).map(|p| p.guild_id.clone())
        } else {
            self.queue.queue_status(channel_id).await.map(|r| r.guild_id)
        };

        let Some(guild_id) = guild_id else {
            return Ok(CallOutcome::failed(
                "There's no active call in this channel to skip. Use /call to start one.",
            ));
        };

        let hangup = self.hangup_inner(channel_id).await?;
        if hangup.is_failure() {
            return Ok(hangup);
        }

        let next = self.initiate_inner(channel_id, &guild_id, user_id).await?;
        if let CallOutcome::Failed { reason } = next {
            return Ok(CallOutcome::failed(format!(
                "Your call ended, but finding a new match failed: {reason}"
            )));
        }

        Ok(CallOutcome::Skipped { next: Box::new(next) })
    }

    /// Write the session snapshot under both channels' active keys.
    /// Last-write-wins; each side's events are serialized by its own shard.
    async fn write_active_snapshot(&self, session: &CallSession) {
        for participant in &session.participants {
            self.cache
                .set(&active_call_key(&participant.channel_id), session, None)
                .await;
        }
    }

    /// Mirror a full snapshot to the distributed state, best-effort.
    fn mirror_snapshot(&self, session: &CallSession) {
        if let Some(distributed) = &self.distributed {
            let distributed = Arc::clone(distributed);
            let mirrored = session.clone();
            tokio::spawn(async move {
                if let Err(e) = distributed.publish_active_call(&mirrored).await {
                    warn!("Distributed snapshot mirror failed: {:#}", e);
                }
            });
        }
    }

    fn mirror_participant(
        &self,
        session_id: &str,
        channel_id: &str,
        user_id: &str,
        change: ParticipantChange,
    ) {
        if let Some(distributed) = &self.distributed {
            let distributed = Arc::clone(distributed);
            let (session_id, channel_id, user_id) = (
                session_id.to_string(),
                channel_id.to_string(),
                user_id.to_string(),
            );
            tokio::spawn(async move {
                if let Err(e) = distributed
                    .update_call_participant(&session_id, &channel_id, &user_id, change)
                    .await
                {
                    warn!("Distributed participant mirror failed: {:#}", e);
                }
            });
        }
    }
}
