//! Match Engine
//!
//! Scans the call queue for a compatible partner, applying exclusion rules:
//! never the same guild, never the same initiating user, never a pair on
//! either side's recent-match cooldown list. First eligible candidate in
//! scan order wins; there is no fairness beyond FIFO.

use crate::cache::{recent_match_key, TtlCache};
use crate::queue::CallQueue;
use crate::types::CallRequest;
use std::time::Duration;
use tracing::debug;

/// Per-user short list of recently-paired counterpart user ids.
///
/// Most-recent-first, capped, TTL-bound from the most recent insertion.
/// Lives only in the cache, never in the relational store.
#[derive(Clone)]
pub struct RecentMatches {
    cache: TtlCache,
    capacity: usize,
    ttl: Duration,
}

impl RecentMatches {
    pub fn new(cache: TtlCache, capacity: usize, ttl: Duration) -> Self {
        Self { cache, capacity, ttl }
    }

    /// True if either user remembers the other.
    pub async fn contains_pair(&self, a: &str, b: &str) -> bool {
        let a_list: Vec<String> = self.cache.get(&recent_match_key(a)).await.unwrap_or_default();
        if a_list.iter().any(|u| u == b) {
            return true;
        }
        let b_list: Vec<String> = self.cache.get(&recent_match_key(b)).await.unwrap_or_default();
        b_list.iter().any(|u| u == a)
    }

    /// Record a pairing on both sides.
    pub async fn record_pair(&self, a: &str, b: &str) {
        self.push(a, b).await;
        self.push(b, a).await;
    }

    async fn push(&self, user: &str, counterpart: &str) {
        let key = recent_match_key(user);
        let mut list: Vec<String> = self.cache.get(&key).await.unwrap_or_default();
        list.retain(|u| u != counterpart);
        list.insert(0, counterpart.to_string());
        list.truncate(self.capacity);
        self.cache.set(&key, &list, Some(self.ttl)).await;
    }

    /// Current list for a user, most-recent-first.
    pub async fn list(&self, user: &str) -> Vec<String> {
        self.cache.get(&recent_match_key(user)).await.unwrap_or_default()
    }
}

/// Queue scanner applying the pairing exclusion rules.
#[derive(Clone)]
pub struct MatchEngine {
    recent: RecentMatches,
}

impl MatchEngine {
    pub fn new(recent: RecentMatches) -> Self {
        Self { recent }
    }

    pub fn recent(&self) -> &RecentMatches {
        &self.recent
    }

    /// Find the first eligible queued partner for `request` and remove it
    /// from the queue. The winning pair is recorded on both sides' cooldown
    /// lists. Returns None when nothing in the queue qualifies.
    pub async fn find_partner(
        &self,
        queue: &CallQueue,
        request: &CallRequest,
    ) -> Option<CallRequest> {
        let candidates = queue.snapshot().await;

        for candidate in candidates {
            if candidate.guild_id == request.guild_id {
                continue;
            }
            if candidate.initiator_id == request.initiator_id {
                continue;
            }
            if self
                .recent
                .contains_pair(&request.initiator_id, &candidate.initiator_id)
                .await
            {
                debug!(
                    "Match: skipping {} (recent-match cooldown with {})",
                    candidate.channel_id, request.channel_id
                );
                continue;
            }

            // Another handler may have matched this entry since the snapshot
            // was taken; losing the dequeue race means keep scanning.
            if queue.dequeue_by_channel(&candidate.channel_id).await.is_none() {
                continue;
            }

            self.recent
                .record_pair(&request.initiator_id, &candidate.initiator_id)
                .await;
            debug!("Match: {} paired with {}", request.channel_id, candidate.channel_id);
            return Some(candidate);
        }

        None
    }
}
