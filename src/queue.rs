//! Call Queue
//!
//! FIFO pool of channels waiting for a match. Insertion order is the only
//! ordering guarantee; the match engine scans front-to-back. This layer has
//! no side effects beyond the queue itself.

use crate::types::CallRequest;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Result of inserting a request into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePosition {
    /// 1-based position at time of insertion.
    pub position: usize,
    /// Total queue length after insertion.
    pub queue_len: usize,
}

/// FIFO match queue, shared across command handlers.
#[derive(Clone, Default)]
pub struct CallQueue {
    inner: Arc<RwLock<VecDeque<CallRequest>>>,
}

impl CallQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request; returns its 1-based position and the new length.
    pub async fn enqueue(&self, request: CallRequest) -> QueuePosition {
        let mut queue = self.inner.write().await;
        queue.push_back(request);
        let len = queue.len();
        debug!("Queue: enqueued, length now {}", len);
        QueuePosition { position: len, queue_len: len }
    }

    /// True if any queued request belongs to this channel.
    pub async fn is_in_queue(&self, channel_id: &str) -> bool {
        let queue = self.inner.read().await;
        queue.iter().any(|r| r.channel_id == channel_id)
    }

    /// Remove and return the first request for this channel. Dequeue-by-value
    /// is the de-duplication mechanism for match races: the loser of a race
    /// sees `None` and moves on.
    pub async fn dequeue_by_channel(&self, channel_id: &str) -> Option<CallRequest> {
        let mut queue = self.inner.write().await;
        let idx = queue.iter().position(|r| r.channel_id == channel_id)?;
        let request = queue.remove(idx);
        debug!("Queue: dequeued channel {}", channel_id);
        request
    }

    /// The queued request for a channel, if any.
    pub async fn queue_status(&self, channel_id: &str) -> Option<CallRequest> {
        let queue = self.inner.read().await;
        queue.iter().find(|r| r.channel_id == channel_id).cloned()
    }

    /// Snapshot of the queue in insertion order, for match scanning.
    pub async fn snapshot(&self) -> Vec<CallRequest> {
        let queue = self.inner.read().await;
        queue.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(channel: &str) -> CallRequest {
        CallRequest::new(channel, "guild-1", "user-1", "https://hooks.example/x")
    }

    #[tokio::test]
    async fn test_enqueue_positions() {
        let queue = CallQueue::new();

        let first = queue.enqueue(request("a")).await;
        assert_eq!(first.position, 1);
        assert_eq!(first.queue_len, 1);

        let second = queue.enqueue(request("b")).await;
        assert_eq!(second.position, 2);
        assert_eq!(second.queue_len, 2);
    }

    #[tokio::test]
    async fn test_dequeue_by_channel() {
        let queue = CallQueue::new();
        queue.enqueue(request("a")).await;
        queue.enqueue(request("b")).await;

        assert!(queue.is_in_queue("a").await);
        let removed = queue.dequeue_by_channel("a").await.unwrap();
        assert_eq!(removed.channel_id, "a");
        assert!(!queue.is_in_queue("a").await);
        assert!(queue.dequeue_by_channel("a").await.is_none());
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_dequeue_removes_first_match_only() {
        let queue = CallQueue::new();
        queue.enqueue(request("a")).await;
        queue.enqueue(request("a")).await;

        assert!(queue.dequeue_by_channel("a").await.is_some());
        assert_eq!(queue.len().await, 1);
        assert!(queue.is_in_queue("a").await);
    }

    #[tokio::test]
    async fn test_queue_status() {
        let queue = CallQueue::new();
        assert!(queue.queue_status("a").await.is_none());

        queue.enqueue(request("a")).await;
        let status = queue.queue_status("a").await.unwrap();
        assert_eq!(status.channel_id, "a");
        assert_eq!(status.priority, 0);
    }

    #[tokio::test]
    async fn test_snapshot_preserves_fifo_order() {
        let queue = CallQueue::new();
        queue.enqueue(request("a")).await;
        queue.enqueue(request("b")).await;
        queue.enqueue(request("c")).await;

        let snapshot = queue.snapshot().await;
        let channels: Vec<_> = snapshot.iter().map(|r| r.channel_id.as_str()).collect();
        assert_eq!(channels, vec!["a", "b", "c"]);
    }
}
