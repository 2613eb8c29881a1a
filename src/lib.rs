//! Userphone Call Engine
//!
//! Matchmaking and session relay engine for pairing two chat channels into
//! an ephemeral "call": a FIFO queue of waiting channels, a match engine
//! with exclusion rules, and a session manager that relays messages between
//! the paired sides via webhooks while tracking lifecycle and participants.
//!
//! # Features
//!
//! - **Matchmaking**: FIFO queue scan with same-guild, same-initiator, and
//!   recent-match cooldown exclusions
//! - **Session lifecycle**: connect, relay, participant churn, hangup, skip
//! - **Tagged outcomes**: callers branch on [`CallOutcome`] variants, never
//!   on message text
//! - **TTL caching**: active snapshots plus report-aware ended-session
//!   retention (moka)
//! - **Distributed state**: optional redis mirror so any shard can resolve
//!   a session for a channel it owns
//! - **Persistence**: SQLite session/message audit trail with age-based
//!   cleanup
//! - **Metrics**: rolling latency windows with SLA flags
//!
//! # Architecture
//!
//! ```text
//! /call ──► SessionManager ──► CallQueue ──► MatchEngine
//!                 │                              │
//!                 │           ┌── on match ──────┘
//!                 ├── TtlCache (active/ended/recent, TTL)
//!                 ├── RedisCallState (optional cross-shard mirror)
//!                 ├── CallStore (SQLite audit + cleanup)
//!                 ├── NotificationGateway (webhooks)
//!                 ├── CallEventBus (typed lifecycle fan-out)
//!                 └── CallMetrics (latency SLAs)
//! ```

pub mod cache;
pub mod config;
pub mod distributed;
pub mod events;
pub mod gateway;
pub mod matching;
pub mod metrics;
pub mod queue;
pub mod session;
pub mod store;
pub mod types;

pub use cache::TtlCache;
pub use config::EngineConfig;
pub use distributed::{DistributedState, ParticipantChange, RedisCallState};
pub use events::{CallEvent, CallEventBus};
pub use gateway::{
    EventSink, LeaderboardKind, LeaderboardSink, NotificationGateway, NotifyError, NotifyPayload,
    WebhookGateway,
};
pub use matching::{MatchEngine, RecentMatches};
pub use metrics::{CallMetrics, MetricsReport, MetricsSnapshot};
pub use queue::{CallQueue, QueuePosition};
pub use session::SessionManager;
pub use store::{CallStore, StoreError};
pub use types::{CallOutcome, CallRequest, CallSession, CallStatus, Participant, SessionMessage};
