//! Playback telemetry records and the sink that receives them.
//!
//! For every session item the core emits, exactly once:
//!
//! ```text
//! LifecycleStart → [Statistics → PlayLog → (OfflinePlay)] → LifecycleEnd
//! ```
//!
//! The bracketed records are only present when the item actually played.

use crate::playback::{AudioQuality, ProductType, StreamKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartReason {
    /// The user asked for this item.
    Explicit,
    /// The item was queued up by the SDK (preload, gapless follow-on).
    Implicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    Skipped,
    /// A new `load` replaced the item.
    Replaced,
    /// Pre-loaded but dropped before it was promoted.
    Discarded,
    Failed,
    /// Orchestrator reset or unloaded.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStatistics {
    pub session_id: String,
    pub product_id: String,
    pub codec: Option<String>,
    pub quality: Option<AudioQuality>,
    pub stream_kind: Option<StreamKind>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub end_position_ms: u64,
    pub pause_count: u32,
    pub seek_count: u32,
    pub stall_count: u32,
    pub stall_duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayLogActionKind {
    Start,
    Pause,
    Resume,
    Seek,
    Stall,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayLogAction {
    pub kind: PlayLogActionKind,
    pub position_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayLogEntry {
    pub session_id: String,
    pub product_type: ProductType,
    pub product_id: String,
    pub start_position_ms: u64,
    pub end_position_ms: u64,
    pub actions: Vec<PlayLogAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflinePlayRecord {
    pub session_id: String,
    pub product_id: String,
    pub content_hash: Option<String>,
    pub played_at: DateTime<Utc>,
    pub listened_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum MetricsRecord {
    LifecycleStart {
        session_id: String,
        product_id: String,
        start_reason: StartReason,
        timestamp: DateTime<Utc>,
    },
    Statistics(PlaybackStatistics),
    PlayLog(PlayLogEntry),
    OfflinePlay(OfflinePlayRecord),
    LifecycleEnd {
        session_id: String,
        end_reason: EndReason,
        timestamp: DateTime<Utc>,
    },
}

impl MetricsRecord {
    pub fn session_id(&self) -> &str {
        match self {
            MetricsRecord::LifecycleStart { session_id, .. }
            | MetricsRecord::LifecycleEnd { session_id, .. } => session_id,
            MetricsRecord::Statistics(stats) => &stats.session_id,
            MetricsRecord::PlayLog(log) => &log.session_id,
            MetricsRecord::OfflinePlay(offline) => &offline.session_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MetricsRecord::LifecycleStart { .. } => "lifecycle_start",
            MetricsRecord::Statistics(_) => "statistics",
            MetricsRecord::PlayLog(_) => "play_log",
            MetricsRecord::OfflinePlay(_) => "offline_play",
            MetricsRecord::LifecycleEnd { .. } => "lifecycle_end",
        }
    }
}

/// Fire-and-forget telemetry sink.
///
/// `emit` is called from the orchestrator's execution context and must not
/// block or call back into the orchestrator.
pub trait MetricsEmitter: Send + Sync {
    fn emit(&self, record: MetricsRecord);
}
