//! # Session Items
//!
//! One media request's resolution, backend handle, metrics accumulator and
//! emitted-once lifecycle guarantee.
//!
//! ## Lifecycle records
//!
//! ```text
//! LifecycleStart → [Statistics → PlayLog → (OfflinePlay)] → LifecycleEnd
//! ```
//!
//! [`SessionItem::flush`] sends these at most once. Dropping an item that was
//! never flushed sends them from `Drop`, so an item that occupied a slot can
//! never leave without its records.

use crate::metrics::PlaybackMetrics;
use bridge_traits::metrics::{
    EndReason, MetricsRecord, OfflinePlayRecord, PlayLogEntry, PlaybackStatistics, StartReason,
};
use bridge_traits::{
    BackendHandle, Clock, MediaRequest, MetricsEmitter, PlayableDescriptor, PlaybackBackend,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a session item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identity carried by every asynchronous continuation of a load.
///
/// A result or backend report is applied only when an item in a slot still
/// has the same session id and load generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadToken {
    pub session_id: SessionId,
    pub generation: u64,
}

// ============================================================================
// Metrics reporting
// ============================================================================

/// Where an item sends its lifecycle records.
#[derive(Clone)]
pub(crate) struct MetricsReporter {
    pub emitter: Option<Arc<dyn MetricsEmitter>>,
    pub clock: Arc<dyn Clock>,
}

impl MetricsReporter {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Media a finished load produced.
pub(crate) struct LoadedMedia {
    pub descriptor: PlayableDescriptor,
    pub backend: Arc<dyn PlaybackBackend>,
    pub handle: BackendHandle,
}

impl fmt::Debug for LoadedMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedMedia")
            .field("descriptor", &self.descriptor)
            .field("backend", &self.backend.name())
            .field("handle", &self.handle)
            .finish()
    }
}

struct InFlightLoad {
    cancel: CancellationToken,
}

struct EndRecord {
    reason: EndReason,
    position_ms: u64,
    at: DateTime<Utc>,
}

// ============================================================================
// Session Item
// ============================================================================

pub(crate) struct SessionItem {
    id: SessionId,
    request: MediaRequest,
    start_reason: StartReason,
    start_timestamp: DateTime<Utc>,
    descriptor: Option<PlayableDescriptor>,
    backend: Option<Arc<dyn PlaybackBackend>>,
    handle: Option<BackendHandle>,
    duration: Option<Duration>,
    /// Generation of the most recent load dispatch.
    generation: u64,
    in_flight: Option<InFlightLoad>,
    /// The backend reported `Loaded` for the current handle.
    backend_ready: bool,
    loaded_notified: bool,
    /// Fully buffered.
    pub downloaded: bool,
    /// Start playback as soon as a handle exists.
    pub play_when_loaded: bool,
    /// The handle was lost to a transient failure; `play` reloads.
    pub needs_reload: bool,
    /// A pause was sent to the backend and not yet undone by `play`.
    pub pause_requested: bool,
    /// The collaborative session was told this item started.
    pub collab_started: bool,
    play_requested_at: Option<DateTime<Utc>>,
    metrics: Option<PlaybackMetrics>,
    end: Option<EndRecord>,
    emitted: bool,
    reporter: MetricsReporter,
}

impl SessionItem {
    pub fn new(
        request: MediaRequest,
        start_reason: StartReason,
        start_timestamp: DateTime<Utc>,
        reporter: MetricsReporter,
    ) -> Self {
        Self {
            id: SessionId::new(),
            request,
            start_reason,
            start_timestamp,
            descriptor: None,
            backend: None,
            handle: None,
            duration: None,
            generation: 0,
            in_flight: None,
            backend_ready: false,
            loaded_notified: false,
            downloaded: false,
            play_when_loaded: false,
            needs_reload: false,
            pause_requested: false,
            collab_started: false,
            play_requested_at: None,
            metrics: None,
            end: None,
            emitted: false,
            reporter,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn request(&self) -> &MediaRequest {
        &self.request
    }

    pub fn start_reason(&self) -> StartReason {
        self.start_reason
    }

    pub fn backend(&self) -> Option<&Arc<dyn PlaybackBackend>> {
        self.backend.as_ref()
    }

    pub fn handle(&self) -> Option<BackendHandle> {
        self.handle
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Still waiting on the first load: no handle has ever been attached.
    pub fn in_initial_load(&self) -> bool {
        self.is_loading() && self.descriptor.is_none()
    }

    pub fn matches_load(&self, token: &LoadToken) -> bool {
        self.id == token.session_id && self.is_loading() && self.generation == token.generation
    }

    /// Backend reports are tied to the generation that produced the handle.
    pub fn matches_report(&self, token: &LoadToken) -> bool {
        self.id == token.session_id && self.generation == token.generation
    }

    pub fn begin_load(&mut self, generation: u64, cancel: CancellationToken) {
        self.cancel_load();
        self.generation = generation;
        self.in_flight = Some(InFlightLoad { cancel });
        self.needs_reload = false;
        self.backend_ready = false;
        self.loaded_notified = false;
    }

    pub fn cancel_load(&mut self) {
        if let Some(load) = self.in_flight.take() {
            load.cancel.cancel();
        }
    }

    /// Load resolved; returns the stale handle this item held, if any.
    pub fn attach(&mut self, media: LoadedMedia) -> Option<(Arc<dyn PlaybackBackend>, BackendHandle)> {
        self.in_flight = None;
        let stale = self.detach();
        self.descriptor = Some(media.descriptor);
        self.backend = Some(media.backend);
        self.handle = Some(media.handle);
        stale
    }

    /// Load failed.
    pub fn load_failed(&mut self) {
        self.in_flight = None;
    }

    /// Drop the handle without unloading it; the caller releases it.
    pub fn detach(&mut self) -> Option<(Arc<dyn PlaybackBackend>, BackendHandle)> {
        self.backend_ready = false;
        match (self.backend.clone(), self.handle.take()) {
            (Some(backend), Some(handle)) => Some((backend, handle)),
            _ => None,
        }
    }

    /// Record a `Loaded` report. Returns `true` when listeners should be told.
    pub fn mark_backend_ready(&mut self, duration: Option<Duration>) -> bool {
        if duration.is_some() {
            self.duration = duration;
        }
        self.backend_ready = true;
        self.take_loaded_notification()
    }

    /// `true` exactly once per handle, when both the handle and the
    /// backend's `Loaded` report are in.
    pub fn take_loaded_notification(&mut self) -> bool {
        if self.handle.is_some() && self.backend_ready && !self.loaded_notified {
            self.loaded_notified = true;
            return true;
        }
        false
    }

    pub fn request_play(&mut self, timestamp: DateTime<Utc>) {
        self.play_when_loaded = true;
        self.pause_requested = false;
        self.play_requested_at.get_or_insert(timestamp);
    }

    /// Current playback position: the backend's when it answers, the last
    /// one recorded otherwise.
    pub async fn position(&self) -> Duration {
        if let (Some(backend), Some(handle)) = (&self.backend, self.handle) {
            match backend.position(handle).await {
                Ok(position) => return position,
                Err(e) => {
                    tracing::debug!(session_id = %self.id, error = %e, "Position query failed");
                }
            }
        }
        let last = self.metrics.as_ref().map_or(0, |m| m.last_position_ms);
        Duration::from_millis(last)
    }

    // ------------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------------

    pub fn record_playing(&mut self, position: Duration) {
        let now = self.reporter.now();
        let position_ms = millis(position);
        match self.metrics.as_mut() {
            Some(metrics) => metrics.playing(now, position_ms),
            None => {
                let started_at = self.play_requested_at.unwrap_or(now);
                self.metrics = Some(PlaybackMetrics::begin(started_at, now, position_ms));
            }
        }
    }

    pub fn record_paused(&mut self, position: Duration) {
        let now = self.reporter.now();
        if let Some(metrics) = self.metrics.as_mut() {
            metrics.paused(now, millis(position));
        }
    }

    pub fn record_stalled(&mut self, position: Duration) {
        let now = self.reporter.now();
        if let Some(metrics) = self.metrics.as_mut() {
            metrics.stalled(now, millis(position));
        }
    }

    pub fn record_seek(&mut self, position: Duration) {
        let now = self.reporter.now();
        if let Some(metrics) = self.metrics.as_mut() {
            metrics.seeked(now, millis(position));
        }
    }

    /// Record why and where the item stopped. The first call wins.
    pub fn finish(&mut self, reason: EndReason, position: Duration) {
        if self.end.is_some() {
            return;
        }
        let now = self.reporter.now();
        let position_ms = millis(position);
        if let Some(metrics) = self.metrics.as_mut() {
            metrics.finish(now, position_ms);
        }
        self.end = Some(EndRecord {
            reason,
            position_ms,
            at: now,
        });
    }

    /// Send the lifecycle records. No-op after the first call.
    pub fn flush(&mut self) {
        if self.emitted {
            return;
        }
        self.emitted = true;

        if self.end.is_none() {
            let last = self.metrics.as_ref().map_or(0, |m| m.last_position_ms);
            self.finish(EndReason::Stopped, Duration::from_millis(last));
        }

        let records = self.lifecycle_records();
        tracing::debug!(
            session_id = %self.id,
            product_id = %self.request.product_id,
            records = records.len(),
            "Flushing session metrics"
        );

        if let Some(emitter) = &self.reporter.emitter {
            for record in records {
                emitter.emit(record);
            }
        }
    }

    fn lifecycle_records(&self) -> Vec<MetricsRecord> {
        let session_id = self.id.to_string();
        let product_id = self.request.product_id.clone();
        let (end_reason, end_position_ms, ended_at) = match &self.end {
            Some(end) => (end.reason, end.position_ms, end.at),
            None => (EndReason::Stopped, 0, self.reporter.now()),
        };

        let mut records = vec![MetricsRecord::LifecycleStart {
            session_id: session_id.clone(),
            product_id: product_id.clone(),
            start_reason: self.start_reason,
            timestamp: self.start_timestamp,
        }];

        if let Some(metrics) = &self.metrics {
            let descriptor = self.descriptor.as_ref();
            records.push(MetricsRecord::Statistics(PlaybackStatistics {
                session_id: session_id.clone(),
                product_id: product_id.clone(),
                codec: descriptor.map(|d| d.codec.clone()),
                quality: descriptor.map(|d| d.quality),
                stream_kind: descriptor.map(|d| d.stream_kind),
                started_at: metrics.started_at,
                ended_at,
                end_reason,
                end_position_ms,
                pause_count: metrics.pause_count,
                seek_count: metrics.seek_count,
                stall_count: metrics.stall_count,
                stall_duration_ms: metrics.stall_duration_ms,
            }));
            records.push(MetricsRecord::PlayLog(PlayLogEntry {
                session_id: session_id.clone(),
                product_type: self.request.product_type.clone(),
                product_id: product_id.clone(),
                start_position_ms: metrics.start_position_ms,
                end_position_ms,
                actions: metrics.actions.clone(),
            }));
            if let Some(descriptor) = descriptor.filter(|d| d.is_offline()) {
                records.push(MetricsRecord::OfflinePlay(OfflinePlayRecord {
                    session_id: session_id.clone(),
                    product_id: product_id.clone(),
                    content_hash: descriptor.content_hash.clone(),
                    played_at: metrics.started_at,
                    listened_ms: metrics.listened_ms,
                }));
            }
        }

        records.push(MetricsRecord::LifecycleEnd {
            session_id,
            end_reason,
            timestamp: ended_at,
        });
        records
    }
}

impl Drop for SessionItem {
    fn drop(&mut self) {
        self.cancel_load();
        self.flush();
    }
}

impl fmt::Debug for SessionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionItem")
            .field("id", &self.id)
            .field("product_id", &self.request.product_id)
            .field("start_reason", &self.start_reason)
            .field("handle", &self.handle)
            .field("generation", &self.generation)
            .field("loading", &self.is_loading())
            .field("emitted", &self.emitted)
            .finish()
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
