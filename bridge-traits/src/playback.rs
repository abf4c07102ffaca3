//! Playback bridge traits and the media types they exchange.
//!
//! Two capabilities are consumed by the playback core:
//!
//! - [`PlaybackInfoResolver`] turns a [`MediaRequest`] into a
//!   [`PlayableDescriptor`] (URL, codec, quality, license token).
//! - [`PlaybackBackend`] turns a descriptor into a [`BackendHandle`] and drives
//!   the platform decoder/renderer behind it.
//!
//! Backends report asynchronous status through the [`PlaybackMonitor`] they
//! receive with each `load` call. The monitor is a lookup-only reference: a
//! backend may keep calling it after the handle was unloaded, and the core
//! discards those reports.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Kind of product a [`MediaRequest`] points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Track,
    Video,
    Broadcast,
    /// Source-specific product kinds.
    Other(String),
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductType::Track => f.write_str("track"),
            ProductType::Video => f.write_str("video"),
            ProductType::Broadcast => f.write_str("broadcast"),
            ProductType::Other(kind) => f.write_str(kind),
        }
    }
}

/// What the caller wants to play. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRequest {
    pub product_type: ProductType,
    pub product_id: String,
    /// Source-specific extras (playlist context, referrer, ...).
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl MediaRequest {
    pub fn new(product_type: ProductType, product_id: impl Into<String>) -> Self {
        Self {
            product_type,
            product_id: product_id.into(),
            extras: BTreeMap::new(),
        }
    }

    /// Shorthand for a track request.
    pub fn track(product_id: impl Into<String>) -> Self {
        Self::new(ProductType::Track, product_id)
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}

/// Where the resolver should source the media from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    #[default]
    Stream,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    OnDemand,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioQuality {
    Low,
    High,
    Lossless,
    HiRes,
}

/// Resolver output. Produced once per session item and never mutated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayableDescriptor {
    pub product_id: String,
    pub url: String,
    pub codec: String,
    pub mime_type: String,
    pub quality: AudioQuality,
    pub stream_kind: StreamKind,
    pub mode: PlaybackMode,
    pub license_token: Option<String>,
    pub content_hash: Option<String>,
}

impl PlayableDescriptor {
    pub fn is_offline(&self) -> bool {
        self.mode == PlaybackMode::Offline
    }

    /// Live streams are never cached; on-demand content is keyed by its hash.
    pub fn cache_hint(&self) -> CacheHint {
        CacheHint {
            key: self.content_hash.clone(),
            cacheable: self.stream_kind == StreamKind::OnDemand,
        }
    }

    pub fn license_hint(&self) -> Option<LicenseHint> {
        self.license_token.as_ref().map(|token| LicenseHint {
            token: token.clone(),
        })
    }
}

impl fmt::Debug for PlayableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayableDescriptor")
            .field("product_id", &self.product_id)
            .field("url", &self.url)
            .field("codec", &self.codec)
            .field("mime_type", &self.mime_type)
            .field("quality", &self.quality)
            .field("stream_kind", &self.stream_kind)
            .field("mode", &self.mode)
            .field("license_token", &self.license_token.as_ref().map(|_| "[REDACTED]"))
            .field("content_hash", &self.content_hash)
            .finish()
    }
}

/// Hint telling the backend whether and under which key it may cache media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHint {
    pub key: Option<String>,
    pub cacheable: bool,
}

#[derive(Clone, PartialEq, Eq)]
pub struct LicenseHint {
    pub token: String,
}

impl fmt::Debug for LicenseHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LicenseHint { token: [REDACTED] }")
    }
}

/// Opaque handle a backend hands out for a loaded descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendHandle(u64);

impl BackendHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Status reports a backend delivers for one loaded handle.
#[derive(Debug)]
pub enum BackendEvent {
    Loaded { duration: Option<Duration> },
    Playing,
    Paused,
    Stalled,
    /// The media is fully buffered.
    Downloaded,
    Completed,
    Failed(crate::BridgeError),
    MetadataLoaded { tags: BTreeMap<String, String> },
}

impl BackendEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BackendEvent::Loaded { .. } => "loaded",
            BackendEvent::Playing => "playing",
            BackendEvent::Paused => "paused",
            BackendEvent::Stalled => "stalled",
            BackendEvent::Downloaded => "downloaded",
            BackendEvent::Completed => "completed",
            BackendEvent::Failed(_) => "failed",
            BackendEvent::MetadataLoaded { .. } => "metadata_loaded",
        }
    }
}

/// Sink a backend reports status into.
///
/// `report` must not block; implementations enqueue and return.
pub trait PlaybackMonitor: Send + Sync {
    fn report(&self, event: BackendEvent);
}

/// Trait for platform decoders/renderers.
///
/// Several backends may be registered; the core asks each one
/// [`can_play`](PlaybackBackend::can_play) once per load and keeps the chosen
/// backend for the lifetime of that handle.
#[async_trait::async_trait]
pub trait PlaybackBackend: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    fn can_play(&self, kind: StreamKind, codec: &str, mime_type: &str, is_offline: bool) -> bool;

    /// Whether a skip onto an already-loaded handle must pass through the
    /// stalled state before playback resumes.
    fn requires_stall_on_skip(&self) -> bool {
        false
    }

    /// Prepare a handle for `descriptor`. Status for the handle is reported
    /// through `monitor`.
    async fn load(
        &self,
        descriptor: &PlayableDescriptor,
        cache: CacheHint,
        license: Option<LicenseHint>,
        monitor: Arc<dyn PlaybackMonitor>,
    ) -> Result<BackendHandle>;

    async fn play(&self, handle: BackendHandle) -> Result<()>;

    async fn pause(&self, handle: BackendHandle) -> Result<()>;

    async fn seek(&self, handle: BackendHandle, position: Duration) -> Result<()>;

    /// Release the handle. Reports for it may still arrive afterwards.
    async fn unload(&self, handle: BackendHandle) -> Result<()>;

    /// Current playback position of the handle.
    async fn position(&self, handle: BackendHandle) -> Result<Duration>;
}

/// Resolves media requests into playable descriptors.
#[async_trait::async_trait]
pub trait PlaybackInfoResolver: Send + Sync {
    async fn resolve(&self, request: &MediaRequest, mode: PlaybackMode)
        -> Result<PlayableDescriptor>;
}
