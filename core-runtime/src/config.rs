//! # Player Configuration
//!
//! Builder for the [`PlayerConfig`] the host hands to the playback
//! orchestrator. It carries every injected collaborator plus the
//! [`PlaybackSettings`] knobs.
//!
//! ## Required Capabilities
//!
//! - `PlaybackInfoResolver` - turns media requests into playable descriptors
//! - at least one `PlaybackBackend` - decodes and renders loaded handles
//!
//! ## Optional Capabilities
//!
//! - `MetricsEmitter` - lifecycle and statistics records (dropped when absent)
//! - `CollaborativeSession` - shared listening session mirror
//! - `ExclusivityArbiter` - "privileges lost" notifications
//! - `CredentialsProvider` + `CrossDeviceHook` - playback interruption hook
//! - `Clock` - defaults to [`SystemClock`]
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{MetricsFlushPolicy, PlaybackSettings, PlayerConfig};
//! use std::sync::Arc;
//!
//! let config = PlayerConfig::builder()
//!     .resolver(Arc::new(MyResolver))
//!     .backend(Arc::new(MyBackend))
//!     .metrics(Arc::new(MyMetrics))
//!     .settings(PlaybackSettings {
//!         metrics_flush: MetricsFlushPolicy::OnTeardown,
//!         ..PlaybackSettings::default()
//!     })
//!     .build()?;
//! ```
//!
//! Missing required capabilities fail fast with
//! [`Error::CapabilityMissing`](crate::Error::CapabilityMissing).

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{
    Clock, CollaborativeSession, CredentialsProvider, CrossDeviceHook, ExclusivityArbiter,
    MetricsEmitter, PlaybackBackend, PlaybackInfoResolver, PlaybackMode, SystemClock,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// When an outgoing item's lifecycle metrics are flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsFlushPolicy {
    /// As soon as the item leaves its slot.
    #[default]
    Immediate,
    /// When the item itself is dropped.
    OnTeardown,
}

/// When a `set_next` request starts loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreloadPolicy {
    /// Wait until the current item reports it is fully buffered.
    #[default]
    WhenBuffered,
    /// Start loading the next item right away.
    Eager,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Mode passed to the resolver for every request.
    pub playback_mode: PlaybackMode,
    pub metrics_flush: MetricsFlushPolicy,
    pub preload: PreloadPolicy,
    /// Capacity of the listener broadcast channel.
    pub event_buffer_size: usize,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            playback_mode: PlaybackMode::Stream,
            metrics_flush: MetricsFlushPolicy::Immediate,
            preload: PreloadPolicy::WhenBuffered,
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
        }
    }
}

/// Everything the playback orchestrator needs, injected by the host.
#[derive(Clone)]
pub struct PlayerConfig {
    pub resolver: Arc<dyn PlaybackInfoResolver>,
    /// Registered backends, asked in order.
    pub backends: Vec<Arc<dyn PlaybackBackend>>,
    pub metrics: Option<Arc<dyn MetricsEmitter>>,
    pub collaborative_session: Option<Arc<dyn CollaborativeSession>>,
    pub exclusivity: Option<Arc<dyn ExclusivityArbiter>>,
    pub credentials: Option<Arc<dyn CredentialsProvider>>,
    pub cross_device_hook: Option<Arc<dyn CrossDeviceHook>>,
    pub clock: Arc<dyn Clock>,
    pub settings: PlaybackSettings,
}

impl fmt::Debug for PlayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backend_names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("PlayerConfig")
            .field("backends", &backend_names)
            .field("metrics", &self.metrics.is_some())
            .field("collaborative_session", &self.collaborative_session.is_some())
            .field("exclusivity", &self.exclusivity.is_some())
            .field("credentials", &self.credentials.is_some())
            .field("cross_device_hook", &self.cross_device_hook.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

impl PlayerConfig {
    pub fn builder() -> PlayerConfigBuilder {
        PlayerConfigBuilder::default()
    }

    /// Checks:
    /// - at least one backend is registered
    /// - the event buffer is non-empty
    /// - a cross-device hook comes with a credentials provider
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(backend_missing_error());
        }

        if self.settings.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.cross_device_hook.is_some() && self.credentials.is_none() {
            return Err(Error::Config(
                "CrossDeviceHook configured but no CredentialsProvider provided. \
                 Inject a CredentialsProvider or drop the hook."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn resolver_missing_error() -> Error {
    Error::capability_missing(
        "PlaybackInfoResolver",
        "A PlaybackInfoResolver is required to turn media requests into playable \
         descriptors. Use .resolver() to inject one.",
    )
}

fn backend_missing_error() -> Error {
    Error::capability_missing(
        "PlaybackBackend",
        "At least one PlaybackBackend is required. Use .backend() to register the \
         platform decoder/renderer.",
    )
}

#[derive(Default)]
pub struct PlayerConfigBuilder {
    resolver: Option<Arc<dyn PlaybackInfoResolver>>,
    backends: Vec<Arc<dyn PlaybackBackend>>,
    metrics: Option<Arc<dyn MetricsEmitter>>,
    collaborative_session: Option<Arc<dyn CollaborativeSession>>,
    exclusivity: Option<Arc<dyn ExclusivityArbiter>>,
    credentials: Option<Arc<dyn CredentialsProvider>>,
    cross_device_hook: Option<Arc<dyn CrossDeviceHook>>,
    clock: Option<Arc<dyn Clock>>,
    settings: PlaybackSettings,
}

impl PlayerConfigBuilder {
    pub fn resolver(mut self, resolver: Arc<dyn PlaybackInfoResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Register a backend. Backends are asked `can_play` in registration order.
    pub fn backend(mut self, backend: Arc<dyn PlaybackBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsEmitter>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn collaborative_session(mut self, session: Arc<dyn CollaborativeSession>) -> Self {
        self.collaborative_session = Some(session);
        self
    }

    pub fn exclusivity(mut self, arbiter: Arc<dyn ExclusivityArbiter>) -> Self {
        self.exclusivity = Some(arbiter);
        self
    }

    pub fn credentials(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    pub fn cross_device_hook(mut self, hook: Arc<dyn CrossDeviceHook>) -> Self {
        self.cross_device_hook = Some(hook);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn settings(mut self, settings: PlaybackSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn playback_mode(mut self, mode: PlaybackMode) -> Self {
        self.settings.playback_mode = mode;
        self
    }

    pub fn metrics_flush(mut self, policy: MetricsFlushPolicy) -> Self {
        self.settings.metrics_flush = policy;
        self
    }

    pub fn preload(mut self, policy: PreloadPolicy) -> Self {
        self.settings.preload = policy;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.settings.event_buffer_size = size;
        self
    }

    pub fn build(self) -> Result<PlayerConfig> {
        let resolver = self.resolver.ok_or_else(resolver_missing_error)?;

        let config = PlayerConfig {
            resolver,
            backends: self.backends,
            metrics: self.metrics,
            collaborative_session: self.collaborative_session,
            exclusivity: self.exclusivity,
            credentials: self.credentials,
            cross_device_hook: self.cross_device_hook,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            settings: self.settings,
        };

        config.validate()?;

        Ok(config)
    }
}
