//! # Host Bridge Traits
//!
//! Contracts between the playback core and the collaborators a host
//! application plugs in.
//!
//! ## Overview
//!
//! The playback core decides *what* plays and *when*; everything that touches
//! codecs, DRM, networks or other devices lives behind the traits in this
//! crate and is injected by the host through `core_runtime::config`.
//!
//! ## Traits
//!
//! ### Media
//! - [`PlaybackInfoResolver`](playback::PlaybackInfoResolver) - Request → playable descriptor
//! - [`PlaybackBackend`](playback::PlaybackBackend) - Decoder/renderer driving a loaded handle
//! - [`PlaybackMonitor`](playback::PlaybackMonitor) - Status sink handed to backends
//!
//! ### Sessions & Devices
//! - [`CollaborativeSession`](session::CollaborativeSession) - Shared listening session
//! - [`ExclusivityArbiter`](session::ExclusivityArbiter) - "Privileges lost" notifications
//! - [`CredentialsProvider`](session::CredentialsProvider) - Access tokens
//! - [`CrossDeviceHook`](session::CrossDeviceHook) - Playback interruption hook
//!
//! ### Telemetry & Utilities
//! - [`MetricsEmitter`](metrics::MetricsEmitter) - Lifecycle/statistics records
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! Every trait reports failures as [`BridgeError`](error::BridgeError). The
//! variant matters: the core classifies `Network`, `PrivilegesLost` and
//! `Cancelled` differently from everything else, so implementations should
//! map platform errors onto the most specific variant available.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`; the core shares collaborators across
//! tasks through `Arc`.

pub mod error;
pub mod metrics;
pub mod playback;
pub mod session;
pub mod time;

pub use error::{BridgeError, NetworkFailure};

// Re-export commonly used types
pub use metrics::{EndReason, MetricsEmitter, MetricsRecord, StartReason};
pub use playback::{
    AudioQuality, BackendEvent, BackendHandle, CacheHint, LicenseHint, MediaRequest,
    PlayableDescriptor, PlaybackBackend, PlaybackInfoResolver, PlaybackMode, PlaybackMonitor,
    ProductType, StreamKind,
};
pub use session::{
    AccessToken, CollaborativeSession, CredentialsProvider, CrossDeviceHook, CrossDeviceNotice,
    ExclusivityArbiter, InterruptionKind, PrivilegesLostNotice,
};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
