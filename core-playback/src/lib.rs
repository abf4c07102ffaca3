//! # Playback Session Orchestration
//!
//! Decides which media request is loaded and playing, which one is
//! pre-loaded for a gapless follow-on, and keeps telemetry, the
//! collaborative session and cross-device arbitration consistent with
//! playback state.
//!
//! ## Overview
//!
//! - [`PlaybackOrchestrator`] - public handle; every operation is queued onto
//!   a single ordered task
//! - [`state`] - pure `(EngineState, Input) -> Transition` reducer
//! - [`select_backend`] - picks the first backend whose `can_play` accepts a
//!   descriptor
//! - [`PlaybackError`] / [`FailureKind`] - failure taxonomy used for routing
//!
//! Decoding, DRM and caching live behind the `bridge_traits` capabilities.

pub mod backend;
pub mod error;
mod item;
mod metrics;
mod monitor;
pub mod orchestrator;
pub mod state;

pub use backend::select_backend;
pub use error::{FailureKind, PlaybackError, Result};
pub use item::{LoadToken, SessionId};
pub use orchestrator::{ItemSnapshot, PlaybackOrchestrator, Snapshot};
