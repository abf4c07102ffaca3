//! Playback SDK facade crate.
//!
//! Host applications depend on `playback-sdk` and reach the individual
//! workspace crates (`bridge-traits`, `core-runtime`, `core-playback`)
//! through the re-exports below instead of wiring each crate by hand.

pub use bridge_traits;
pub use core_playback;
pub use core_runtime;

pub use core_playback::{PlaybackError, PlaybackOrchestrator, Snapshot};
pub use core_runtime::config::{PlaybackSettings, PlayerConfig};
pub use core_runtime::events::{CoreEvent, EngineState, EventBus, PlaybackEvent, SessionEvent};
