//! Runtime errors raised while wiring the SDK together.
//!
//! These surface at construction time (config validation, logging setup);
//! playback failures use `core_playback::PlaybackError`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A setting is out of range or two settings contradict each other.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required host collaborator was not injected.
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    /// A global tracing subscriber is already installed.
    #[error("Logging already initialized")]
    LoggingInitialized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn capability_missing(capability: &str, message: impl Into<String>) -> Self {
        Error::CapabilityMissing {
            capability: capability.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
