//! # Playback Error Types
//!
//! Errors raised by the orchestrator and the failure taxonomy used to route
//! them.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur during playback orchestration.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    /// The playback-info resolver rejected the request.
    #[error("Failed to resolve '{product_id}': {source}")]
    Resolve {
        product_id: String,
        #[source]
        source: BridgeError,
    },

    /// A backend call failed.
    #[error("Backend '{backend}' failed: {source}")]
    Backend {
        backend: String,
        #[source]
        source: BridgeError,
    },

    /// No registered backend accepted the descriptor.
    #[error("No backend can play {codec} ({mime_type})")]
    NoCompatibleBackend { codec: String, mime_type: String },

    // ========================================================================
    // Orchestrator Errors
    // ========================================================================
    #[error("No item loaded")]
    NoItemLoaded,

    /// The orchestrator was unloaded or its task ended.
    #[error("Playback orchestrator has shut down")]
    OrchestratorClosed,

    /// Superseded by a newer operation.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a failure is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Always swallowed.
    Cancellation,
    /// Time-out, connection loss, no connectivity. Retried by reissuing the load.
    TransientNetwork,
    /// Another device took over streaming.
    PrivilegesLost,
    /// Everything else.
    Fatal,
}

impl PlaybackError {
    pub fn resolve(product_id: impl Into<String>, source: BridgeError) -> Self {
        PlaybackError::Resolve {
            product_id: product_id.into(),
            source,
        }
    }

    pub fn backend(backend: impl Into<String>, source: BridgeError) -> Self {
        PlaybackError::Backend {
            backend: backend.into(),
            source,
        }
    }

    /// The collaborator error underneath, if any.
    pub fn bridge_error(&self) -> Option<&BridgeError> {
        match self {
            PlaybackError::Resolve { source, .. } | PlaybackError::Backend { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }

    pub fn classify(&self) -> FailureKind {
        if matches!(self, PlaybackError::Cancelled) {
            return FailureKind::Cancellation;
        }

        match self.bridge_error() {
            Some(BridgeError::Cancelled) => FailureKind::Cancellation,
            Some(BridgeError::Network(_)) => FailureKind::TransientNetwork,
            Some(BridgeError::PrivilegesLost) => FailureKind::PrivilegesLost,
            _ => FailureKind::Fatal,
        }
    }

    /// Returns `true` if this error is due to network issues.
    pub fn is_network_error(&self) -> bool {
        self.bridge_error().is_some_and(BridgeError::is_network)
    }

    /// Returns `true` if reissuing the load may succeed.
    pub fn is_transient(&self) -> bool {
        self.classify() == FailureKind::TransientNetwork
    }
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
