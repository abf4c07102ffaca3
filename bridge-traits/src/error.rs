use thiserror::Error;

/// Network conditions a collaborator may report.
///
/// These are the only causes the orchestrator treats as retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailure {
    TimedOut,
    ConnectionLost,
    NotConnected,
}

impl std::fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            NetworkFailure::TimedOut => "request timed out",
            NetworkFailure::ConnectionLost => "connection lost",
            NetworkFailure::NotConnected => "no connectivity",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Network error: {0}")]
    Network(NetworkFailure),

    #[error("Streaming privileges were taken over by another device")]
    PrivilegesLost,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unsupported media: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Returns `true` for time-outs, connection loss and missing connectivity.
    pub fn is_network(&self) -> bool {
        matches!(self, BridgeError::Network(_))
    }

    /// Returns `true` when the operation was superseded rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BridgeError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
