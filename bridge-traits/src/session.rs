//! Cross-device and shared-session collaborators.
//!
//! - [`CollaborativeSession`] mirrors playback into a shared listening session.
//! - [`ExclusivityArbiter`] tells the core when another device took over the
//!   account's streaming privileges. The core only reacts; it never polls.
//! - [`CredentialsProvider`] supplies the access token that gates the
//!   [`CrossDeviceHook`].

use crate::error::Result;
use crate::playback::MediaRequest;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Shared ("synchronized listening") session mirrored across participants.
#[async_trait::async_trait]
pub trait CollaborativeSession: Send + Sync {
    /// A new item started playing.
    async fn start(&self, request: &MediaRequest, position: Duration) -> Result<()>;

    async fn play(&self, request: &MediaRequest, position: Duration) -> Result<()>;

    async fn pause(&self, request: &MediaRequest, position: Duration) -> Result<()>;

    async fn stop(&self, request: &MediaRequest, position: Duration) -> Result<()>;

    /// Playback failed fatally; participants should drop the shared state.
    async fn reset(&self, reason: &str) -> Result<()>;
}

/// Notification that streaming privileges moved to another device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegesLostNotice {
    /// Display name of the device that took over, when known.
    pub taken_by: Option<String>,
}

pub trait ExclusivityArbiter: Send + Sync {
    /// Stream of privilege-loss notifications. Called once per orchestrator.
    fn notifications(&self) -> BoxStream<'static, PrivilegesLostNotice>;
}

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait::async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn get_token(&self) -> Result<AccessToken>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptionKind {
    Paused,
    Stalled,
}

/// Payload handed to the [`CrossDeviceHook`] when playback stops advancing.
#[derive(Debug, Clone)]
pub struct CrossDeviceNotice {
    pub session_id: String,
    pub request: MediaRequest,
    pub kind: InterruptionKind,
    pub position: Duration,
    pub token: AccessToken,
}

/// Host hook invoked when playback leaves `Playing` for `Paused`/`Stalled`.
#[async_trait::async_trait]
pub trait CrossDeviceHook: Send + Sync {
    async fn playback_interrupted(&self, notice: CrossDeviceNotice) -> Result<()>;
}
