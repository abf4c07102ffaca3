//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the playback SDK:
//! - Logging and tracing infrastructure
//! - Configuration management (collaborator injection + playback settings)
//! - Event bus used to notify listeners of playback changes
//!
//! ## Overview
//!
//! Nothing in this crate knows how playback is orchestrated. It establishes
//! the logging conventions, the fail-fast configuration contract and the
//! broadcast mechanism that `core-playback` builds on.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
