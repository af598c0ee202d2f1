//! Afterglow Control - lighting output and player supervision
//!
//! This crate drives everything outside the audio analysis itself:
//! - **DMX**: maps feature frames onto fixtures of a 512-channel universe and
//!   streams it to a lighting server
//! - **Widget**: keeps the external music player healthy with timeouts, retries,
//!   health probes and reinitialization
//!
//! ## Modules
//!
//! - [`dmx`] - fixtures, scenes, wire protocol and the DMX mapper
//! - [`widget`] - player seams, HTTP backend and the health supervisor
//! - [`error`] - Error types

#![allow(missing_docs)]

/// Error types
pub mod error;

/// DMX lighting output
pub mod dmx;

/// Player widget supervision
pub mod widget;

// Re-exports
pub use dmx::{ConnectionState, DmxMapper, FixtureSpec, LightingConfig};
pub use error::{ControlError, Result, WidgetError};
pub use widget::{WidgetConfig, WidgetHealth, WidgetSupervisor};
