//! Afterglow - session wiring for the audio-reactive pipeline
//!
//! Loads the TOML configuration, installs logging and runs one
//! [`SessionController`](session::SessionController) that connects the feature
//! source, the theme machine, the DMX mapper and the player supervisor.

pub mod config;
pub mod logging_setup;
pub mod session;
pub mod track;

pub use config::{AppConfig, Overrides};
pub use session::{SessionController, SessionSummary};
