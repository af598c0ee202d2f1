//! External music player supervision
//!
//! The player is reached through [`WidgetHost`] and [`PlayerWidget`]. The
//! [`WidgetSupervisor`] wraps every command in a timeout and retry, tracks
//! [`WidgetHealth`], and rebuilds the widget when it stops responding.

pub mod health;
pub mod http;
pub mod player;
pub mod retry;
pub mod supervisor;

pub use health::WidgetHealth;
pub use http::{HttpPlayerWidget, HttpWidgetHost, PlayerState};
pub use player::{PlayerWidget, WidgetEvent, WidgetHost};
pub use retry::{with_retry, with_timeout, Backoff};
pub use supervisor::{WidgetConfig, WidgetSupervisor};
