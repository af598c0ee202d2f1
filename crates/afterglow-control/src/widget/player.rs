//! Seams to the embedded music player

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::WidgetError;

/// Events emitted by a bound player widget
#[derive(Debug, Clone, PartialEq)]
pub enum WidgetEvent {
    Ready,
    Play,
    Pause,
    /// Current track ended
    Finish,
    /// The player reported an error
    Error(String),
    /// The player lost its connection to the streaming service
    NetworkError(String),
}

/// A bound player instance
#[async_trait]
pub trait PlayerWidget: Send {
    async fn play(&mut self) -> Result<(), WidgetError>;

    async fn pause(&mut self) -> Result<(), WidgetError>;

    async fn set_muted(&mut self, muted: bool) -> Result<(), WidgetError>;

    async fn seek(&mut self, position: Duration) -> Result<(), WidgetError>;

    /// Number of tracks in the loaded playlist
    async fn track_count(&mut self) -> Result<usize, WidgetError>;

    async fn skip_to(&mut self, index: usize) -> Result<(), WidgetError>;

    /// Playback position. Read-only, used as the health probe.
    async fn position(&mut self) -> Result<Duration, WidgetError>;

    /// Start forwarding player events to `events`
    fn bind_events(&mut self, events: mpsc::UnboundedSender<WidgetEvent>);

    /// Stop forwarding events
    fn unbind_events(&mut self);
}

/// Loads the player API and creates widgets
#[async_trait]
pub trait WidgetHost: Send + Sync {
    /// Load (or reload) the player API
    async fn load_api(&self) -> Result<(), WidgetError>;

    /// The API has been loaded
    fn api_present(&self) -> bool;

    /// The player reports it can accept a widget
    async fn is_ready(&self) -> bool;

    /// Create a fresh widget instance
    async fn bind(&self) -> Result<Box<dyn PlayerWidget>, WidgetError>;
}
