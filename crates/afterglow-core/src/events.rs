//! In-process publish/subscribe channel
//!
//! Components that are logically independent (theme, lighting, UI collaborators)
//! observe each other through an injected [`EventBus`] instead of holding direct
//! references. The bus is a `tokio::sync::broadcast` channel: slow subscribers
//! lag and skip events rather than block publishers.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::trace;

use crate::audio::FeatureFrame;
use crate::theme::ThemeChange;

/// Default capacity of the broadcast ring
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Health of the external player widget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Widget responds normally
    #[default]
    Healthy,
    /// Recent operations failed but the widget is still usable
    Degraded,
    /// Widget must be reinitialized before it is used again
    Failed,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Events exchanged between pipeline components and external collaborators
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// One analysis (or synthetic) frame
    FeatureFrame(FeatureFrame),
    /// Theme transitioned
    ThemeChanged(ThemeChange),
    /// Widget is permanently unusable for this session
    WidgetFailed {
        /// Human readable reason
        reason: String,
    },
    /// Widget reported a network problem
    WidgetNetworkError {
        /// Error description from the widget
        message: String,
    },
    /// Supervisor has torn down the stale binding and is re-running bring-up
    WidgetReinitializeRequested,
    /// Widget health status changed
    WidgetHealthChanged(HealthStatus),
}

impl PipelineEvent {
    /// Stable event name, as seen by external subscribers
    pub fn name(&self) -> &'static str {
        match self {
            Self::FeatureFrame(_) => "audio-feature-frame",
            Self::ThemeChanged(_) => "theme-changed",
            Self::WidgetFailed { .. } => "widget-failed",
            Self::WidgetNetworkError { .. } => "widget-network-error",
            Self::WidgetReinitializeRequested => "widget-reinitialize-requested",
            Self::WidgetHealthChanged(_) => "widget-health-changed",
        }
    }
}

/// Cloneable handle to the shared broadcast channel
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a bus with the given ring capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers that will see it.
    ///
    /// Publishing with no subscribers is not an error.
    pub fn publish(&self, event: PipelineEvent) -> usize {
        trace!("bus publish: {}", event.name());
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to all events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(
            PipelineEvent::WidgetReinitializeRequested.name(),
            "widget-reinitialize-requested"
        );
        assert_eq!(
            PipelineEvent::WidgetHealthChanged(HealthStatus::Degraded).name(),
            "widget-health-changed"
        );
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(PipelineEvent::WidgetReinitializeRequested), 0);
    }

    #[test]
    fn test_subscriber_receives() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(
            bus.publish(PipelineEvent::WidgetHealthChanged(HealthStatus::Failed)),
            1
        );
        match rx.try_recv() {
            Ok(PipelineEvent::WidgetHealthChanged(status)) => {
                assert_eq!(status, HealthStatus::Failed)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_health_status_display() {
        assert_eq!(HealthStatus::Degraded.to_string(), "degraded");
        assert_eq!(HealthStatus::default(), HealthStatus::Healthy);
    }
}
