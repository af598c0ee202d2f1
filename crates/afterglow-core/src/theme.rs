//! Theme state machine
//!
//! Maps throttled intensity readings onto three discrete visual themes. A transition
//! fires only when the reading falls into a different band than the current theme and
//! the minimum interval since the previous transition has elapsed. Reconfirming the
//! current theme never produces an event.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::classifier::{IntensityReading, SignalSource};
use crate::events::{EventBus, PipelineEvent};

/// Discrete visual theme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Quiet passages
    #[default]
    Low,
    /// Typical dance-floor loudness
    Mid,
    /// Drops and peaks
    High,
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Mid => write!(f, "mid"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Band thresholds and transition pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    /// Intensity above which the theme is at least `Mid`
    pub mid_cut: f32,
    /// Intensity above which the theme is `High`
    pub high_cut: f32,
    /// Minimum time between two transitions in milliseconds
    pub min_change_interval_ms: u64,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            mid_cut: 0.35,
            high_cut: 0.7,
            min_change_interval_ms: 150,
        }
    }
}

impl ThemeConfig {
    /// Band containing `intensity`
    pub fn band_for(&self, intensity: f32) -> Theme {
        if intensity > self.high_cut {
            Theme::High
        } else if intensity > self.mid_cut {
            Theme::Mid
        } else {
            Theme::Low
        }
    }
}

/// Broadcast payload of a transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThemeChange {
    /// New theme
    pub theme: Theme,
    /// Theme before the transition
    pub previous: Theme,
    /// Intensity that caused the transition
    pub intensity: f32,
    /// Real analysis, synthetic fallback or manual override
    pub source: SignalSource,
    /// When the transition happened
    pub at: Instant,
}

/// Persisted theme state for the playing session
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IntensityState {
    /// Current theme
    pub theme: Theme,
    /// Last measured intensity
    pub intensity_value: f32,
    /// Time of the last transition
    pub last_change_at: Option<Instant>,
    /// Beats seen this session
    pub beat_count: u64,
}

type ThemeCallback = Box<dyn FnMut(&ThemeChange) + Send>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: BTreeMap<u64, ThemeCallback>,
}

/// Handle returned by [`ThemeStateMachine::subscribe`]
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    /// Stop receiving transitions
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.lock().callbacks.remove(&self.id);
        }
    }
}

/// Owns the theme decision for one session
pub struct ThemeStateMachine {
    config: ThemeConfig,
    state: IntensityState,
    subscribers: Arc<Mutex<Subscribers>>,
    bus: EventBus,
}

impl ThemeStateMachine {
    /// Create a machine in the initial `Low` state
    pub fn new(config: ThemeConfig, bus: EventBus) -> Self {
        Self {
            config,
            state: IntensityState::default(),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            bus,
        }
    }

    /// Current theme
    pub fn current_theme(&self) -> Theme {
        self.state.theme
    }

    /// Snapshot of the persisted state
    pub fn state(&self) -> IntensityState {
        self.state
    }

    /// Register a transition callback.
    ///
    /// Callbacks run synchronously inside [`update`](Self::update) and must not call
    /// [`Subscription::unsubscribe`] themselves.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(&ThemeChange) + Send + 'static,
    {
        let mut subscribers = self.subscribers.lock();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.callbacks.insert(id, Box::new(callback));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Number of registered callbacks
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().callbacks.len()
    }

    /// Apply a throttled reading
    pub fn update(&mut self, reading: &IntensityReading) -> Option<ThemeChange> {
        self.state.intensity_value = reading.intensity;
        self.state.beat_count = reading.beat_count;

        let target = self.config.band_for(reading.intensity);
        if target == self.state.theme {
            return None;
        }

        if self.within_min_interval(target, reading.timestamp) {
            return None;
        }
        Some(self.transition(target, reading.intensity, reading.source, reading.timestamp))
    }

    /// Force a theme.
    ///
    /// Only broadcasts when it differs from the current one, and like analysis
    /// updates it is refused until the minimum interval since the last
    /// transition has passed.
    pub fn override_theme(&mut self, theme: Theme, now: Instant) -> Option<ThemeChange> {
        if theme == self.state.theme || self.within_min_interval(theme, now) {
            return None;
        }
        let intensity = self.state.intensity_value;
        Some(self.transition(theme, intensity, SignalSource::Manual, now))
    }

    fn within_min_interval(&self, target: Theme, now: Instant) -> bool {
        let Some(last) = self.state.last_change_at else {
            return false;
        };
        let since = now.saturating_duration_since(last);
        if since < Duration::from_millis(self.config.min_change_interval_ms) {
            debug!(
                "Theme change to {} suppressed, last change {:?} ago",
                target, since
            );
            return true;
        }
        false
    }

    fn transition(
        &mut self,
        theme: Theme,
        intensity: f32,
        source: SignalSource,
        at: Instant,
    ) -> ThemeChange {
        let change = ThemeChange {
            theme,
            previous: self.state.theme,
            intensity,
            source,
            at,
        };
        info!(
            "Theme {} -> {} (intensity {:.2}, {})",
            change.previous, theme, intensity, source
        );

        self.state.theme = theme;
        self.state.last_change_at = Some(at);

        for callback in self.subscribers.lock().callbacks.values_mut() {
            callback(&change);
        }
        self.bus.publish(PipelineEvent::ThemeChanged(change));
        change
    }
}
