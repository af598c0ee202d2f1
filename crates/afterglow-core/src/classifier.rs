//! Beat/intensity classifier
//!
//! Turns a stream of [`FeatureFrame`]s into a bounded intensity scalar and discrete
//! beat pulses. Output is throttled: no matter how fast frames arrive, at most one
//! [`IntensityReading`] is produced per throttle interval. Beat detection still sees
//! every frame, and a beat that lands in a throttled frame is carried into the next
//! reading.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::audio::FeatureFrame;

/// What drove a reading or a theme transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    /// Real audio analysis
    Analysis,
    /// Clock-driven fallback generator
    Synthetic,
    /// Explicit override
    Manual,
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analysis => write!(f, "analysis"),
            Self::Synthetic => write!(f, "synthetic"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Classifier tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Weight of RMS loudness
    pub rms_weight: f32,
    /// Weight of spectral flux (transients)
    pub flux_weight: f32,
    /// Weight of spectral centroid (brightness)
    pub centroid_weight: f32,
    /// Minimum interval between readings in milliseconds
    pub throttle_ms: u64,
    /// Frames in the rolling flux average
    pub beat_window: usize,
    /// Flux must exceed this multiple of the rolling average to count as a beat
    pub beat_threshold: f32,
    /// Absolute flux floor for beats
    pub beat_floor: f32,
    /// Refractory period between beats in milliseconds (200 ms = 300 BPM max)
    pub min_beat_interval_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rms_weight: 1.0,
            flux_weight: 0.6,
            centroid_weight: 0.3,
            throttle_ms: 150,
            beat_window: 16,
            beat_threshold: 1.5,
            beat_floor: 0.02,
            min_beat_interval_ms: 200,
        }
    }
}

impl ClassifierConfig {
    /// Throttle interval as a duration
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

/// One throttled classifier output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntensityReading {
    /// Intensity in `[0, 1]`
    pub intensity: f32,
    /// A beat was detected since the previous reading
    pub beat: bool,
    /// Beats detected this session
    pub beat_count: u64,
    /// Real or synthetic input
    pub source: SignalSource,
    /// Timestamp of the frame that produced the reading
    pub timestamp: Instant,
}

/// Clamp to `[0, 1]`, mapping NaN to zero
pub fn clamp01(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Stateful intensity and beat classifier
#[derive(Debug)]
pub struct IntensityClassifier {
    config: ClassifierConfig,
    flux_history: VecDeque<f32>,
    last_emit: Option<Instant>,
    last_beat: Option<Instant>,
    pending_beat: bool,
    beat_count: u64,
    latest: Option<IntensityReading>,
}

impl IntensityClassifier {
    /// Create a classifier
    pub fn new(config: ClassifierConfig) -> Self {
        let window = config.beat_window.max(2);
        Self {
            config,
            flux_history: VecDeque::with_capacity(window),
            last_emit: None,
            last_beat: None,
            pending_beat: false,
            beat_count: 0,
            latest: None,
        }
    }

    /// Instantaneous intensity of a frame, without throttling or state changes
    pub fn intensity(&self, frame: &FeatureFrame) -> f32 {
        let frame = frame.sanitized();
        if frame.is_synthetic() {
            // The generator already emits a normalized envelope
            return clamp01(frame.rms);
        }
        clamp01(
            frame.rms * self.config.rms_weight
                + frame.spectral_flux * self.config.flux_weight
                + frame.spectral_centroid * self.config.centroid_weight,
        )
    }

    /// Consume one frame. Returns a reading unless throttled.
    pub fn process(&mut self, frame: &FeatureFrame) -> Option<IntensityReading> {
        let clean = frame.sanitized();
        let now = clean.timestamp;

        if self.detect_beat(clean.spectral_flux, now) {
            self.pending_beat = true;
            self.beat_count += 1;
        }

        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.config.throttle() {
                return None;
            }
        }

        let reading = IntensityReading {
            intensity: self.intensity(&clean),
            beat: std::mem::take(&mut self.pending_beat),
            beat_count: self.beat_count,
            source: if clean.is_synthetic() {
                SignalSource::Synthetic
            } else {
                SignalSource::Analysis
            },
            timestamp: now,
        };
        trace!(
            "reading: intensity={:.3} beat={} source={}",
            reading.intensity,
            reading.beat,
            reading.source
        );

        self.last_emit = Some(now);
        self.latest = Some(reading);
        Some(reading)
    }

    /// Most recent emitted reading
    pub fn latest(&self) -> Option<IntensityReading> {
        self.latest
    }

    /// Beats detected this session
    pub fn beat_count(&self) -> u64 {
        self.beat_count
    }

    /// Onset detection against the rolling average of previous frames
    fn detect_beat(&mut self, flux: f32, now: Instant) -> bool {
        let window = self.config.beat_window.max(2);
        let average = if self.flux_history.is_empty() {
            0.0
        } else {
            self.flux_history.iter().sum::<f32>() / self.flux_history.len() as f32
        };
        let enough_history = self.flux_history.len() >= window / 2;

        self.flux_history.push_back(flux);
        while self.flux_history.len() > window {
            self.flux_history.pop_front();
        }

        if !enough_history {
            return false;
        }

        let cooled_down = self.last_beat.map_or(true, |last| {
            now.saturating_duration_since(last)
                >= Duration::from_millis(self.config.min_beat_interval_ms)
        });

        let is_beat = flux > average * self.config.beat_threshold
            && flux > self.config.beat_floor
            && cooled_down;

        if is_beat {
            self.last_beat = Some(now);
        }
        is_beat
    }
}

impl Default for IntensityClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}
