//! Feature source: bridges a playing audio element to the analysis engine
//!
//! The source owns exactly one processing context per session. Frames are handed to
//! every registered sink and re-broadcast on the [`EventBus`] so consumers that are
//! not wired to the source directly can still observe them.
//!
//! The analysis strategy is a tagged variant. It starts `Unattached`, becomes `Engine`
//! on a successful attach, and is swapped to `Synthetic` at most once, when the engine
//! is unavailable or has failed too often. That swap is never undone.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::engine::{
    AnalysisEngine, EngineLoadError, SpectralEngine, ANALYSIS_BUFFER_SIZE, MIN_BUFFER_SIZE,
};
use super::frame::FeatureFrame;
use super::synthetic::SyntheticGenerator;
use crate::events::{EventBus, PipelineEvent};

/// Descriptor of the playable element feeding the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioElement {
    /// Stable identifier (file path, stream URL, embed id)
    pub id: String,
    /// Sample rate of the decoded mono stream
    pub sample_rate: u32,
}

impl AudioElement {
    /// Create an element descriptor
    pub fn new(id: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            id: id.into(),
            sample_rate,
        }
    }

    /// Wall-clock duration of one analysis buffer
    pub fn buffer_duration(&self, buffer_size: usize) -> Duration {
        Duration::from_secs_f64(buffer_size as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Feature source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSourceConfig {
    /// Samples per analysis buffer
    pub buffer_size: usize,
    /// Engine failures tolerated before the permanent switch to synthetic frames
    pub max_engine_failures: u32,
    /// Cadence of synthetic frames in milliseconds
    pub synthetic_interval_ms: u64,
}

impl Default for FeatureSourceConfig {
    fn default() -> Self {
        Self {
            buffer_size: ANALYSIS_BUFFER_SIZE,
            max_engine_failures: 5,
            synthetic_interval_ms: 200,
        }
    }
}

impl FeatureSourceConfig {
    /// Samples per analysis buffer, never below [`MIN_BUFFER_SIZE`]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size.max(MIN_BUFFER_SIZE)
    }

    /// Synthetic cadence as a duration, at least one millisecond
    pub fn synthetic_interval(&self) -> Duration {
        Duration::from_millis(self.synthetic_interval_ms.max(1))
    }
}

/// Shared audio-processing context: the element, its engine and the pending samples
pub struct ProcessingContext {
    element: AudioElement,
    engine: Box<dyn AnalysisEngine>,
    pending: Vec<f32>,
}

impl ProcessingContext {
    /// Element this context is attached to
    pub fn element(&self) -> &AudioElement {
        &self.element
    }
}

impl Drop for ProcessingContext {
    fn drop(&mut self) {
        debug!("Processing context for '{}' disposed", self.element.id);
    }
}

/// Which analysis path is active
pub enum AnalysisStrategy {
    /// No context yet: consumers see "no signal"
    Unattached,
    /// Real engine attached to an element
    Engine(ProcessingContext),
    /// Permanent fallback for the rest of the session
    Synthetic {
        /// Envelope generator
        generator: SyntheticGenerator,
        /// Last synthetic emission
        last_emit: Option<Instant>,
    },
}

impl AnalysisStrategy {
    /// Short label for logs and introspection
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unattached => "unattached",
            Self::Engine(_) => "engine",
            Self::Synthetic { .. } => "synthetic",
        }
    }
}

type FrameSink = Box<dyn FnMut(&FeatureFrame) + Send>;

/// Produces [`FeatureFrame`]s from an attached element
pub struct FeatureSource {
    config: FeatureSourceConfig,
    strategy: AnalysisStrategy,
    sinks: Vec<FrameSink>,
    bus: EventBus,
    engine_failures: u32,
    frames_emitted: u64,
}

impl FeatureSource {
    /// Create an unattached source publishing on `bus`
    pub fn new(config: FeatureSourceConfig, bus: EventBus) -> Self {
        Self {
            config,
            strategy: AnalysisStrategy::Unattached,
            sinks: Vec::new(),
            bus,
            engine_failures: 0,
            frames_emitted: 0,
        }
    }

    /// Attach `element`, constructing the engine through `loader`.
    ///
    /// A second attach while a context exists (or after the synthetic switch) is a no-op.
    /// Load problems are logged, never returned.
    pub fn attach<F>(&mut self, element: AudioElement, loader: F)
    where
        F: FnOnce(usize) -> std::result::Result<Box<dyn AnalysisEngine>, EngineLoadError>,
    {
        match &self.strategy {
            AnalysisStrategy::Engine(ctx) => {
                debug!(
                    "Feature source already attached to '{}', ignoring attach of '{}'",
                    ctx.element.id, element.id
                );
                return;
            }
            AnalysisStrategy::Synthetic { .. } => {
                debug!(
                    "Feature source is synthetic for this session, ignoring attach of '{}'",
                    element.id
                );
                return;
            }
            AnalysisStrategy::Unattached => {}
        }

        let buffer_size = self.config.buffer_size();
        match loader(buffer_size) {
            Ok(engine) => {
                if engine.buffer_size() != buffer_size {
                    warn!(
                        "Engine buffer size {} differs from configured {}",
                        engine.buffer_size(),
                        buffer_size
                    );
                }
                info!(
                    "Feature source attached to '{}' ({} Hz, buffer {})",
                    element.id,
                    element.sample_rate,
                    engine.buffer_size()
                );
                self.strategy = AnalysisStrategy::Engine(ProcessingContext {
                    element,
                    engine,
                    pending: Vec::with_capacity(buffer_size * 2),
                });
            }
            Err(EngineLoadError::Unavailable(reason)) => {
                warn!("Analysis engine unavailable ({}), using synthetic frames", reason);
                self.switch_to_synthetic(Instant::now());
            }
            Err(e @ EngineLoadError::Init(_)) => {
                warn!("Failed to attach '{}': {}", element.id, e);
                self.record_engine_failure();
            }
        }
    }

    /// Attach `element` to the built-in [`SpectralEngine`]
    pub fn attach_spectral(&mut self, element: AudioElement) {
        self.attach(element, |size| Ok(Box::new(SpectralEngine::new(size))));
    }

    /// Dispose the processing context. The synthetic switch survives detaching.
    pub fn detach(&mut self) {
        if let AnalysisStrategy::Engine(ctx) = &self.strategy {
            info!("Feature source detached from '{}'", ctx.element.id);
            self.strategy = AnalysisStrategy::Unattached;
        }
    }

    /// Register a sink called once per emitted frame
    pub fn on_frame<F>(&mut self, callback: F)
    where
        F: FnMut(&FeatureFrame) + Send + 'static,
    {
        self.sinks.push(Box::new(callback));
    }

    /// Feed decoded samples from the attached element.
    ///
    /// Emits one frame per complete analysis buffer and returns how many were emitted.
    /// Ignored unless the real engine is active.
    pub fn push_samples(&mut self, samples: &[f32], now: Instant) -> usize {
        let mut frames = Vec::new();
        let mut failures = 0;

        if let AnalysisStrategy::Engine(ctx) = &mut self.strategy {
            // The engine decides what a complete buffer is
            let buffer_size = ctx.engine.buffer_size().max(1);
            ctx.pending.extend_from_slice(samples);
            while ctx.pending.len() >= buffer_size {
                let buffer: Vec<f32> = ctx.pending.drain(..buffer_size).collect();
                match ctx.engine.analyze(&buffer, now) {
                    Ok(frame) => frames.push(frame.sanitized()),
                    Err(e) => {
                        warn!("Analysis engine error on '{}': {}", ctx.element.id, e);
                        failures += 1;
                    }
                }
            }
        }

        for _ in 0..failures {
            self.record_engine_failure();
        }
        // Frames computed before a synthetic switch in this same call are still real
        let emitted = frames.len();
        for frame in frames {
            self.emit(frame);
        }
        emitted
    }

    /// Emit a synthetic frame if the fallback is active and one is due
    pub fn poll_synthetic(&mut self, now: Instant) -> Option<FeatureFrame> {
        let interval = self.config.synthetic_interval();
        let frame = match &mut self.strategy {
            AnalysisStrategy::Synthetic {
                generator,
                last_emit,
            } => {
                let due = last_emit
                    .map_or(true, |last| now.saturating_duration_since(last) >= interval);
                if !due {
                    return None;
                }
                *last_emit = Some(now);
                generator.frame_at(now)
            }
            _ => return None,
        };
        self.emit(frame);
        Some(frame)
    }

    /// Active strategy
    pub fn strategy(&self) -> &AnalysisStrategy {
        &self.strategy
    }

    /// True once the permanent synthetic switch happened
    pub fn is_synthetic(&self) -> bool {
        matches!(self.strategy, AnalysisStrategy::Synthetic { .. })
    }

    /// True while a real engine context exists
    pub fn is_attached(&self) -> bool {
        matches!(self.strategy, AnalysisStrategy::Engine(_))
    }

    /// Engine failures counted this session
    pub fn engine_failures(&self) -> u32 {
        self.engine_failures
    }

    /// Frames emitted this session (real and synthetic)
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    fn emit(&mut self, frame: FeatureFrame) {
        self.frames_emitted += 1;
        for sink in self.sinks.iter_mut() {
            sink(&frame);
        }
        self.bus.publish(PipelineEvent::FeatureFrame(frame));
    }

    fn record_engine_failure(&mut self) {
        if self.is_synthetic() {
            return;
        }
        self.engine_failures += 1;
        if self.engine_failures >= self.config.max_engine_failures {
            warn!(
                "Analysis engine failed {} times, switching to synthetic frames for this session",
                self.engine_failures
            );
            self.switch_to_synthetic(Instant::now());
        }
    }

    fn switch_to_synthetic(&mut self, now: Instant) {
        self.strategy = AnalysisStrategy::Synthetic {
            generator: SyntheticGenerator::new(now),
            last_emit: None,
        };
    }
}
