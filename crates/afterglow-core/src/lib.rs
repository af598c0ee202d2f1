//! Afterglow Core - Audio Features, Intensity and Theme State
//!
//! This crate contains the signal side of the Afterglow pipeline:
//! - Feature extraction from a playing track (real FFT engine or synthetic fallback)
//! - Beat/intensity classification with throttling
//! - The three-level theme state machine
//! - The in-process event bus that connects independent consumers
//!
//! Lighting output and the external player supervisor live in `afterglow-control`.

#![warn(missing_docs)]

pub mod audio;
pub mod classifier;
pub mod error;
pub mod events;
pub mod logging;
pub mod theme;

// --- Re-exports grouped by category ---

// Audio
pub use audio::{
    AnalysisEngine, AnalysisStrategy, AudioElement, EngineLoadError, FeatureFrame, FeatureSource,
    FeatureSourceConfig, FrameOrigin, SpectralEngine, SyntheticGenerator,
};

// Classification & theming
pub use classifier::{ClassifierConfig, IntensityClassifier, IntensityReading, SignalSource};
pub use theme::{IntensityState, Subscription, Theme, ThemeChange, ThemeConfig, ThemeStateMachine};

// Infrastructure
pub use error::{CoreError, Result};
pub use events::{EventBus, HealthStatus, PipelineEvent};
pub use logging::LogConfig;
