//! Audio feature extraction
//!
//! - [`FeatureFrame`]: one timestamped snapshot of extracted signal properties
//! - [`SpectralEngine`]: FFT-based real analysis engine
//! - [`SyntheticGenerator`]: clock-driven substitute used when the engine is degraded
//! - [`FeatureSource`]: owns the processing context and fans frames out to sinks and the bus

pub mod engine;
pub mod frame;
pub mod source;
pub mod synthetic;

pub use engine::{
    AnalysisEngine, EngineLoadError, SpectralEngine, ANALYSIS_BUFFER_SIZE, MIN_BUFFER_SIZE,
};
pub use frame::{FeatureFrame, FrameOrigin};
pub use source::{AnalysisStrategy, AudioElement, FeatureSource, FeatureSourceConfig};
pub use synthetic::SyntheticGenerator;
