//! Spectral analysis engine
//!
//! FFT-based feature extractor working on fixed, non-overlapping analysis buffers.
//! Each call to [`AnalysisEngine::analyze`] turns one buffer into one [`FeatureFrame`].

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, trace};

use super::frame::{FeatureFrame, FrameOrigin};
use crate::error::{CoreError, Result};

/// Fixed analysis buffer size in samples
pub const ANALYSIS_BUFFER_SIZE: usize = 512;

/// Smallest buffer the spectral engine can window
pub const MIN_BUFFER_SIZE: usize = 4;

/// Fraction of spectral energy used for the rolloff point
const ROLLOFF_FRACTION: f32 = 0.85;

/// Why an engine could not be constructed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineLoadError {
    /// The analysis capability is not present at all
    #[error("analysis engine unavailable: {0}")]
    Unavailable(String),

    /// The engine exists but failed to come up
    #[error("analysis engine failed to initialize: {0}")]
    Init(String),
}

/// A real-time analysis engine
pub trait AnalysisEngine: Send {
    /// Samples per analysis buffer
    fn buffer_size(&self) -> usize;

    /// Analyze one buffer of exactly [`buffer_size`](Self::buffer_size) samples
    fn analyze(&mut self, buffer: &[f32], timestamp: Instant) -> Result<FeatureFrame>;
}

/// FFT feature extractor
pub struct SpectralEngine {
    fft: Arc<dyn Fft<f32>>,
    buffer_size: usize,
    window: Vec<f32>,
    fft_buffer: Vec<Complex<f32>>,
    scratch_buffer: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    previous_magnitudes: Vec<f32>,
    frames_analyzed: u64,
}

impl SpectralEngine {
    /// Create an engine for the given buffer size (power of two recommended)
    pub fn new(buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(MIN_BUFFER_SIZE);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(buffer_size);
        let scratch_len = fft.get_inplace_scratch_len();

        // Pre-compute Hann window
        let window: Vec<f32> = (0..buffer_size)
            .map(|i| {
                let t = i as f32 / (buffer_size - 1) as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * t).cos())
            })
            .collect();

        let half_size = buffer_size / 2;
        debug!("SpectralEngine created: buffer_size={}", buffer_size);

        Self {
            fft,
            buffer_size,
            window,
            fft_buffer: vec![Complex::new(0.0, 0.0); buffer_size],
            scratch_buffer: vec![Complex::new(0.0, 0.0); scratch_len],
            magnitudes: vec![0.0; half_size],
            previous_magnitudes: vec![0.0; half_size],
            frames_analyzed: 0,
        }
    }

    /// Number of buffers analyzed so far
    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }

    fn calculate_rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = samples.iter().map(|s| s * s).sum();
        (sum / samples.len() as f32).sqrt()
    }

    fn compute_magnitudes(&mut self, samples: &[f32]) {
        for (i, (&sample, &w)) in samples.iter().zip(self.window.iter()).enumerate() {
            self.fft_buffer[i] = Complex::new(sample * w, 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.fft_buffer, &mut self.scratch_buffer);

        let norm_factor = 1.0 / (self.buffer_size as f32).sqrt();
        for (i, magnitude) in self.magnitudes.iter_mut().enumerate() {
            *magnitude = self.fft_buffer[i].norm() * norm_factor;
        }
    }

    /// Centroid, spread and rolloff as fractions of the half-spectrum
    fn spectral_shape(magnitudes: &[f32]) -> (f32, f32, f32) {
        let total: f32 = magnitudes.iter().sum();
        if total <= f32::EPSILON || magnitudes.len() < 2 {
            return (0.0, 0.0, 0.0);
        }
        let last_bin = (magnitudes.len() - 1) as f32;

        let centroid = magnitudes
            .iter()
            .enumerate()
            .map(|(k, m)| k as f32 / last_bin * m)
            .sum::<f32>()
            / total;

        let variance = magnitudes
            .iter()
            .enumerate()
            .map(|(k, m)| {
                let d = k as f32 / last_bin - centroid;
                d * d * m
            })
            .sum::<f32>()
            / total;

        let threshold = total * ROLLOFF_FRACTION;
        let mut cumulative = 0.0;
        let mut rolloff_bin = magnitudes.len() - 1;
        for (k, m) in magnitudes.iter().enumerate() {
            cumulative += m;
            if cumulative >= threshold {
                rolloff_bin = k;
                break;
            }
        }

        (centroid, variance.sqrt(), rolloff_bin as f32 / last_bin)
    }

    /// Half-wave rectified flux, normalized to `[0, 1]`
    fn spectral_flux(current: &[f32], previous: &[f32]) -> f32 {
        let mut rising = 0.0;
        let mut envelope = 0.0;
        for (&m, &p) in current.iter().zip(previous.iter()) {
            rising += (m - p).max(0.0);
            envelope += m.max(p);
        }
        if envelope <= f32::EPSILON {
            0.0
        } else {
            rising / envelope
        }
    }
}

impl AnalysisEngine for SpectralEngine {
    fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn analyze(&mut self, buffer: &[f32], timestamp: Instant) -> Result<FeatureFrame> {
        if buffer.len() != self.buffer_size {
            return Err(CoreError::BufferSize {
                expected: self.buffer_size,
                actual: buffer.len(),
            });
        }

        // NaN/Inf samples would poison every downstream metric
        let samples: Vec<f32> = buffer
            .iter()
            .map(|&s| if s.is_finite() { s } else { 0.0 })
            .collect();

        let rms = Self::calculate_rms(&samples);
        self.compute_magnitudes(&samples);
        let (centroid, spread, rolloff) = Self::spectral_shape(&self.magnitudes);
        let flux = Self::spectral_flux(&self.magnitudes, &self.previous_magnitudes);
        self.previous_magnitudes.copy_from_slice(&self.magnitudes);
        self.frames_analyzed += 1;

        let frame = FeatureFrame {
            rms,
            spectral_centroid: centroid,
            spectral_rolloff: rolloff,
            spectral_flux: flux,
            spectral_spread: spread,
            timestamp,
            origin: FrameOrigin::Analysis,
        };

        if ![rms, centroid, rolloff, flux, spread]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(CoreError::Engine(format!(
                "non-finite features in frame #{}",
                self.frames_analyzed
            )));
        }

        if self.frames_analyzed % 200 == 0 {
            trace!(
                "Spectral frame #{}: rms={:.3} centroid={:.3} flux={:.3}",
                self.frames_analyzed,
                rms,
                centroid,
                flux
            );
        }

        Ok(frame)
    }
}
