//! Feature frame data structure

use std::time::Instant;

/// Where a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameOrigin {
    /// Produced by the real analysis engine
    Analysis,
    /// Produced by the clock-driven fallback generator
    Synthetic,
}

/// One analysis result.
///
/// Spectral features are normalized: centroid, rolloff and spread are fractions of
/// the half-spectrum, flux is a bounded ratio. Typical values fall in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureFrame {
    /// RMS volume (0.0 - 1.0 for full-scale input)
    pub rms: f32,
    /// Spectral centroid
    pub spectral_centroid: f32,
    /// Frequency below which 85% of the spectral energy lies
    pub spectral_rolloff: f32,
    /// Positive spectral change since the previous frame
    pub spectral_flux: f32,
    /// Spread of the spectrum around its centroid
    pub spectral_spread: f32,
    /// Capture time
    pub timestamp: Instant,
    /// Real or synthetic
    pub origin: FrameOrigin,
}

impl FeatureFrame {
    /// Silent analysis frame at `timestamp`
    pub fn silent(timestamp: Instant) -> Self {
        Self {
            rms: 0.0,
            spectral_centroid: 0.0,
            spectral_rolloff: 0.0,
            spectral_flux: 0.0,
            spectral_spread: 0.0,
            timestamp,
            origin: FrameOrigin::Analysis,
        }
    }

    /// True when the frame came from the fallback generator
    pub fn is_synthetic(&self) -> bool {
        self.origin == FrameOrigin::Synthetic
    }

    /// Copy of this frame with NaN, infinite and negative features replaced by zero
    pub fn sanitized(&self) -> Self {
        Self {
            rms: non_negative(self.rms),
            spectral_centroid: non_negative(self.spectral_centroid),
            spectral_rolloff: non_negative(self.spectral_rolloff),
            spectral_flux: non_negative(self.spectral_flux),
            spectral_spread: non_negative(self.spectral_spread),
            ..*self
        }
    }
}

/// Zero for anything that is not a finite, non-negative number
pub fn non_negative(value: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_zeroes_bad_values() {
        let frame = FeatureFrame {
            rms: f32::NAN,
            spectral_centroid: -0.4,
            spectral_rolloff: f32::INFINITY,
            spectral_flux: 0.25,
            spectral_spread: f32::NEG_INFINITY,
            timestamp: Instant::now(),
            origin: FrameOrigin::Analysis,
        };

        let clean = frame.sanitized();
        assert_eq!(clean.rms, 0.0);
        assert_eq!(clean.spectral_centroid, 0.0);
        assert_eq!(clean.spectral_rolloff, 0.0);
        assert_eq!(clean.spectral_flux, 0.25);
        assert_eq!(clean.spectral_spread, 0.0);
        assert_eq!(clean.timestamp, frame.timestamp);
    }

    #[test]
    fn test_silent_is_analysis() {
        let frame = FeatureFrame::silent(Instant::now());
        assert!(!frame.is_synthetic());
        assert_eq!(frame.rms, 0.0);
    }
}
