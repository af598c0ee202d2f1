//! Decoded WAV playback source
//!
//! The whole file is decoded to mono `f32` up front and handed out in fixed chunks
//! at the rate the audio would play.

use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

pub struct WavTrack {
    name: String,
    sample_rate: u32,
    samples: Vec<f32>,
    position: usize,
}

impl WavTrack {
    pub fn open(path: &Path) -> Result<Self> {
        let reader =
            WavReader::open(path).with_context(|| format!("Failed to open WAV file {:?}", path))?;
        Self::decode(path.display().to_string(), reader)
    }

    pub fn decode<R: Read>(name: String, reader: WavReader<R>) -> Result<Self> {
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .context("Corrupt float samples")?,
            SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .context("Corrupt integer samples")?
            }
        };
        if interleaved.is_empty() {
            bail!("{} contains no samples", name);
        }

        // Downmix
        let samples = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        Ok(Self {
            name,
            sample_rate: spec.sample_rate,
            samples,
            position: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        let micros = self.samples.len() as u64 * 1_000_000 / self.sample_rate.max(1) as u64;
        Duration::from_micros(micros)
    }

    /// Next chunk of at most `len` samples, `None` once the track ended
    pub fn next_chunk(&mut self, len: usize) -> Option<&[f32]> {
        if self.position >= self.samples.len() {
            return None;
        }
        let end = (self.position + len.max(1)).min(self.samples.len());
        let chunk = &self.samples[self.position..end];
        self.position = end;
        Some(chunk)
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.samples.len()
    }
}
