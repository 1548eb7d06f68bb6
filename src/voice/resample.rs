//! Sample-rate conversion
//!
//! Device and decoder rates rarely match the 16 kHz capture rate or the
//! 24 kHz playback rate, so both directions go through rubato.

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Requested frames per resampler call (rubato rounds to its FFT size)
const CHUNK_SIZE: usize = 1024;

/// FFT sub-chunks per call
const SUB_CHUNKS: usize = 2;

/// Resample a complete mono buffer
///
/// The trailing partial chunk is zero-padded and the output trimmed to the
/// proportional length, so short buffers are not lost.
///
/// # Errors
///
/// Returns error if the resampler cannot be built or fails
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = build(from_rate, to_rate)?;
    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let expected = (samples.len() as f64 * ratio).round() as usize;

    let frames_in = resampler.input_frames_next();
    let mut output = Vec::with_capacity(expected + resampler.output_frames_max());
    for chunk in samples.chunks(frames_in) {
        let mut input = chunk.to_vec();
        input.resize(frames_in, 0.0);

        let result = resampler
            .process(&[input], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        if let Some(channel) = result.into_iter().next() {
            output.extend(channel);
        }
    }

    output.truncate(expected);
    Ok(output)
}

/// Incremental resampler for live device input
///
/// Buffers arbitrary callback-sized pieces and emits output one full chunk
/// at a time.
pub struct StreamResampler {
    inner: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    /// Create a stream resampler; a pass-through when the rates match
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be built
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let inner = if from_rate == to_rate {
            None
        } else {
            tracing::debug!(from_rate, to_rate, "input resampling enabled");
            Some(build(from_rate, to_rate)?)
        };

        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Feed samples and collect whatever output is ready
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        let frames_in = resampler.input_frames_next();
        while self.pending.len() >= frames_in {
            let chunk: Vec<f32> = self.pending.drain(..frames_in).collect();
            let result = resampler
                .process(&[chunk], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            if let Some(channel) = result.into_iter().next() {
                output.extend(channel);
            }
        }

        Ok(output)
    }

    /// Whether this resampler converts at all
    #[must_use]
    pub const fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }
}

fn build(from_rate: u32, to_rate: u32) -> Result<FftFixedIn<f32>> {
    FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 16_000, 16_000).unwrap(), samples);
    }

    #[test]
    fn output_length_follows_ratio() {
        let samples = vec![0.0f32; 48_000];
        let out = resample(&samples, 48_000, 16_000).unwrap();
        assert_eq!(out.len(), 16_000);
    }

    #[test]
    fn short_buffer_survives() {
        let samples = vec![0.25f32; 100];
        let out = resample(&samples, 16_000, 24_000).unwrap();
        assert_eq!(out.len(), 150);
    }

    #[test]
    fn stream_resampler_buffers_partial_chunks() {
        let mut rs = StreamResampler::new(48_000, 16_000).unwrap();
        assert!(!rs.is_passthrough());
        assert!(rs.push(&[0.0; 500]).unwrap().is_empty());
        assert!(!rs.push(&[0.0; 600]).unwrap().is_empty());
    }
}
