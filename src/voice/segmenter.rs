//! Utterance segmentation and recognition
//!
//! Energy-based voice activity detection cuts the capture stream into
//! utterances; a single recognizer task transcribes them one at a time so
//! transcripts come out in the order they were spoken.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::level;
use super::speech::Transcriber;
use crate::Result;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum speech duration for an utterance, in seconds
const MIN_SPEECH_SECS: f32 = 0.3;

/// Trailing silence that ends an utterance, in seconds
const SILENCE_SECS: f32 = 0.5;

/// Input to the recognizer task
#[derive(Debug)]
pub enum RecognizerFeed {
    /// Next block of captured samples
    Samples(Vec<f32>),
    /// Discard any partial utterance
    Reset,
}

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Speech detected, accumulating
    Listening,
}

/// Splits a sample stream into utterances
#[derive(Debug)]
pub struct Segmenter {
    state: SegmenterState,
    speech_buffer: Vec<f32>,
    speech_samples: usize,
    silence_counter: usize,
    min_speech_samples: usize,
    silence_samples: usize,
}

impl Segmenter {
    /// Create a segmenter for a given sample rate
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn new(sample_rate: u32) -> Self {
        let rate = sample_rate as f32;
        Self {
            state: SegmenterState::Idle,
            speech_buffer: Vec::new(),
            speech_samples: 0,
            silence_counter: 0,
            min_speech_samples: (rate * MIN_SPEECH_SECS) as usize,
            silence_samples: (rate * SILENCE_SECS) as usize,
        }
    }

    /// Process samples, returning a complete utterance when one ends
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let energy = level::rms(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Listening;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.speech_samples = samples.len();
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected, listening");
                }
            }
            SegmenterState::Listening => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.speech_samples += samples.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > self.silence_samples
                    && self.speech_samples > self.min_speech_samples
                {
                    tracing::debug!(
                        samples = self.speech_buffer.len(),
                        "speech segment complete"
                    );
                    let utterance = std::mem::take(&mut self.speech_buffer);
                    self.reset();
                    return Some(utterance);
                }

                // Too much silence without enough speech
                if self.silence_counter > self.silence_samples * 2 {
                    tracing::trace!("timeout - resetting");
                    self.reset();
                }
            }
        }

        None
    }

    /// Reset to idle, dropping any partial utterance
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.speech_buffer.clear();
        self.speech_samples = 0;
        self.silence_counter = 0;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }
}

/// A recognized utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Transcript as returned by the recognizer
    pub text: String,
}

/// Spawn the recognizer task
///
/// Segments the feed, transcribes each utterance in turn and emits
/// non-empty transcripts on `out`. A failed transcription is reported on
/// `out` and recognition carries on with the next utterance.
pub fn spawn_recognizer(
    mut feed: mpsc::UnboundedReceiver<RecognizerFeed>,
    transcriber: Arc<dyn Transcriber>,
    sample_rate: u32,
    out: mpsc::UnboundedSender<Result<Utterance>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut segmenter = Segmenter::new(sample_rate);

        while let Some(item) = feed.recv().await {
            let samples = match item {
                RecognizerFeed::Samples(samples) => samples,
                RecognizerFeed::Reset => {
                    segmenter.reset();
                    continue;
                }
            };

            let Some(utterance) = segmenter.push(&samples) else {
                continue;
            };

            let recognized = match transcriber.transcribe(&utterance, sample_rate).await {
                Ok(text) if text.trim().is_empty() => {
                    tracing::debug!("empty transcript");
                    continue;
                }
                Ok(text) => Ok(Utterance { text }),
                Err(e) => {
                    tracing::warn!(error = %e, "transcription failed");
                    Err(e)
                }
            };

            if out.send(recognized).is_err() {
                break;
            }
        }

        tracing::debug!("recognizer stopped");
    })
}
