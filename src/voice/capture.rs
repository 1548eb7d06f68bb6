//! Audio capture from microphone
//!
//! The device tap pushes raw mono samples into a channel; a single pipeline
//! task frames them, reports the input level, feeds the recognizer and, while
//! the gate is ACTIVE, forwards encoded frames toward the transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::device::StreamThread;
use super::gate::ActivationState;
use super::level::{self, LevelMeter};
use super::resample::StreamResampler;
use super::segmenter::RecognizerFeed;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per captured frame
pub const FRAME_SIZE: usize = 4096;

/// MIME type of one encoded frame at a given rate
#[must_use]
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={sample_rate}")
}

/// A device tap producing mono samples at `sample_rate()`
pub trait AudioInput: Send {
    /// Start delivering samples to `tx`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened or started
    fn start(&mut self, tx: mpsc::UnboundedSender<Vec<f32>>) -> Result<()>;

    /// Stop delivering samples and release the device stream
    fn stop(&mut self);

    /// Rate of the samples delivered
    fn sample_rate(&self) -> u32;
}

/// Captures audio from the default input device
pub struct CpalInput {
    device_name: String,
    config: StreamConfig,
    target_rate: u32,
    stream: Option<StreamThread>,
}

impl CpalInput {
    /// Open the default input device
    ///
    /// Prefers a mono config at `target_rate`; otherwise uses the device
    /// default and converts in the callback.
    ///
    /// # Errors
    ///
    /// Returns error if no input device or config is available
    pub fn new(target_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let exact = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(target_rate)
                    && c.max_sample_rate() >= SampleRate(target_rate)
            });

        let config = match exact {
            Some(c) => c.with_sample_rate(SampleRate(target_rate)).config(),
            None => device
                .default_input_config()
                .map_err(|e| Error::Audio(format!("no suitable audio config found: {e}")))?
                .config(),
        };

        let device_name = device.name().unwrap_or_default();

        tracing::debug!(
            device = %device_name,
            device_rate = config.sample_rate.0,
            target_rate,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device_name,
            config,
            target_rate,
            stream: None,
        })
    }

    /// Name of the opened device
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl AudioInput for CpalInput {
    fn start(&mut self, tx: mpsc::UnboundedSender<Vec<f32>>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let config = self.config.clone();
        let target_rate = self.target_rate;

        let thread = StreamThread::spawn("capture", move || {
            let device = cpal::default_host()
                .default_input_device()
                .ok_or_else(|| Error::Audio("no input device".to_string()))?;

            let channels = usize::from(config.channels.max(1));
            let mut resampler = StreamResampler::new(config.sample_rate.0, target_rate)?;

            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono = downmix(data, channels);
                        match resampler.push(&mono) {
                            Ok(samples) if !samples.is_empty() => {
                                let _ = tx.send(samples);
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "dropping captured block"),
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio capture error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))
        })?;

        self.stream = Some(thread);
        tracing::debug!("audio capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::debug!("audio capture stopped");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.target_rate
    }
}

/// Average interleaved channels into mono
#[allow(clippy::cast_precision_loss)]
fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// One fixed-size block of captured audio and its level
///
/// Consumed once: encoded for the transport or handed to the recognizer.
#[derive(Debug)]
pub struct AudioFrame {
    /// Mono samples in `[-1, 1]`
    pub samples: Vec<f32>,
    /// Display level in `[0, 1]`
    pub level: f32,
}

impl AudioFrame {
    /// Encode as base64 little-endian PCM16
    #[must_use]
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(encode_pcm16(&self.samples))
    }
}

/// Accumulates raw samples into fixed frames
#[derive(Debug)]
pub struct Framer {
    size: usize,
    pending: Vec<f32>,
}

impl Framer {
    /// Create a framer emitting frames of `size` samples
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            pending: Vec::with_capacity(size * 2),
        }
    }

    /// Add samples, returning every frame completed by them
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.size {
            frames.push(self.pending.drain(..self.size).collect());
        }
        frames
    }

    /// Samples waiting for a full frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Encode `[-1, 1]` floats as little-endian signed 16-bit PCM
#[must_use]
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * 32768.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Capture tuning
#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    /// Samples per frame
    pub frame_size: usize,
    /// RMS multiplier for the level readout
    pub input_gain: f32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            frame_size: FRAME_SIZE,
            input_gain: 5.0,
        }
    }
}

/// Where captured frames go
#[derive(Debug, Default)]
pub struct CaptureTaps {
    /// Local utterance recognizer
    pub recognizer: Option<mpsc::UnboundedSender<RecognizerFeed>>,
    /// Outbound transport, only while ACTIVE
    pub forward: Option<mpsc::UnboundedSender<AudioFrame>>,
}

/// Switch that pauses recognition without stopping capture
#[derive(Debug, Clone)]
pub struct RecognitionSwitch(Arc<AtomicBool>);

impl RecognitionSwitch {
    /// Stop feeding the recognizer
    pub fn suspend(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Resume feeding the recognizer
    pub fn resume(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the recognizer is being fed
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Running capture: device tap plus framing task
pub struct CapturePipeline {
    input: Box<dyn AudioInput>,
    forwarding: Arc<AtomicBool>,
    recognition: RecognitionSwitch,
    task: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    /// Start the device tap and the framing task
    ///
    /// # Errors
    ///
    /// Returns error if the input device fails to start
    pub fn spawn(
        mut input: Box<dyn AudioInput>,
        options: CaptureOptions,
        meter: LevelMeter,
        activation: watch::Receiver<ActivationState>,
        taps: CaptureTaps,
    ) -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        input.start(raw_tx)?;

        let forwarding = Arc::new(AtomicBool::new(true));
        let recognition = RecognitionSwitch(Arc::new(AtomicBool::new(true)));

        let task = tokio::spawn(run_pipeline(
            raw_rx,
            options,
            meter,
            activation,
            taps,
            Arc::clone(&forwarding),
            recognition.clone(),
        ));

        tracing::info!(
            sample_rate = input.sample_rate(),
            frame_size = options.frame_size,
            "capture pipeline started"
        );

        Ok(Self {
            input,
            forwarding,
            recognition,
            task: Some(task),
        })
    }

    /// Handle for suspending and resuming recognition
    #[must_use]
    pub fn recognition(&self) -> RecognitionSwitch {
        self.recognition.clone()
    }

    /// Rate of captured samples
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.input.sample_rate()
    }

    /// Stop forwarding, stop the framing task, then release the device
    pub fn stop(&mut self) {
        self.forwarding.store(false, Ordering::SeqCst);
        self.recognition.suspend();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.input.stop();
        tracing::info!("capture pipeline stopped");
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.stop();
        }
    }
}

async fn run_pipeline(
    mut raw_rx: mpsc::UnboundedReceiver<Vec<f32>>,
    options: CaptureOptions,
    meter: LevelMeter,
    activation: watch::Receiver<ActivationState>,
    taps: CaptureTaps,
    forwarding: Arc<AtomicBool>,
    recognition: RecognitionSwitch,
) {
    let mut framer = Framer::new(options.frame_size);
    let mut was_recognizing = true;

    while let Some(samples) = raw_rx.recv().await {
        for samples in framer.push(&samples) {
            let level = level::input_level(level::rms(&samples), options.input_gain);
            meter.set_input(level);

            let recognizing = recognition.is_active();
            if let Some(recognizer) = &taps.recognizer {
                if recognizing {
                    let _ = recognizer.send(RecognizerFeed::Samples(samples.clone()));
                } else if was_recognizing {
                    let _ = recognizer.send(RecognizerFeed::Reset);
                }
            }
            was_recognizing = recognizing;

            if !forwarding.load(Ordering::SeqCst) {
                return;
            }

            if let Some(forward) = &taps.forward
                && *activation.borrow() == ActivationState::Active
                && forward.send(AudioFrame { samples, level }).is_err()
            {
                tracing::debug!("frame sink closed");
            }
        }
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framer_emits_fixed_frames() {
        let mut framer = Framer::new(4);
        assert!(framer.push(&[0.0; 3]).is_empty());
        let frames = framer.push(&[1.0; 6]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(framer.pending(), 1);
    }

    #[test]
    fn pcm16_is_little_endian_and_clamped() {
        let bytes = encode_pcm16(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..2], &[0, 0]);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), i16::MIN);
        assert_eq!(i16::from_le_bytes([bytes[6], bytes[7]]), i16::MAX);
    }

    #[test]
    fn downmix_averages_channels() {
        assert_eq!(downmix(&[0.5, 0.25, -1.0, 1.0], 2), vec![0.375, 0.0]);
    }

    #[test]
    fn wav_has_riff_header() {
        let wav = samples_to_wav(&[0.0; 160], SAMPLE_RATE).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
    }

    #[test]
    fn mime_names_rate() {
        assert_eq!(pcm_mime_type(16_000), "audio/pcm;rate=16000");
    }
}
