//! Audio playback to speakers
//!
//! Audio units are laid end to end on the output device's clock. A ticket is
//! reserved when a unit arrives; decoding may finish in any order, but units
//! are committed to the timeline strictly in ticket order.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use super::device::StreamThread;
use super::level::LevelMeter;
use super::resample;
use crate::{Error, Result};

/// Sample rate for playback (matches streaming model output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Decoded mono audio at the sink's rate
#[derive(Debug, Clone, Default)]
pub struct DecodedAudio {
    /// Samples in `[-1, 1]`
    pub samples: Vec<f32>,
    /// Rate of `samples`
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Length in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// A unit committed to the output timeline
#[derive(Debug, Clone)]
pub struct PlaybackUnit {
    /// Unit id, reported back on completion
    pub id: u64,
    /// Mono samples at the sink's rate
    pub samples: Vec<f32>,
    /// Length in seconds
    pub duration: f64,
    /// Clock time at which playback begins
    pub start_not_before: f64,
}

/// An output device that plays units at committed times
///
/// Implementations report each finished unit's id on the completion channel
/// they were built with.
pub trait PlaybackSink: Send {
    /// Monotonic output clock in seconds
    fn clock(&self) -> f64;

    /// Rate the sink plays at
    fn sample_rate(&self) -> u32;

    /// Queue a unit for playback at `unit.start_not_before`
    ///
    /// # Errors
    ///
    /// Returns error if the device has gone away
    fn enqueue(&mut self, unit: PlaybackUnit) -> Result<()>;

    /// Drop every queued unit
    fn clear(&mut self);
}

/// Reservation of a timeline slot, taken when a unit arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    /// Numeric ticket id
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// Result of committing one ticket
#[derive(Debug)]
pub enum CommitOutcome {
    /// Placed on the timeline
    Scheduled {
        /// Ticket id, also the unit id
        id: u64,
        /// Start time on the sink clock
        start: f64,
        /// Length in seconds
        duration: f64,
    },
    /// Not played; the timeline did not advance
    Dropped {
        /// Ticket id
        id: u64,
        /// Why the unit was dropped
        reason: String,
    },
}

/// Orders decoded units onto the sink clock
pub struct PlaybackScheduler {
    sink: Box<dyn PlaybackSink>,
    meter: LevelMeter,
    speaking_level: f32,
    next_ticket: u64,
    next_commit: u64,
    ready: BTreeMap<u64, Result<DecodedAudio>>,
    next_playback_time: f64,
    outstanding: HashSet<u64>,
}

impl PlaybackScheduler {
    /// Create a scheduler over a sink
    #[must_use]
    pub fn new(sink: Box<dyn PlaybackSink>, meter: LevelMeter, speaking_level: f32) -> Self {
        Self {
            sink,
            meter,
            speaking_level: speaking_level.clamp(0.0, 1.0),
            next_ticket: 0,
            next_commit: 0,
            ready: BTreeMap::new(),
            next_playback_time: 0.0,
            outstanding: HashSet::new(),
        }
    }

    /// Reserve the next slot in arrival order
    pub fn reserve(&mut self) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        ticket
    }

    /// Hand in the decode result for a ticket
    ///
    /// Returns the outcomes of every ticket that could be committed as a
    /// result, in ticket order. Results for tickets issued before the last
    /// `reset` are discarded.
    pub fn commit(&mut self, ticket: Ticket, decoded: Result<DecodedAudio>) -> Vec<CommitOutcome> {
        if ticket.0 < self.next_commit || ticket.0 >= self.next_ticket {
            tracing::debug!(ticket = ticket.0, "discarding stale playback ticket");
            return Vec::new();
        }

        self.ready.insert(ticket.0, decoded);

        let mut outcomes = Vec::new();
        while let Some(decoded) = self.ready.remove(&self.next_commit) {
            let id = self.next_commit;
            self.next_commit += 1;
            outcomes.push(self.place(id, decoded));
        }
        outcomes
    }

    /// Reserve and commit in one step, for callers that decode in order
    ///
    /// # Errors
    ///
    /// Returns error if the unit could not be placed
    pub fn schedule(&mut self, audio: DecodedAudio) -> Result<f64> {
        let ticket = self.reserve();
        let outcomes = self.commit(ticket, Ok(audio));

        outcomes
            .into_iter()
            .find_map(|o| match o {
                CommitOutcome::Scheduled { id, start, .. } if id == ticket.0 => Some(Ok(start)),
                CommitOutcome::Dropped { id, reason } if id == ticket.0 => {
                    Some(Err(Error::PlaybackDecode(reason)))
                }
                _ => None,
            })
            .unwrap_or_else(|| {
                Err(Error::PlaybackDecode(
                    "unit is waiting on an earlier ticket".to_string(),
                ))
            })
    }

    fn place(&mut self, id: u64, decoded: Result<DecodedAudio>) -> CommitOutcome {
        let audio = match decoded {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(unit = id, error = %e, "dropping undecodable audio unit");
                return CommitOutcome::Dropped {
                    id,
                    reason: e.to_string(),
                };
            }
        };

        let audio = if audio.sample_rate == self.sink.sample_rate() || audio.samples.is_empty() {
            audio
        } else {
            match resample::resample(&audio.samples, audio.sample_rate, self.sink.sample_rate()) {
                Ok(samples) => DecodedAudio {
                    samples,
                    sample_rate: self.sink.sample_rate(),
                },
                Err(e) => {
                    return CommitOutcome::Dropped {
                        id,
                        reason: e.to_string(),
                    };
                }
            }
        };

        let duration = audio.duration();
        let start = self.sink.clock().max(self.next_playback_time);

        if audio.samples.is_empty() {
            return CommitOutcome::Scheduled {
                id,
                start,
                duration: 0.0,
            };
        }

        let unit = PlaybackUnit {
            id,
            samples: audio.samples,
            duration,
            start_not_before: start,
        };

        if let Err(e) = self.sink.enqueue(unit) {
            tracing::warn!(unit = id, error = %e, "output device rejected unit");
            return CommitOutcome::Dropped {
                id,
                reason: e.to_string(),
            };
        }

        self.next_playback_time = start + duration;
        self.outstanding.insert(id);
        self.meter.set_output(self.speaking_level);

        tracing::trace!(unit = id, start, duration, "audio unit scheduled");

        CommitOutcome::Scheduled {
            id,
            start,
            duration,
        }
    }

    /// Record that a unit finished playing
    pub fn complete(&mut self, id: u64) {
        if self.outstanding.remove(&id) && self.outstanding.is_empty() {
            self.meter.set_output(0.0);
            tracing::trace!("playback drained");
        }
    }

    /// Drop all pending and queued units
    pub fn reset(&mut self) {
        self.ready.clear();
        self.outstanding.clear();
        self.next_commit = self.next_ticket;
        self.next_playback_time = 0.0;
        self.sink.clear();
        self.meter.set_output(0.0);
        tracing::debug!("playback scheduler reset");
    }

    /// End of the committed timeline
    #[must_use]
    pub const fn next_playback_time(&self) -> f64 {
        self.next_playback_time
    }

    /// Whether any scheduled unit has not yet completed
    #[must_use]
    pub fn is_playing(&self) -> bool {
        !self.outstanding.is_empty()
    }

    /// Rate decoders should target
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sink.sample_rate()
    }
}

/// Decode little-endian PCM16 bytes
///
/// # Errors
///
/// Returns `PlaybackDecode` for an odd byte count
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32) -> Result<DecodedAudio> {
    if bytes.len() % 2 != 0 {
        return Err(Error::PlaybackDecode(format!(
            "odd PCM16 payload length {}",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect();

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Decode MP3 bytes to mono samples
///
/// # Errors
///
/// Returns `PlaybackDecode` if the stream is corrupt or holds no audio
pub fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);

                // Stereo: average channels
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::PlaybackDecode(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(Error::PlaybackDecode("MP3 stream held no audio".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

struct QueuedUnit {
    id: u64,
    start_frame: u64,
    samples: Vec<f32>,
    position: usize,
}

#[derive(Default)]
struct OutputState {
    frames_played: u64,
    queue: VecDeque<QueuedUnit>,
}

/// Plays scheduled units on the default output device
pub struct CpalOutput {
    sample_rate: u32,
    state: Arc<Mutex<OutputState>>,
    stream: StreamThread,
}

impl CpalOutput {
    /// Open the default output device
    ///
    /// Finished unit ids are sent on `completions`.
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn open(preferred_rate: u32, completions: mpsc::UnboundedSender<u64>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports = |channels: u16| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels
                    && c.sample_format() == cpal::SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(preferred_rate)
                    && c.max_sample_rate() >= SampleRate(preferred_rate)
            })
        };

        // Fallback: try stereo, then whatever the device prefers
        let config: StreamConfig = match supports(1).or_else(|| supports(2)) {
            Some(c) => c.with_sample_rate(SampleRate(preferred_rate)).config(),
            None => device
                .default_output_config()
                .map_err(|e| Error::Audio(format!("no suitable output config found: {e}")))?
                .config(),
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback initialized"
        );

        let sample_rate = config.sample_rate.0;
        let state = Arc::new(Mutex::new(OutputState::default()));
        let shared = Arc::clone(&state);

        let stream = StreamThread::spawn("playback", move || {
            let device = cpal::default_host()
                .default_output_device()
                .ok_or_else(|| Error::Audio("no output device".to_string()))?;
            let channels = usize::from(config.channels.max(1));

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let Ok(mut state) = shared.lock() else {
                            data.fill(0.0);
                            return;
                        };
                        for frame in data.chunks_mut(channels) {
                            let sample = state.next_sample(&completions);
                            frame.fill(sample);
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))
        })?;

        Ok(Self {
            sample_rate,
            state,
            stream,
        })
    }

    /// Whether the device stream is running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.stream.is_running()
    }
}

impl OutputState {
    /// Produce the sample for the current frame and advance the clock
    fn next_sample(&mut self, completions: &mpsc::UnboundedSender<u64>) -> f32 {
        let now = self.frames_played;
        self.frames_played += 1;

        let Some(unit) = self.queue.front_mut() else {
            return 0.0;
        };
        if now < unit.start_frame {
            return 0.0;
        }

        let sample = unit.samples.get(unit.position).copied().unwrap_or(0.0);
        unit.position += 1;

        if unit.position >= unit.samples.len() {
            let id = unit.id;
            self.queue.pop_front();
            let _ = completions.send(id);
        }

        sample
    }
}

impl PlaybackSink for CpalOutput {
    #[allow(clippy::cast_precision_loss)]
    fn clock(&self) -> f64 {
        let frames = self.state.lock().map(|s| s.frames_played).unwrap_or(0);
        frames as f64 / f64::from(self.sample_rate)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn enqueue(&mut self, unit: PlaybackUnit) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::Audio("playback state poisoned".to_string()))?;

        let start_frame = (unit.start_not_before * f64::from(self.sample_rate)).round() as u64;
        let frames_played = state.frames_played;
        state.queue.push_back(QueuedUnit {
            id: unit.id,
            start_frame: start_frame.max(frames_played),
            samples: unit.samples,
            position: 0,
        });
        Ok(())
    }

    fn clear(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.queue.clear();
        }
    }
}
