//! Voice processing module
//!
//! Handles audio capture, levels, the wake-word gate, utterance recognition
//! and scheduled playback. STT and TTS are external services reached
//! through the traits in [`speech`].

pub mod capture;
mod device;
pub mod gate;
pub mod level;
pub mod playback;
pub mod resample;
pub mod segmenter;
pub mod speech;

pub use capture::{
    AudioFrame, AudioInput, CaptureOptions, CapturePipeline, CaptureTaps, CpalInput, Framer,
    RecognitionSwitch, SAMPLE_RATE, encode_pcm16, pcm_mime_type, samples_to_wav,
};
pub use device::StreamThread;
pub use gate::{
    Ack, ActivationEvent, ActivationState, Classification, Disposition, EventKind, GateState,
    WakeWordGate,
};
pub use level::{AudioLevels, LevelMeter};
pub use playback::{
    CommitOutcome, CpalOutput, DecodedAudio, PLAYBACK_SAMPLE_RATE, PlaybackScheduler,
    PlaybackSink, PlaybackUnit, Ticket, decode_mp3, decode_pcm16,
};
pub use segmenter::{RecognizerFeed, Segmenter, Utterance, spawn_recognizer};
pub use speech::{OpenAiSynthesizer, Synthesizer, Transcriber, WhisperTranscriber};
