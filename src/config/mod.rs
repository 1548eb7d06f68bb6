//! Configuration management for voicelink
//!
//! Layering: built-in defaults, then `~/.config/voicelink/config.toml`,
//! then environment variables. CLI flags are applied by the binary.

pub mod file;

use std::path::PathBuf;

use crate::catalog::{ModelCatalog, ModelDescriptor};
use crate::prompt;

use self::file::VoicelinkConfigFile;

/// Default streaming endpoint (bidirectional realtime API)
pub const DEFAULT_STREAMING_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Default local inference server
pub const DEFAULT_POLLING_HOST: &str = "http://localhost:11434";

/// Default model when none is configured
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// voicelink configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Model connected when none is requested explicitly
    pub default_model: String,

    /// System instruction sent to either backend
    pub system_prompt: String,

    /// Wake-word gate configuration
    pub wake: WakeConfig,

    /// Audio pipeline configuration
    pub audio: AudioConfig,

    /// Streaming backend configuration
    pub streaming: StreamingConfig,

    /// Polling backend configuration
    pub polling: PollingConfig,

    /// Speech capability configuration
    pub speech: SpeechConfig,

    /// Camera device checked at connect time
    pub camera_device: Option<PathBuf>,

    /// Extra catalogue entries from the config file
    pub extra_models: Vec<ModelDescriptor>,
}

/// Wake-word gate configuration
#[derive(Debug, Clone)]
pub struct WakeConfig {
    /// Activation phrase
    pub phrase: String,

    /// Phrases that return the session to standby
    pub termination_phrases: Vec<String>,

    /// Acknowledgement for a bare wake phrase
    pub online_ack: String,

    /// Acknowledgement when going to standby
    pub standby_ack: String,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            phrase: "jarvis".to_string(),
            termination_phrases: vec![
                "jarvis sleep".to_string(),
                "jarvis vila".to_string(),
                "dismissed".to_string(),
                "stand down".to_string(),
            ],
            online_ack: "Online.".to_string(),
            standby_ack: "Standing by.".to_string(),
        }
    }
}

/// Audio pipeline configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Capture sample rate sent to the backend
    pub capture_rate: u32,

    /// Samples per captured frame
    pub frame_size: usize,

    /// Output device sample rate
    pub playback_rate: u32,

    /// Multiplier applied to frame RMS for the input level readout
    pub input_gain: f32,

    /// Output level reported while a unit is playing
    pub speaking_level: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_rate: 16_000,
            frame_size: 4096,
            playback_rate: 24_000,
            input_gain: 5.0,
            speaking_level: 0.8,
        }
    }
}

/// Streaming backend configuration
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// WebSocket endpoint
    pub url: String,

    /// API key appended to the endpoint as `key=`
    pub api_key: Option<String>,

    /// Prebuilt voice name
    pub voice: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAMING_URL.to_string(),
            api_key: None,
            voice: "Fenrir".to_string(),
        }
    }
}

/// Polling backend configuration
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Inference server base URL
    pub host: String,

    /// Model used for camera frames when the chat model lacks vision
    pub vision_model: String,

    /// Spoken when the backend cannot be reached
    pub apology: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_POLLING_HOST.to_string(),
            vision_model: "llava".to_string(),
            apology: "I cannot reach my local brain servers, sir.".to_string(),
        }
    }
}

/// Speech capability configuration (STT/TTS APIs)
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Transcription model
    pub stt_model: String,

    /// Synthesis model
    pub tts_model: String,

    /// Synthesis voice
    pub tts_voice: String,

    /// Synthesis speed multiplier
    pub tts_speed: f32,

    /// API key for both capabilities
    pub api_key: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "onyx".to_string(),
            tts_speed: 1.1,
            api_key: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            system_prompt: prompt::SYSTEM_INSTRUCTION.to_string(),
            wake: WakeConfig::default(),
            audio: AudioConfig::default(),
            streaming: StreamingConfig::default(),
            polling: PollingConfig::default(),
            speech: SpeechConfig::default(),
            camera_device: default_camera_device(),
            extra_models: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the standard file and the environment
    #[must_use]
    pub fn load() -> Self {
        let mut config = Self::from_file(file::load_config_file());
        config.apply_env();
        config
    }

    /// Build configuration from a parsed file overlay on top of defaults
    #[must_use]
    pub fn from_file(file: VoicelinkConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(model) = file.default_model {
            config.default_model = model;
        }
        if let Some(prompt) = file.system_prompt {
            config.system_prompt = prompt;
        }

        if let Some(phrase) = file.wake.phrase {
            config.wake.phrase = phrase;
        }
        if let Some(phrases) = file.wake.termination_phrases {
            config.wake.termination_phrases = phrases;
        }
        if let Some(ack) = file.wake.online_ack {
            config.wake.online_ack = ack;
        }
        if let Some(ack) = file.wake.standby_ack {
            config.wake.standby_ack = ack;
        }

        let audio = &mut config.audio;
        audio.capture_rate = file.audio.capture_rate.unwrap_or(audio.capture_rate);
        audio.frame_size = file.audio.frame_size.unwrap_or(audio.frame_size).max(1);
        audio.playback_rate = file.audio.playback_rate.unwrap_or(audio.playback_rate);
        audio.input_gain = file.audio.input_gain.unwrap_or(audio.input_gain);
        audio.speaking_level = file
            .audio
            .speaking_level
            .unwrap_or(audio.speaking_level)
            .clamp(0.0, 1.0);

        if let Some(url) = file.streaming.url {
            config.streaming.url = url;
        }
        config.streaming.api_key = file.streaming.api_key;
        if let Some(voice) = file.streaming.voice {
            config.streaming.voice = voice;
        }

        if let Some(host) = file.polling.host {
            config.polling.host = host;
        }
        if let Some(model) = file.polling.vision_model {
            config.polling.vision_model = model;
        }
        if let Some(apology) = file.polling.apology {
            config.polling.apology = apology;
        }

        if let Some(model) = file.speech.stt_model {
            config.speech.stt_model = model;
        }
        if let Some(model) = file.speech.tts_model {
            config.speech.tts_model = model;
        }
        if let Some(voice) = file.speech.tts_voice {
            config.speech.tts_voice = voice;
        }
        if let Some(speed) = file.speech.tts_speed {
            config.speech.tts_speed = speed.clamp(0.25, 4.0);
        }
        config.speech.api_key = file.speech.api_key;

        if let Some(camera) = file.camera_device {
            config.camera_device = if camera.is_empty() {
                None
            } else {
                Some(PathBuf::from(camera))
            };
        }

        config.extra_models = file.models;
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env(&mut self) {
        if let Ok(model) = std::env::var("VOICELINK_MODEL") {
            self.default_model = model;
        }
        if let Ok(phrase) = std::env::var("VOICELINK_WAKE_PHRASE") {
            self.wake.phrase = phrase;
        }
        if let Ok(url) = std::env::var("VOICELINK_STREAMING_URL") {
            self.streaming.url = url;
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.streaming.api_key = Some(key);
        }
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            self.polling.host = host;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.speech.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("VOICELINK_STT_MODEL") {
            self.speech.stt_model = model;
        }
        if let Ok(model) = std::env::var("VOICELINK_TTS_MODEL") {
            self.speech.tts_model = model;
        }
        if let Ok(camera) = std::env::var("VOICELINK_CAMERA") {
            self.camera_device = if camera.is_empty() {
                None
            } else {
                Some(PathBuf::from(camera))
            };
        }
    }

    /// Model catalogue including config-file entries
    #[must_use]
    pub fn catalog(&self) -> ModelCatalog {
        let mut catalog = ModelCatalog::builtin();
        catalog.extend(self.extra_models.iter().cloned());
        catalog
    }
}

/// Platform default camera node
fn default_camera_device() -> Option<PathBuf> {
    if cfg!(target_os = "linux") {
        Some(PathBuf::from("/dev/video0"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_audio_shape() {
        let config = Config::default();
        assert_eq!(config.audio.capture_rate, 16_000);
        assert_eq!(config.audio.frame_size, 4096);
        assert_eq!(config.wake.phrase, "jarvis");
        assert!(config.wake.termination_phrases.iter().any(|p| p == "dismissed"));
    }

    #[test]
    fn file_overlay_keeps_unset_defaults() {
        let file = VoicelinkConfigFile {
            default_model: Some("llama3".to_string()),
            wake: file::WakeFileConfig {
                phrase: Some("friday".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let config = Config::from_file(file);
        assert_eq!(config.default_model, "llama3");
        assert_eq!(config.wake.phrase, "friday");
        assert_eq!(config.wake.standby_ack, "Standing by.");
        assert_eq!(config.polling.host, DEFAULT_POLLING_HOST);
    }

    #[test]
    fn empty_camera_disables_detection() {
        let file = VoicelinkConfigFile {
            camera_device: Some(String::new()),
            ..Default::default()
        };
        assert!(Config::from_file(file).camera_device.is_none());
    }
}
