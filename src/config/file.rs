//! TOML configuration file loading
//!
//! Supports `~/.config/voicelink/config.toml` as a persistent config source.
//! All fields are optional, the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::catalog::ModelDescriptor;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoicelinkConfigFile {
    /// Model to connect when none is given on the command line
    #[serde(default)]
    pub default_model: Option<String>,

    /// System instruction override
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Wake-word gate configuration
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Audio pipeline configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Streaming backend configuration
    #[serde(default)]
    pub streaming: StreamingFileConfig,

    /// Polling backend configuration
    #[serde(default)]
    pub polling: PollingFileConfig,

    /// Speech capability configuration
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Camera device path
    #[serde(default)]
    pub camera_device: Option<String>,

    /// Additional catalogue entries
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}

/// Wake-word gate configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Activation phrase (e.g. "jarvis")
    pub phrase: Option<String>,

    /// Phrases that return the session to standby
    pub termination_phrases: Option<Vec<String>>,

    /// Spoken when woken with the bare wake phrase
    pub online_ack: Option<String>,

    /// Spoken when returning to standby
    pub standby_ack: Option<String>,
}

/// Audio pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub capture_rate: Option<u32>,
    pub frame_size: Option<usize>,
    pub playback_rate: Option<u32>,
    pub input_gain: Option<f32>,
    pub speaking_level: Option<f32>,
}

/// Streaming backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct StreamingFileConfig {
    /// WebSocket endpoint
    pub url: Option<String>,

    /// API key (prefer the environment)
    pub api_key: Option<String>,

    /// Prebuilt voice name
    pub voice: Option<String>,
}

/// Polling backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct PollingFileConfig {
    /// Inference server base URL
    pub host: Option<String>,

    /// Model used for camera frames when the chat model lacks vision
    pub vision_model: Option<String>,

    /// Spoken when the backend cannot be reached
    pub apology: Option<String>,
}

/// Speech capability configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    pub stt_model: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f32>,
    pub api_key: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoicelinkConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoicelinkConfigFile {
    let Some(path) = config_file_path() else {
        return VoicelinkConfigFile::default();
    };

    load_config_file_from(&path)
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files fall back to defaults with a warning.
pub fn load_config_file_from(path: &Path) -> VoicelinkConfigFile {
    if !path.exists() {
        return VoicelinkConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoicelinkConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoicelinkConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voicelink/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voicelink").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_default() {
        let cfg = load_config_file_from(Path::new("/nonexistent/voicelink.toml"));
        assert!(cfg.default_model.is_none());
        assert!(cfg.models.is_empty());
    }

    #[test]
    fn parses_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_model = "llama3"

[wake]
phrase = "Friday"
termination_phrases = ["friday sleep"]

[audio]
frame_size = 2048

[[models]]
id = "qwen2"
name = "Qwen 2"
provider = "polling"
family = "qwen"
tier = "LOW"
"#,
        )
        .unwrap();

        let cfg = load_config_file_from(&path);
        assert_eq!(cfg.default_model.as_deref(), Some("llama3"));
        assert_eq!(cfg.wake.phrase.as_deref(), Some("Friday"));
        assert_eq!(cfg.audio.frame_size, Some(2048));
        assert_eq!(cfg.models.len(), 1);
        assert!(!cfg.models[0].supports_streaming_audio);
    }

    #[test]
    fn malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "wake = [not toml").unwrap();

        let cfg = load_config_file_from(&path);
        assert!(cfg.wake.phrase.is_none());
    }
}
