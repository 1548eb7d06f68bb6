//! Speech-to-text and text-to-speech capabilities
//!
//! Both are external services; the traits are the seam sessions depend on,
//! the OpenAI-backed types are the default implementations.

use async_trait::async_trait;

use super::capture::samples_to_wav;
use super::playback::{DecodedAudio, decode_mp3};
use crate::config::SpeechConfig;
use crate::{Error, Result};

/// Default API base for both capabilities
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Turns a complete utterance into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe mono samples
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String>;
}

/// Turns text into encoded speech, MP3 unless `decode` says otherwise
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Decode what [`Synthesizer::synthesize`] returned
    ///
    /// # Errors
    ///
    /// Returns `PlaybackDecode` if the audio cannot be decoded
    fn decode(&self, encoded: &[u8]) -> Result<DecodedAudio> {
        decode_mp3(encoded)
    }
}

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes speech with OpenAI Whisper
pub struct WhisperTranscriber {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl WhisperTranscriber {
    /// Create a new Whisper transcriber
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: OPENAI_API_BASE.to_string(),
        })
    }

    /// Create a transcriber from speech configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn from_config(config: &SpeechConfig) -> Result<Self> {
        Self::new(
            config.api_key.clone().unwrap_or_default(),
            config.stt_model.clone(),
        )
    }

    /// Point at a different API base
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        let audio = samples_to_wav(samples, sample_rate)?;
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

/// Synthesizes speech with the OpenAI speech API
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    speed: f32,
    model: String,
    base_url: String,
}

impl OpenAiSynthesizer {
    /// Create a new synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, voice: String, speed: f32, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            speed,
            model,
            base_url: OPENAI_API_BASE.to_string(),
        })
    }

    /// Create a synthesizer from speech configuration
    ///
    /// # Errors
    ///
    /// Returns error if no API key is configured
    pub fn from_config(config: &SpeechConfig) -> Result<Self> {
        Self::new(
            config.api_key.clone().unwrap_or_default(),
            config.tts_voice.clone(),
            config.tts_speed,
            config.tts_model.clone(),
        )
    }

    /// Point at a different API base
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Synthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(chars = text.len(), audio_bytes = audio.len(), "speech synthesized");
        Ok(audio.to_vec())
    }
}
