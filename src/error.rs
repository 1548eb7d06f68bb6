//! Error types for voicelink

use thiserror::Error;

/// Result type alias for voicelink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in a voice agent session
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// No usable microphone/camera, after exhausting the audio-only fallback
    #[error("device acquisition failed: {0}")]
    DeviceAcquisition(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Backend rejected the connection
    #[error("transport handshake failed: {0}")]
    TransportHandshake(String),

    /// Transport failure after the session was established
    #[error("transport error: {0}")]
    Transport(String),

    /// Tool executor returned an error or crashed
    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    /// Embedded tool call could not be parsed (never surfaced to the backend)
    #[error("malformed tool request: {0}")]
    MalformedToolRequest(String),

    /// Audio chunk could not be decoded for playback
    #[error("playback decode error: {0}")]
    PlaybackDecode(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Session lifecycle violation (e.g. connect while connected)
    #[error("session error: {0}")]
    Session(String),

    /// Unknown model id
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this failure ends the session (moves it to the error state)
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::DeviceAcquisition(_) | Self::TransportHandshake(_))
    }
}
