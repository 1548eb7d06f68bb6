//! voicelink - Wake-word gated voice agent with tool execution
//!
//! This library provides the core of a hands-free desktop voice agent:
//! - Audio capture, level metering and gapless playback
//! - Wake-word gating of recognized speech
//! - Two model backends behind one session contract (a streaming duplex
//!   socket and a polled local chat server)
//! - A tool catalogue bridging model requests to host commands, smart-home
//!   devices and the camera
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  SessionController                   │
//! │   connect │ disconnect │ analyze frame │ event log   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │     StreamingSession        │     PollingSession     │
//! │  duplex socket, model audio │  chat turns, local TTS │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │  voice: capture │ gate │ recognizer │ playback       │
//! │  tools: bridge  │ executor │ devices │ updates       │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod prompt;
pub mod session;
pub mod tools;
pub mod voice;

pub use catalog::{ModelCatalog, ModelDescriptor, ProviderKind};
pub use config::Config;
pub use error::{Error, Result};
pub use session::{AgentSession, ConnectionState, EventLog, SessionContext, SessionController};
pub use tools::{ToolBridge, ToolOutcome};
