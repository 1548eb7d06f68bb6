//! Provider sessions
//!
//! A session owns the audio devices for its lifetime and speaks to one
//! model backend. Two variants share one contract:
//!
//! - [`StreamingSession`]: persistent duplex channel carrying audio and
//!   tool calls
//! - [`PollingSession`]: one chat request per recognized utterance,
//!   replies synthesized locally
//!
//! [`SessionController`] is the caller-owned handle that keeps at most one
//! of them alive.

pub mod devices;
pub mod log;
pub mod polling;
pub mod protocol;
pub mod state;
pub mod streaming;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub use devices::{Camera, DeviceProvider, MediaDevices, SystemDevices};
pub use log::{EventLog, LogEntry, LogSource, Severity};
pub use polling::{ChatTransport, OllamaClient, PollingSession, Role, Turn};
pub use state::{ConnectionState, StateCell};
pub use streaming::{DuplexTransport, StreamingSession, TransportConnector, WebSocketConnector};

use crate::catalog::{ModelCatalog, ModelDescriptor, ProviderKind};
use crate::config::Config;
use crate::tools::{ToolBridge, VisionLink};
use crate::voice::{
    AudioFrame, CaptureOptions, CapturePipeline, CaptureTaps, GateState, LevelMeter,
    PlaybackScheduler, RecognitionSwitch, Synthesizer, Transcriber, Utterance, WakeWordGate,
    spawn_recognizer,
};
use crate::{Error, Result};

/// Common contract of both session variants
#[async_trait]
pub trait AgentSession: Send {
    /// Open the backend and start audio
    ///
    /// # Errors
    ///
    /// Returns error if the model is unknown, the backend rejects the
    /// handshake or the output device cannot be opened. The session is
    /// left in `Error`.
    async fn connect(&mut self, devices: MediaDevices, model_id: &str) -> Result<()>;

    /// Stop audio forwarding, stop the event loop and release devices
    async fn disconnect(&mut self);

    /// Submit one JPEG camera frame for analysis
    ///
    /// # Errors
    ///
    /// Returns error if the session is not connected
    async fn analyze_visual_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Current connection state
    fn state(&self) -> ConnectionState;
}

/// Collaborators shared by every session a controller creates
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<Config>,
    pub catalog: Arc<ModelCatalog>,
    pub log: EventLog,
    pub meter: LevelMeter,
    pub bridge: Arc<ToolBridge>,
    pub devices: Arc<dyn DeviceProvider>,
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl SessionContext {
    /// Build a context with a fresh log and level meter
    #[must_use]
    pub fn new(
        config: Config,
        bridge: Arc<ToolBridge>,
        devices: Arc<dyn DeviceProvider>,
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        let catalog = Arc::new(config.catalog());
        Self {
            config: Arc::new(config),
            catalog,
            log: EventLog::new(),
            meter: LevelMeter::new(),
            bridge,
            devices,
            transcriber,
            synthesizer,
        }
    }

    /// Look up a model, logging when it is missing
    pub(crate) fn model(&self, model_id: &str) -> Result<ModelDescriptor> {
        self.catalog.get(model_id).cloned().ok_or_else(|| {
            self.log
                .error(LogSource::System, format!("Unknown model: {model_id}"));
            Error::ModelNotFound(model_id.to_string())
        })
    }
}

/// Commands from the session handle to its event loop
#[derive(Debug)]
pub(crate) enum LoopCommand {
    /// A JPEG frame to analyze
    Frame(Vec<u8>),
    Shutdown,
}

struct RigParts {
    capture: CapturePipeline,
    recognizer: JoinHandle<()>,
}

/// Device-side half of a running session
///
/// Clones share the devices; whichever side stops first releases them.
#[derive(Clone)]
pub(crate) struct AudioRig {
    parts: Arc<Mutex<Option<RigParts>>>,
}

impl AudioRig {
    /// Halt forwarding, release the microphone and stop recognition
    pub(crate) fn stop(&self) {
        let parts = self.parts.lock().ok().and_then(|mut parts| parts.take());
        if let Some(mut parts) = parts {
            parts.capture.stop();
            parts.recognizer.abort();
        }
    }
}

/// Loop-side half of a running session, moved into the event loop
pub(crate) struct LoopAudio {
    pub gate: GateState,
    pub scheduler: PlaybackScheduler,
    pub utterances: mpsc::UnboundedReceiver<Result<Utterance>>,
    pub completions: mpsc::UnboundedReceiver<u64>,
    pub recognition: RecognitionSwitch,
}

/// Open the speaker, then start capture and the local recognizer
///
/// Frames reach `forward` only while the gate is ACTIVE.
pub(crate) fn start_audio(
    ctx: &SessionContext,
    devices: MediaDevices,
    forward: Option<mpsc::UnboundedSender<AudioFrame>>,
) -> Result<(AudioRig, LoopAudio)> {
    let audio = &ctx.config.audio;

    let (completions_tx, completions) = mpsc::unbounded_channel();
    let sink = ctx
        .devices
        .open_output(audio.playback_rate, completions_tx)?;
    let scheduler = PlaybackScheduler::new(sink, ctx.meter.clone(), audio.speaking_level);

    let gate = GateState::new(WakeWordGate::from_config(&ctx.config.wake));

    let (feed_tx, feed_rx) = mpsc::unbounded_channel();
    let capture = CapturePipeline::spawn(
        devices.input,
        CaptureOptions {
            frame_size: audio.frame_size,
            input_gain: audio.input_gain,
        },
        ctx.meter.clone(),
        gate.subscribe(),
        CaptureTaps {
            recognizer: Some(feed_tx),
            forward,
        },
    )?;

    let (utterance_tx, utterances) = mpsc::unbounded_channel();
    let recognizer = spawn_recognizer(
        feed_rx,
        Arc::clone(&ctx.transcriber),
        capture.sample_rate(),
        utterance_tx,
    );
    let recognition = capture.recognition();

    Ok((
        AudioRig {
            parts: Arc::new(Mutex::new(Some(RigParts {
                capture,
                recognizer,
            }))),
        },
        LoopAudio {
            gate,
            scheduler,
            utterances,
            completions,
            recognition,
        },
    ))
}

/// Caller-owned handle enforcing a single live session
pub struct SessionController {
    ctx: SessionContext,
    connector: Arc<dyn TransportConnector>,
    chat: Arc<dyn ChatTransport>,
    vision: VisionLink,
    state: StateCell,
    session: Option<Box<dyn AgentSession>>,
}

impl SessionController {
    /// Create a controller over its collaborators
    #[must_use]
    pub fn new(
        ctx: SessionContext,
        connector: Arc<dyn TransportConnector>,
        chat: Arc<dyn ChatTransport>,
        vision: VisionLink,
    ) -> Self {
        Self {
            ctx,
            connector,
            chat,
            vision,
            state: StateCell::new(),
            session: None,
        }
    }

    /// Acquire devices and connect a new session for `model_id`
    ///
    /// Any existing session is disconnected first.
    ///
    /// # Errors
    ///
    /// Returns error if the model is unknown, no microphone can be opened,
    /// or the session fails to connect
    pub async fn connect(&mut self, model_id: &str) -> Result<()> {
        self.disconnect().await;

        let state = StateCell::new();
        self.state = state.clone();

        let model = match self.ctx.model(model_id) {
            Ok(model) => model,
            Err(e) => {
                state.transition(ConnectionState::Connecting)?;
                state.fail();
                return Err(e);
            }
        };

        state.transition(ConnectionState::Connecting)?;

        let devices = match MediaDevices::acquire(
            self.ctx.devices.as_ref(),
            self.ctx.config.audio.capture_rate,
            &self.ctx.log,
        ) {
            Ok(devices) => devices,
            Err(e) => {
                state.fail();
                return Err(e);
            }
        };
        let has_camera = devices.has_camera();

        let mut session: Box<dyn AgentSession> = match model.provider {
            ProviderKind::Streaming => Box::new(StreamingSession::new(
                self.ctx.clone(),
                Arc::clone(&self.connector),
                state,
            )),
            ProviderKind::Polling => Box::new(PollingSession::new(
                self.ctx.clone(),
                Arc::clone(&self.chat),
                state,
            )),
        };

        tracing::info!(model = %model.id, provider = %model.provider, "connecting session");
        let result = session.connect(devices, &model.id).await;
        self.session = Some(session);

        if result.is_ok() {
            self.vision.set_available(has_camera);
        }
        result
    }

    /// Disconnect the live session, if any
    pub async fn disconnect(&mut self) {
        self.vision.set_available(false);
        if let Some(mut session) = self.session.take() {
            session.disconnect().await;
        }
    }

    /// Forward a camera frame to the live session
    ///
    /// # Errors
    ///
    /// Returns error if there is no connected session
    pub async fn analyze_visual_frame(&mut self, frame: &[u8]) -> Result<()> {
        match self.session.as_mut() {
            Some(session) => session.analyze_visual_frame(frame).await,
            None => Err(Error::Session("no active session".to_string())),
        }
    }

    /// State of the current (or last) session
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Observe the current session's state
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Interface log
    #[must_use]
    pub const fn log(&self) -> &EventLog {
        &self.ctx.log
    }

    /// Audio level meter
    #[must_use]
    pub const fn meter(&self) -> &LevelMeter {
        &self.ctx.meter
    }

    /// Camera link used by the scan tool
    #[must_use]
    pub const fn vision(&self) -> &VisionLink {
        &self.vision
    }
}
