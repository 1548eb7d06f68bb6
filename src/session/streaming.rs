//! Streaming session over a persistent duplex channel

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::log::{EventLog, LogSource};
use super::protocol::{ClientMessage, ServerMessage, Setup, mime_sample_rate};
use super::state::{ConnectionState, StateCell};
use super::{AgentSession, AudioRig, LoopAudio, LoopCommand, MediaDevices, SessionContext};
use crate::config::StreamingConfig;
use crate::tools::{OutcomeStatus, ToolBridge, ToolCallResponse};
use crate::voice::{
    Ack, ActivationState, AudioFrame, CommitOutcome, DecodedAudio, Disposition,
    PLAYBACK_SAMPLE_RATE, Ticket, decode_pcm16, pcm_mime_type,
};
use crate::{Error, Result};

/// A connected duplex channel
#[async_trait]
pub trait DuplexTransport: Send {
    /// Send one message
    ///
    /// # Errors
    ///
    /// Returns error if the channel is broken
    async fn send(&mut self, message: &ClientMessage) -> Result<()>;

    /// Next inbound message; `None` once the channel is closed
    async fn next(&mut self) -> Option<Result<ServerMessage>>;

    /// Close the channel
    async fn close(&mut self);
}

/// Opens duplex channels
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open a channel to the streaming backend
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established
    async fn open(&self) -> Result<Box<dyn DuplexTransport>>;
}

/// WebSocket connector for the realtime API
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    api_key: Option<String>,
}

impl WebSocketConnector {
    #[must_use]
    pub const fn new(url: String, api_key: Option<String>) -> Self {
        Self { url, api_key }
    }

    #[must_use]
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self::new(config.url.clone(), config.api_key.clone())
    }

    /// Endpoint with the API key attached
    #[must_use]
    pub fn endpoint(&self) -> String {
        match &self.api_key {
            Some(key) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{sep}key={key}", self.url)
            }
            None => self.url.clone(),
        }
    }
}

#[async_trait]
impl TransportConnector for WebSocketConnector {
    async fn open(&self) -> Result<Box<dyn DuplexTransport>> {
        if self.api_key.is_none() {
            return Err(Error::TransportHandshake(
                "no API key configured for the streaming backend".to_string(),
            ));
        }

        let (stream, _response) = connect_async(self.endpoint())
            .await
            .map_err(|e| Error::TransportHandshake(e.to_string()))?;

        tracing::debug!(url = %self.url, "websocket connected");
        Ok(Box::new(WebSocketTransport { stream }))
    }
}

/// tokio-tungstenite channel carrying JSON frames
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl DuplexTransport for WebSocketTransport {
    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        self.stream
            .send(WsMessage::Text(message.to_json()?.into()))
            .await?;
        Ok(())
    }

    async fn next(&mut self) -> Option<Result<ServerMessage>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                WsMessage::Text(text) => return Some(ServerMessage::parse(text.as_str())),
                WsMessage::Binary(bytes) => {
                    let parsed = std::str::from_utf8(&bytes)
                        .map_err(|e| Error::Transport(format!("invalid utf-8 frame: {e}")))
                        .and_then(ServerMessage::parse);
                    return Some(parsed);
                }
                WsMessage::Close(frame) => {
                    tracing::debug!(?frame, "websocket closed by peer");
                    return None;
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "websocket close failed");
        }
    }
}

struct Running {
    audio: AudioRig,
    commands: mpsc::UnboundedSender<LoopCommand>,
    event_loop: JoinHandle<()>,
}

/// Session speaking the duplex audio protocol
pub struct StreamingSession {
    ctx: SessionContext,
    connector: Arc<dyn TransportConnector>,
    state: StateCell,
    running: Option<Running>,
}

impl StreamingSession {
    #[must_use]
    pub fn new(
        ctx: SessionContext,
        connector: Arc<dyn TransportConnector>,
        state: StateCell,
    ) -> Self {
        Self {
            ctx,
            connector,
            state,
            running: None,
        }
    }

    fn fail(&self, error: Error) -> Error {
        self.state.fail();
        error
    }
}

#[async_trait]
impl AgentSession for StreamingSession {
    async fn connect(&mut self, devices: MediaDevices, model_id: &str) -> Result<()> {
        if self.state.get() != ConnectionState::Connecting {
            self.state.transition(ConnectionState::Connecting)?;
        }

        let requested = self.ctx.model(model_id).map_err(|e| self.fail(e))?;
        let resolution = self.ctx.catalog.resolve_streaming(&requested);
        let model = resolution.model;

        if let Some(from) = &resolution.remapped_from {
            self.ctx.log.warning(
                LogSource::System,
                format!("Protocol alert: {from} does not support real-time audio."),
            );
            self.ctx.log.info(
                LogSource::System,
                format!("Rerouting to {} ({})...", model.name, model.id),
            );
        }

        self.ctx.log.info(
            LogSource::System,
            format!("Establishing connection to cloud core ({})...", model.id),
        );

        let setup = Setup::audio(
            &model.id,
            &self.ctx.config.streaming.voice,
            &self.ctx.config.system_prompt,
            self.ctx.bridge.declarations(),
        );
        let mut transport = match handshake(Arc::clone(&self.connector), setup).await {
            Ok(transport) => transport,
            Err(e) => {
                self.ctx
                    .log
                    .error(LogSource::System, format!("Model handshake failed: {e}"));
                let e = match e {
                    Error::TransportHandshake(_) => e,
                    other => Error::TransportHandshake(other.to_string()),
                };
                return Err(self.fail(e));
            }
        };

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (audio, loop_audio) = match super::start_audio(&self.ctx, devices, Some(frame_tx)) {
            Ok(started) => started,
            Err(e) => {
                self.ctx
                    .log
                    .error(LogSource::System, format!("Critical Sensor Failure: {e}"));
                transport.close().await;
                return Err(self.fail(e));
            }
        };

        let (commands, command_rx) = mpsc::unbounded_channel();
        let event_loop = StreamingLoop {
            transport,
            audio: loop_audio,
            rig: audio.clone(),
            bridge: Arc::clone(&self.ctx.bridge),
            log: self.ctx.log.clone(),
            state: self.state.clone(),
            capture_mime: pcm_mime_type(self.ctx.config.audio.capture_rate),
            online_ack: self.ctx.config.wake.online_ack.clone(),
            standby_ack: self.ctx.config.wake.standby_ack.clone(),
            channels: LoopChannels::new(),
        };
        let event_loop = tokio::spawn(event_loop.run(command_rx, frame_rx));

        self.running = Some(Running {
            audio,
            commands,
            event_loop,
        });

        self.state.transition(ConnectionState::Connected)?;
        self.ctx.log.success(
            LogSource::System,
            format!("Neural link established. Mode: {}", ActivationState::Standby),
        );
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(running) = self.running.take() {
            running.audio.stop();
            let _ = running.commands.send(LoopCommand::Shutdown);
            if let Err(e) = running.event_loop.await {
                tracing::warn!(error = %e, "streaming loop ended abnormally");
            }
        }

        if self.state.get() == ConnectionState::Connected {
            let _ = self.state.transition(ConnectionState::Disconnected);
            self.ctx.log.info(LogSource::System, "Session terminated.");
        }
    }

    async fn analyze_visual_frame(&mut self, frame: &[u8]) -> Result<()> {
        let running = self
            .running
            .as_ref()
            .filter(|_| self.state.get() == ConnectionState::Connected)
            .ok_or_else(|| Error::Session("not connected".to_string()))?;

        self.ctx.log.info(LogSource::System, "Analyzing visual frame...");
        running
            .commands
            .send(LoopCommand::Frame(frame.to_vec()))
            .map_err(|_| Error::Session("event loop stopped".to_string()))
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }
}

/// Open the channel and wait for the setup acknowledgement
async fn handshake(
    connector: Arc<dyn TransportConnector>,
    setup: Setup,
) -> Result<Box<dyn DuplexTransport>> {
    let mut transport = connector.open().await?;

    transport
        .send(&ClientMessage::Setup(setup))
        .await
        .map_err(|e| Error::TransportHandshake(e.to_string()))?;

    match transport.next().await {
        Some(Ok(message)) if message.is_setup_complete() => Ok(transport),
        Some(Ok(_)) => Err(Error::TransportHandshake(
            "backend did not acknowledge setup".to_string(),
        )),
        Some(Err(e)) => Err(Error::TransportHandshake(e.to_string())),
        None => Err(Error::TransportHandshake(
            "channel closed during setup".to_string(),
        )),
    }
}

struct LoopChannels {
    decoded_tx: mpsc::UnboundedSender<(Ticket, Result<DecodedAudio>)>,
    decoded_rx: mpsc::UnboundedReceiver<(Ticket, Result<DecodedAudio>)>,
    responses_tx: mpsc::UnboundedSender<ToolCallResponse>,
    responses_rx: mpsc::UnboundedReceiver<ToolCallResponse>,
}

impl LoopChannels {
    fn new() -> Self {
        let (decoded_tx, decoded_rx) = mpsc::unbounded_channel();
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        Self {
            decoded_tx,
            decoded_rx,
            responses_tx,
            responses_rx,
        }
    }
}

/// Single owner of gate, scheduler and the outbound half of the channel
struct StreamingLoop {
    transport: Box<dyn DuplexTransport>,
    audio: LoopAudio,
    /// Stopped by the loop itself when the channel fails
    rig: AudioRig,
    bridge: Arc<ToolBridge>,
    log: EventLog,
    state: StateCell,
    capture_mime: String,
    online_ack: String,
    standby_ack: String,
    channels: LoopChannels,
}

impl StreamingLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<LoopCommand>,
        mut frames: mpsc::UnboundedReceiver<AudioFrame>,
    ) {
        loop {
            let sent = tokio::select! {
                command = commands.recv() => match command {
                    Some(LoopCommand::Frame(jpeg)) => {
                        let data = base64::engine::general_purpose::STANDARD.encode(jpeg);
                        self.transport.send(&ClientMessage::media("image/jpeg", data)).await
                    }
                    Some(LoopCommand::Shutdown) | None => break,
                },
                Some(frame) = frames.recv() => {
                    let message =
                        ClientMessage::media(self.capture_mime.clone(), frame.to_base64());
                    self.transport.send(&message).await
                }
                inbound = self.transport.next() => match inbound {
                    Some(Ok(message)) => {
                        self.on_message(&message);
                        Ok(())
                    }
                    Some(Err(e)) => {
                        self.log.error(LogSource::System, format!("System error: {e}"));
                        self.fail();
                        break;
                    }
                    None => {
                        self.log.warning(LogSource::System, "Connection severed.");
                        self.fail();
                        break;
                    }
                },
                Some(recognized) = self.audio.utterances.recv() => {
                    match recognized {
                        Ok(utterance) => self.on_utterance(&utterance.text),
                        Err(e) => self
                            .log
                            .warning(LogSource::System, format!("Transcription failed: {e}")),
                    }
                    Ok(())
                }
                Some((ticket, decoded)) = self.channels.decoded_rx.recv() => {
                    self.on_decoded(ticket, decoded);
                    Ok(())
                }
                Some(id) = self.audio.completions.recv() => {
                    self.audio.scheduler.complete(id);
                    Ok(())
                }
                Some(response) = self.channels.responses_rx.recv() => {
                    self.on_tool_response(&response);
                    self.transport.send(&ClientMessage::tool_response(vec![response])).await
                }
            };

            if let Err(e) = sent {
                self.log.error(LogSource::System, format!("System error: {e}"));
                self.fail();
                break;
            }
        }

        self.audio.scheduler.reset();
        self.transport.close().await;
        tracing::debug!("streaming loop stopped");
    }

    /// The channel is gone: release the microphone and mark the session
    fn fail(&self) {
        self.rig.stop();
        self.state.fail();
    }

    /// Gate decisions only switch audio forwarding on or off
    fn on_utterance(&mut self, text: &str) {
        let classification = self.audio.gate.apply(text);

        if classification.transitioned() {
            match classification.next_state {
                ActivationState::Active => self
                    .log
                    .success(LogSource::System, format!("Mode: {}", ActivationState::Active)),
                ActivationState::Standby => self
                    .log
                    .warning(LogSource::System, format!("Mode: {}", ActivationState::Standby)),
            }
        } else if classification.disposition == Disposition::Ignore
            && !classification.event.transcript.is_empty()
        {
            self.log
                .info(LogSource::Standby, format!("Ignored: \"{}\"", text.trim()));
        }

        // The remote model does the talking; acknowledgements are only logged
        match classification.ack {
            Some(Ack::Online) => self.log.info(LogSource::Agent, self.online_ack.clone()),
            Some(Ack::StandingBy) => self.log.info(LogSource::Agent, self.standby_ack.clone()),
            None => {}
        }
    }

    fn on_message(&mut self, message: &ServerMessage) {
        for chunk in message.audio_chunks() {
            let ticket = self.audio.scheduler.reserve();
            let rate = mime_sample_rate(&chunk.mime_type).unwrap_or(PLAYBACK_SAMPLE_RATE);
            let data = chunk.data.clone();
            let tx = self.channels.decoded_tx.clone();

            tokio::spawn(async move {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(data.as_bytes())
                    .map_err(|e| Error::PlaybackDecode(format!("invalid base64 audio: {e}")))
                    .and_then(|bytes| decode_pcm16(&bytes, rate));
                let _ = tx.send((ticket, decoded));
            });
        }

        for call in message.function_calls() {
            self.log
                .info(LogSource::Tool, format!("Executing: {}", call.name));

            let bridge = Arc::clone(&self.bridge);
            let tx = self.channels.responses_tx.clone();
            let call = call.clone();
            tokio::spawn(async move {
                let response = bridge.resolve(call).await;
                let _ = tx.send(response);
            });
        }

        if let Some(content) = &message.server_content
            && content.turn_complete
        {
            tracing::debug!(interrupted = content.interrupted, "model turn complete");
        }
    }

    fn on_decoded(&mut self, ticket: Ticket, decoded: Result<DecodedAudio>) {
        for outcome in self.audio.scheduler.commit(ticket, decoded) {
            match outcome {
                CommitOutcome::Scheduled { id, start, duration } => {
                    tracing::trace!(unit = id, start, duration, "audio unit scheduled");
                }
                CommitOutcome::Dropped { id, reason } => {
                    self.log.warning(
                        LogSource::System,
                        format!("Dropped audio unit {id}: {reason}"),
                    );
                }
            }
        }
    }

    fn on_tool_response(&self, response: &ToolCallResponse) {
        let status = response.response["result"]["status"].clone();
        let status: Option<OutcomeStatus> = serde_json::from_value(status).ok();
        let message = format!("{} completed", response.name);
        match status {
            Some(OutcomeStatus::Success) => self.log.success(LogSource::Tool, message),
            Some(OutcomeStatus::PendingAuth) => self.log.warning(
                LogSource::Tool,
                format!("{} awaiting authorization", response.name),
            ),
            _ => self
                .log
                .error(LogSource::Tool, format!("{} failed", response.name)),
        }
    }
}
