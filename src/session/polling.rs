//! Polling session: one chat request per recognized utterance
//!
//! There is no persistent channel. Each utterance that passes the gate is
//! appended to the turn history and the whole history is posted to the
//! local inference server. Replies are spoken through the synthesizer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::log::{EventLog, LogSource};
use super::state::{ConnectionState, StateCell};
use super::{AgentSession, AudioRig, LoopAudio, LoopCommand, MediaDevices, SessionContext};
use crate::catalog::ModelDescriptor;
use crate::config::PollingConfig;
use crate::prompt;
use crate::tools::{OutcomeStatus, ToolBridge, extract_embedded_call, follow_up_prompt};
use crate::voice::{
    Ack, ActivationState, CommitOutcome, DecodedAudio, Disposition, Synthesizer, Ticket,
};
use crate::{Error, Result};

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the chat history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Base64 images attached to the turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl Turn {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }
}

/// Request/response chat backend
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send the full history to `model` and return the reply text
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the reply is malformed
    async fn chat(&self, model: &str, history: &[Turn]) -> Result<String>;
}

/// Ollama `/api/chat` client
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    host: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl OllamaClient {
    /// Create a client for a server base URL
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(host: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create from config
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn from_config(config: &PollingConfig) -> Result<Self> {
        Self::new(config.host.clone())
    }
}

#[async_trait]
impl ChatTransport for OllamaClient {
    async fn chat(&self, model: &str, history: &[Turn]) -> Result<String> {
        let url = format!("{}/api/chat", self.host);
        tracing::debug!(model, turns = history.len(), "sending chat request");

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "model": model,
                "messages": history,
                "stream": false,
                "format": "json",
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "chat request failed ({status}): {body}"
            )));
        }

        let reply: ChatResponse = response.json().await?;
        Ok(reply.message.content)
    }
}

struct Running {
    audio: AudioRig,
    commands: mpsc::UnboundedSender<LoopCommand>,
    event_loop: JoinHandle<()>,
}

/// Session against a local request/response chat backend
pub struct PollingSession {
    ctx: SessionContext,
    chat: Arc<dyn ChatTransport>,
    state: StateCell,
    history: Arc<Mutex<Vec<Turn>>>,
    running: Option<Running>,
}

impl PollingSession {
    #[must_use]
    pub fn new(ctx: SessionContext, chat: Arc<dyn ChatTransport>, state: StateCell) -> Self {
        Self {
            ctx,
            chat,
            state,
            history: Arc::new(Mutex::new(Vec::new())),
            running: None,
        }
    }

    /// Snapshot of the turn history
    #[must_use]
    pub fn history(&self) -> Vec<Turn> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Shared history handle
    #[must_use]
    pub fn history_handle(&self) -> Arc<Mutex<Vec<Turn>>> {
        Arc::clone(&self.history)
    }

    fn fail(&self, error: Error) -> Error {
        self.state.fail();
        error
    }
}

#[async_trait]
impl AgentSession for PollingSession {
    async fn connect(&mut self, devices: MediaDevices, model_id: &str) -> Result<()> {
        if self.state.get() != ConnectionState::Connecting {
            self.state.transition(ConnectionState::Connecting)?;
        }

        let model = self.ctx.model(model_id).map_err(|e| self.fail(e))?;
        self.ctx.log.info(
            LogSource::System,
            format!("Initializing local neural net ({})...", model.id),
        );

        let (audio, loop_audio) = match super::start_audio(&self.ctx, devices, None) {
            Ok(started) => started,
            Err(e) => {
                self.ctx
                    .log
                    .error(LogSource::System, format!("Critical Sensor Failure: {e}"));
                return Err(self.fail(e));
            }
        };

        if let Ok(mut history) = self.history.lock() {
            *history = vec![Turn::new(
                Role::System,
                prompt::polling_instruction(&self.ctx.config.system_prompt),
            )];
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let event_loop = PollingLoop::new(
            &self.ctx,
            Arc::clone(&self.chat),
            Arc::clone(&self.history),
            model.clone(),
            loop_audio,
        );
        let event_loop = tokio::spawn(event_loop.run(command_rx));

        self.running = Some(Running {
            audio,
            commands,
            event_loop,
        });

        self.state.transition(ConnectionState::Connected)?;
        self.ctx.log.success(
            LogSource::System,
            format!("Local core online. Using {}", model.id),
        );
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(running) = self.running.take() {
            running.audio.stop();
            let _ = running.commands.send(LoopCommand::Shutdown);
            if let Err(e) = running.event_loop.await {
                tracing::warn!(error = %e, "polling loop ended abnormally");
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

/// Everything one request/response turn needs, cloned into its task
#[derive(Clone)]
struct TurnRunner {
    chat: Arc<dyn ChatTransport>,
    bridge: Arc<ToolBridge>,
    log: EventLog,
    history: Arc<Mutex<Vec<Turn>>>,
    model: ModelDescriptor,
    vision_model: String,
    apology: String,
}

impl TurnRunner {
    fn push(&self, turn: Turn) {
        if let Ok(mut history) = self.history.lock() {
            history.push(turn);
        }
    }

    async fn request(&self, model: &str) -> Result<String> {
        let snapshot = self
            .history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default();
        self.chat.chat(model, &snapshot).await
    }

    /// Run one user turn and return the text to speak
    ///
    /// At most one tool call is dispatched; the follow-up reply is never
    /// scanned for another.
    async fn run(self, text: String, image: Option<String>) -> String {
        let mut turn = Turn::new(Role::User, text);
        let model = match image {
            Some(image) => {
                turn.images.push(image);
                if self.model.vision_capable {
                    self.model.id.clone()
                } else {
                    self.log.info(
                        LogSource::System,
                        format!("Switching to {} for visual analysis...", self.vision_model),
                    );
                    self.vision_model.clone()
                }
            }
            None => self.model.id.clone(),
        };
        self.push(turn);

        let reply = match self.request(&model).await {
            Ok(reply) => reply,
            Err(e) => return self.apologize(&model, &e),
        };

        let reply = match extract_embedded_call(&reply) {
            Some(call) => {
                self.log
                    .info(LogSource::Tool, format!("Executing: {}", call.tool));
                let outcome = self
                    .bridge
                    .dispatch(&call.tool, &Value::Object(call.args))
                    .await;

                match outcome.status {
                    OutcomeStatus::Success => self
                        .log
                        .success(LogSource::Tool, format!("{} completed", call.tool)),
                    OutcomeStatus::PendingAuth => self.log.warning(
                        LogSource::Tool,
                        format!("{} awaiting authorization", call.tool),
                    ),
                    OutcomeStatus::Error => self.log.error(
                        LogSource::Tool,
                        format!(
                            "{} failed: {}",
                            call.tool,
                            outcome.message().unwrap_or("no details")
                        ),
                    ),
                }

                self.push(Turn::new(Role::Assistant, reply));
                self.push(Turn::new(Role::User, follow_up_prompt(&outcome)));
                self.push(Turn::new(Role::User, prompt::REPORT_TOOL_RESULT));

                match self.request(&self.model.id).await {
                    Ok(reply) => reply,
                    Err(e) => return self.apologize(&self.model.id, &e),
                }
            }
            None => reply,
        };

        self.push(Turn::new(Role::Assistant, reply.clone()));
        self.log.success(LogSource::Agent, reply.clone());
        reply
    }

    fn apologize(&self, model: &str, error: &Error) -> String {
        self.log.error(
            LogSource::System,
            format!("Local backend error: {error}. Is model '{model}' pulled?"),
        );
        self.apology.clone()
    }
}

/// Single owner of gate, scheduler and the recognition switch
struct PollingLoop {
    audio: LoopAudio,
    runner: TurnRunner,
    synthesizer: Arc<dyn Synthesizer>,
    log: EventLog,
    online_ack: String,
    standby_ack: String,
    busy: bool,
    pending_speech: usize,
    turns_tx: mpsc::UnboundedSender<String>,
    turns_rx: mpsc::UnboundedReceiver<String>,
    speech_tx: mpsc::UnboundedSender<(Ticket, Result<DecodedAudio>)>,
    speech_rx: mpsc::UnboundedReceiver<(Ticket, Result<DecodedAudio>)>,
}

impl PollingLoop {
    fn new(
        ctx: &SessionContext,
        chat: Arc<dyn ChatTransport>,
        history: Arc<Mutex<Vec<Turn>>>,
        model: ModelDescriptor,
        audio: LoopAudio,
    ) -> Self {
        let (turns_tx, turns_rx) = mpsc::unbounded_channel();
        let (speech_tx, speech_rx) = mpsc::unbounded_channel();
        Self {
            audio,
            runner: TurnRunner {
                chat,
                bridge: Arc::clone(&ctx.bridge),
                log: ctx.log.clone(),
                history,
                model,
                vision_model: ctx.config.polling.vision_model.clone(),
                apology: ctx.config.polling.apology.clone(),
            },
            synthesizer: Arc::clone(&ctx.synthesizer),
            log: ctx.log.clone(),
            online_ack: ctx.config.wake.online_ack.clone(),
            standby_ack: ctx.config.wake.standby_ack.clone(),
            busy: false,
            pending_speech: 0,
            turns_tx,
            turns_rx,
            speech_tx,
            speech_rx,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<LoopCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(LoopCommand::Frame(jpeg)) => {
                        let image = base64::engine::general_purpose::STANDARD.encode(jpeg);
                        self.start_turn(prompt::DESCRIBE_FRAME.to_string(), Some(image));
                    }
                    Some(LoopCommand::Shutdown) | None => break,
                },
                Some(recognized) = self.audio.utterances.recv() => match recognized {
                    Ok(utterance) => self.on_utterance(&utterance.text),
                    Err(e) => self
                        .log
                        .warning(LogSource::System, format!("Transcription failed: {e}")),
                },
                Some(reply) = self.turns_rx.recv() => {
                    self.busy = false;
                    self.speak(reply);
                }
                Some((ticket, speech)) = self.speech_rx.recv() => {
                    self.pending_speech = self.pending_speech.saturating_sub(1);
                    self.on_speech(ticket, speech);
                }
                Some(id) = self.audio.completions.recv() => {
                    self.audio.scheduler.complete(id);
                }
            }

            self.update_recognition();
        }

        self.audio.scheduler.reset();
        tracing::debug!("polling loop stopped");
    }

    /// Gate first; only forwarded text reaches the history
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
        }

        match classification.ack {
            Some(Ack::Online) => self.speak(self.online_ack.clone()),
            Some(Ack::StandingBy) => self.speak(self.standby_ack.clone()),
            None => {}
        }

        match classification.disposition {
            Disposition::Forward(text) => {
                if self.busy {
                    tracing::debug!(%text, "turn in progress, dropping utterance");
                    return;
                }
                self.log.info(LogSource::User, text.clone());
                self.start_turn(text, None);
            }
            Disposition::Ignore if !classification.event.transcript.is_empty() => {
                self.log
                    .info(LogSource::Standby, format!("Ignored: \"{}\"", text.trim()));
            }
            Disposition::Ignore | Disposition::Consumed => {}
        }
    }

    fn start_turn(&mut self, text: String, image: Option<String>) {
        if self.busy {
            self.log
                .warning(LogSource::System, "Still processing the previous request.");
            return;
        }

        self.busy = true;
        self.audio.recognition.suspend();

        let runner = self.runner.clone();
        let tx = self.turns_tx.clone();
        tokio::spawn(async move {
            let reply = runner.run(text, image).await;
            let _ = tx.send(reply);
        });
    }

    /// Synthesize off the loop; the timeline slot is taken now so
    /// speech plays in the order it was requested
    fn speak(&mut self, text: String) {
        if text.trim().is_empty() {
            return;
        }

        self.pending_speech += 1;
        self.audio.recognition.suspend();

        let ticket = self.audio.scheduler.reserve();
        let synthesizer = Arc::clone(&self.synthesizer);
        let tx = self.speech_tx.clone();
        tokio::spawn(async move {
            let audio = synthesizer
                .synthesize(&text)
                .await
                .and_then(|encoded| synthesizer.decode(&encoded));
            let _ = tx.send((ticket, audio));
        });
    }

    fn on_speech(&mut self, ticket: Ticket, speech: Result<DecodedAudio>) {
        for outcome in self.audio.scheduler.commit(ticket, speech) {
            match outcome {
                CommitOutcome::Scheduled { id, start, duration } => {
                    tracing::trace!(unit = id, start, duration, "speech scheduled");
                }
                CommitOutcome::Dropped { reason, .. } => {
                    self.log.warning(
                        LogSource::System,
                        format!("Speech playback failed: {reason}"),
                    );
                }
            }
        }
    }

    /// Listen only while nothing is being processed or spoken
    fn update_recognition(&self) {
        if self.busy || self.pending_speech > 0 || self.audio.scheduler.is_playing() {
            self.audio.recognition.suspend();
        } else {
            self.audio.recognition.resume();
        }
    }
}
