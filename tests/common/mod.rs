//! Shared test utilities
//!
//! Scripted stand-ins for the microphone, speaker, recognizer, synthesizer
//! and streaming channel, so sessions run end to end without hardware.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use voicelink::config::Config;
use voicelink::session::protocol::{ClientMessage, ServerMessage};
use voicelink::session::{
    Camera, ChatTransport, DeviceProvider, DuplexTransport, SessionContext, TransportConnector,
    Turn,
};
use voicelink::tools::{
    HostExecutor, InMemoryDeviceRegistry, ProcessBridge, ToolBridge, ToolExecutor, ToolOutcome,
    UpdateQueue, VisionLink, builtin_tools,
};
use voicelink::voice::{
    AudioInput, DecodedAudio, PlaybackSink, PlaybackUnit, Synthesizer, Transcriber, decode_pcm16,
};
use voicelink::{Error, Result};

/// Capture rate of the scripted microphone
pub const MIC_RATE: u32 = 16_000;

/// Samples per frame in test configs
pub const FRAME: usize = 4096;

/// Rate of the mock speaker and of synthesized speech
pub const SPEAKER_RATE: u32 = 24_000;

/// Poll `check` until it holds or five seconds pass
pub async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Run `future` with a five second limit
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

/// Microphone whose samples are pushed by the test
#[derive(Clone, Default)]
pub struct ScriptedMic {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<f32>>>>>,
}

impl ScriptedMic {
    /// Whether a capture pipeline is attached
    pub fn is_started(&self) -> bool {
        self.tx.lock().unwrap().is_some()
    }

    /// One utterance: a loud burst followed by enough silence to end it
    pub fn speak(&self) {
        let tx = self.tx.lock().unwrap();
        let tx = tx.as_ref().expect("microphone not started");
        for _ in 0..2 {
            tx.send(vec![0.5; FRAME]).unwrap();
        }
        for _ in 0..3 {
            tx.send(vec![0.0; FRAME]).unwrap();
        }
    }
}

impl AudioInput for ScriptedMic {
    fn start(&mut self, tx: mpsc::UnboundedSender<Vec<f32>>) -> Result<()> {
        *self.tx.lock().unwrap() = Some(tx);
        Ok(())
    }

    fn stop(&mut self) {
        self.tx.lock().unwrap().take();
    }

    fn sample_rate(&self) -> u32 {
        MIC_RATE
    }
}

/// Speaker that finishes every unit the moment it is queued
pub struct ImmediateSink {
    completions: mpsc::UnboundedSender<u64>,
    played: Arc<AtomicUsize>,
    queued: Arc<Mutex<Vec<usize>>>,
}

impl PlaybackSink for ImmediateSink {
    fn clock(&self) -> f64 {
        0.0
    }

    fn sample_rate(&self) -> u32 {
        SPEAKER_RATE
    }

    fn enqueue(&mut self, unit: PlaybackUnit) -> Result<()> {
        self.queued.lock().unwrap().push(unit.samples.len());
        self.played.fetch_add(1, Ordering::SeqCst);
        let _ = self.completions.send(unit.id);
        Ok(())
    }

    fn clear(&mut self) {}
}

/// Device provider backed by the scripted microphone
#[derive(Clone, Default)]
pub struct MockDevices {
    pub mic: ScriptedMic,
    pub played: Arc<AtomicUsize>,
    /// Sample count of every unit the speaker was given, in order
    pub queued: Arc<Mutex<Vec<usize>>>,
    pub camera: bool,
    pub no_microphone: bool,
}

impl MockDevices {
    pub fn queued(&self) -> Vec<usize> {
        self.queued.lock().unwrap().clone()
    }

    pub fn with_camera() -> Self {
        Self {
            camera: true,
            ..Self::default()
        }
    }

    pub fn without_microphone() -> Self {
        Self {
            no_microphone: true,
            ..Self::default()
        }
    }
}

impl DeviceProvider for MockDevices {
    fn open_input(&self, _target_rate: u32) -> Result<Box<dyn AudioInput>> {
        if self.no_microphone {
            return Err(Error::Audio("no input device available".to_string()));
        }
        Ok(Box::new(self.mic.clone()))
    }

    fn open_output(
        &self,
        _preferred_rate: u32,
        completions: mpsc::UnboundedSender<u64>,
    ) -> Result<Box<dyn PlaybackSink>> {
        Ok(Box::new(ImmediateSink {
            completions,
            played: Arc::clone(&self.played),
            queued: Arc::clone(&self.queued),
        }))
    }

    fn detect_camera(&self) -> Result<Camera> {
        if self.camera {
            Ok(Camera {
                path: PathBuf::from("/dev/video0"),
            })
        } else {
            Err(Error::DeviceAcquisition("no camera".to_string()))
        }
    }
}

/// Recognizer returning queued transcripts in order
///
/// A `None` entry makes that transcription fail.
#[derive(Clone, Default)]
pub struct ScriptedTranscriber {
    transcripts: Arc<Mutex<VecDeque<Option<String>>>>,
}

impl ScriptedTranscriber {
    pub fn push(&self, text: &str) {
        self.transcripts
            .lock()
            .unwrap()
            .push_back(Some(text.to_string()));
    }

    pub fn fail_next(&self) {
        self.transcripts.lock().unwrap().push_back(None);
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _samples: &[f32], _sample_rate: u32) -> Result<String> {
        match self.transcripts.lock().unwrap().pop_front() {
            Some(Some(text)) => Ok(text),
            Some(None) => Err(Error::Stt("recognizer unavailable".to_string())),
            None => Ok(String::new()),
        }
    }
}

/// Synthesizer recording what it was asked to say
///
/// Speech is silent PCM16 at the speaker rate, [`speech_samples`] long, so
/// the speaker log shows which phrase played. Phrases given a delay take
/// that long to come back.
#[derive(Clone, Default)]
pub struct RecordingSynthesizer {
    pub spoken: Arc<Mutex<Vec<String>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
}

impl RecordingSynthesizer {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn delay(&self, text: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(text.to_string(), delay);
    }
}

/// Samples the synthesizer produces for `text`
pub fn speech_samples(text: &str) -> usize {
    text.len() * 240
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.spoken.lock().unwrap().push(text.to_string());
        let delay = self.delays.lock().unwrap().get(text).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(vec![0; speech_samples(text) * 2])
    }

    fn decode(&self, encoded: &[u8]) -> Result<DecodedAudio> {
        decode_pcm16(encoded, SPEAKER_RATE)
    }
}

/// Executor that only counts how often it runs
#[derive(Clone, Default)]
pub struct CountingExecutor {
    pub calls: Arc<AtomicUsize>,
}

impl CountingExecutor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolExecutor for CountingExecutor {
    async fn execute(&self, _name: &str, _args: &Value) -> Result<ToolOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutcome::success())
    }
}

/// Chat backend that must never be reached
pub struct UnreachableChat;

#[async_trait]
impl ChatTransport for UnreachableChat {
    async fn chat(&self, _model: &str, _history: &[Turn]) -> Result<String> {
        Err(Error::Transport("chat backend not expected".to_string()))
    }
}

/// Test-side ends of a scripted duplex channel
#[derive(Clone)]
pub struct ChannelScript {
    /// Frames the client sent, as JSON
    pub sent: Arc<Mutex<Vec<Value>>>,
    /// Push a server frame
    pub inbound: mpsc::UnboundedSender<Result<ServerMessage>>,
}

impl ChannelScript {
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    /// Push a server frame from JSON text
    pub fn server(&self, json: &str) {
        self.inbound
            .send(Ok(ServerMessage::parse(json).unwrap()))
            .unwrap();
    }

    /// Client frames carrying the given top-level key
    pub fn sent_with(&self, key: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|frame| frame.get(key).is_some())
            .collect()
    }
}

struct ScriptedTransport {
    sent: Arc<Mutex<Vec<Value>>>,
    inbound: mpsc::UnboundedReceiver<Result<ServerMessage>>,
}

#[async_trait]
impl DuplexTransport for ScriptedTransport {
    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json: Value = serde_json::from_str(&message.to_json()?)?;
        self.sent.lock().unwrap().push(json);
        Ok(())
    }

    async fn next(&mut self) -> Option<Result<ServerMessage>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// Connector handing out one scripted channel
pub struct MockConnector {
    transport: Mutex<Option<ScriptedTransport>>,
    refuse: bool,
}

impl MockConnector {
    /// A channel whose server side is driven through the returned script
    pub fn scripted() -> (Self, ChannelScript) {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let connector = Self {
            transport: Mutex::new(Some(ScriptedTransport {
                sent: Arc::clone(&sent),
                inbound,
            })),
            refuse: false,
        };
        (
            connector,
            ChannelScript {
                sent,
                inbound: inbound_tx,
            },
        )
    }

    /// A connector whose open always fails
    pub fn refusing() -> Self {
        Self {
            transport: Mutex::new(None),
            refuse: true,
        }
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn open(&self) -> Result<Box<dyn DuplexTransport>> {
        if self.refuse {
            return Err(Error::TransportHandshake("connection refused".to_string()));
        }
        match self.transport.lock().unwrap().take() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(Error::TransportHandshake("already opened".to_string())),
        }
    }
}

/// Config with test-friendly audio framing
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.audio.capture_rate = MIC_RATE;
    config.audio.frame_size = FRAME;
    config.camera_device = None;
    config
}

/// Everything a session test needs to drive and observe a session
pub struct Harness {
    pub ctx: SessionContext,
    pub devices: MockDevices,
    pub transcriber: ScriptedTranscriber,
    pub synthesizer: RecordingSynthesizer,
    pub registry: Arc<InMemoryDeviceRegistry>,
    pub updates: UpdateQueue,
    pub vision: VisionLink,
    pub scans: mpsc::UnboundedReceiver<voicelink::tools::ScanRequest>,
}

impl Harness {
    /// Harness over the real executor and an in-memory device registry
    pub fn new(config: Config, devices: MockDevices) -> Self {
        let registry = Arc::new(InMemoryDeviceRegistry::default());
        let updates = UpdateQueue::new();
        let (vision, scans) = VisionLink::channel();

        let executor = HostExecutor::new(
            Arc::new(ProcessBridge::new()),
            registry.clone(),
            updates.clone(),
        )
        .with_vision(vision.clone());
        let bridge = Arc::new(ToolBridge::new(builtin_tools(), Arc::new(executor)));

        Self::assemble(config, devices, bridge, registry, updates, vision, scans)
    }

    /// Harness whose bridge runs `executor`
    pub fn with_executor(config: Config, executor: Arc<dyn ToolExecutor>) -> Self {
        let (vision, scans) = VisionLink::channel();
        let bridge = Arc::new(ToolBridge::new(builtin_tools(), executor));
        Self::assemble(
            config,
            MockDevices::default(),
            bridge,
            Arc::new(InMemoryDeviceRegistry::default()),
            UpdateQueue::new(),
            vision,
            scans,
        )
    }

    fn assemble(
        config: Config,
        devices: MockDevices,
        bridge: Arc<ToolBridge>,
        registry: Arc<InMemoryDeviceRegistry>,
        updates: UpdateQueue,
        vision: VisionLink,
        scans: mpsc::UnboundedReceiver<voicelink::tools::ScanRequest>,
    ) -> Self {
        let transcriber = ScriptedTranscriber::default();
        let synthesizer = RecordingSynthesizer::default();
        let ctx = SessionContext::new(
            config,
            bridge,
            Arc::new(devices.clone()),
            Arc::new(transcriber.clone()),
            Arc::new(synthesizer.clone()),
        );

        Self {
            ctx,
            devices,
            transcriber,
            synthesizer,
            registry,
            updates,
            vision,
            scans,
        }
    }

    /// Queue a transcript and speak one utterance into the microphone
    pub fn say(&self, text: &str) {
        self.transcriber.push(text);
        self.devices.mic.speak();
    }

    /// Wait until `count` units have played and the speaker has gone quiet
    pub async fn wait_for_playback(&self, count: usize) -> bool {
        let played = Arc::clone(&self.devices.played);
        let meter = self.ctx.meter.clone();
        wait_for(|| {
            played.load(Ordering::SeqCst) >= count && meter.current().output.abs() < f32::EPSILON
        })
        .await
    }
}
