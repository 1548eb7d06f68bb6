use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, mpsc, watch};
use tracing_subscriber::EnvFilter;

use voicelink::session::{LogEntry, OllamaClient, SystemDevices, WebSocketConnector};
use voicelink::tools::{
    HostExecutor, InMemoryDeviceRegistry, ProcessBridge, ToolBridge, UpdateQueue, VisionLink,
    builtin_tools,
};
use voicelink::voice::{
    ActivationState, CaptureOptions, CapturePipeline, CaptureTaps, CpalInput, CpalOutput,
    DecodedAudio, LevelMeter, OpenAiSynthesizer, PlaybackScheduler, WhisperTranscriber,
};
use voicelink::{Config, ConnectionState, SessionContext, SessionController};

/// voicelink - Wake-word gated voice agent
#[derive(Parser)]
#[command(name = "voicelink", version, about)]
struct Cli {
    /// Model to connect (see `voicelink models`)
    #[arg(short, long, env = "VOICELINK_MODEL")]
    model: Option<String>,

    /// JPEG sent to the session as the camera frame
    #[arg(long, env = "VOICELINK_FRAME")]
    frame: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Connect a session and run until interrupted (default)
    Run,
    /// List the model catalogue
    Models,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,voicelink=info",
        1 => "info,voicelink=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_session(cli.model, cli.frame).await,
        Command::Models => {
            list_models();
            Ok(())
        }
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Connect a session, print the interface log, and serve scan requests
async fn run_session(model: Option<String>, frame_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = Config::load();
    tracing::debug!(?config, "loaded configuration");

    let model_id = model.unwrap_or_else(|| config.default_model.clone());

    let frame = match &frame_path {
        Some(path) => Some(tokio::fs::read(path).await?),
        None => None,
    };

    let updates = UpdateQueue::new();
    let (vision, mut scans) = VisionLink::channel();

    let executor = HostExecutor::new(
        Arc::new(ProcessBridge::new()),
        Arc::new(InMemoryDeviceRegistry::default()),
        updates.clone(),
    )
    .with_vision(vision.clone());
    let bridge = Arc::new(ToolBridge::new(builtin_tools(), Arc::new(executor)));

    // A frame file stands in for the camera device
    let camera = frame_path.or_else(|| config.camera_device.clone());
    let devices = Arc::new(SystemDevices::new(camera));

    let transcriber = Arc::new(WhisperTranscriber::from_config(&config.speech)?);
    let synthesizer = Arc::new(OpenAiSynthesizer::from_config(&config.speech)?);
    let connector = Arc::new(WebSocketConnector::from_config(&config.streaming));
    let chat = Arc::new(OllamaClient::from_config(&config.polling)?);

    let ctx = SessionContext::new(config, bridge, devices, transcriber, synthesizer);
    let mut controller = SessionController::new(ctx, connector, chat, vision);

    let printer = tokio::spawn(print_log(controller.log().subscribe()));

    tracing::info!(model = %model_id, "starting voicelink");
    controller.connect(&model_id).await?;

    if let Some(frame) = &frame {
        controller.analyze_visual_frame(frame).await?;
    }

    let mut state = controller.subscribe_state();
    let mut pending = updates.subscribe();

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),

            Some(_) = scans.recv() => match &frame {
                Some(frame) => {
                    if let Err(e) = controller.analyze_visual_frame(frame).await {
                        tracing::warn!(error = %e, "failed to submit camera frame");
                    }
                }
                None => tracing::warn!("scan requested but no frame source is configured"),
            },

            changed = state.changed() => {
                if changed.is_err() || *state.borrow() == ConnectionState::Error {
                    break Err(anyhow::anyhow!("session failed"));
                }
            }

            changed = pending.changed() => {
                let update = pending.borrow_and_update().clone();
                if changed.is_ok()
                    && let Some(update) = update
                {
                    println!(
                        "Update proposed [{:?} risk]: {}\n  awaiting authorization",
                        update.risk_level, update.description
                    );
                }
            }
        }
    };

    controller.disconnect().await;
    printer.abort();
    outcome
}

async fn print_log(mut rx: broadcast::Receiver<LogEntry>) {
    loop {
        match rx.recv().await {
            Ok(entry) => println!(
                "{} {:<8} {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.source,
                entry.message
            ),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "log printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn list_models() {
    let config = Config::load();
    let catalog = config.catalog();

    for model in catalog.models() {
        let default = if model.id == config.default_model { "*" } else { " " };
        let vision = if model.vision_capable { "vision" } else { "" };
        println!(
            "{default} {:<48} {:<10} {:<7?} {vision}",
            model.id, model.provider, model.tier
        );
        println!("    {} - {}", model.name, model.description);
    }
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let config = Config::load();
    let input = CpalInput::new(config.audio.capture_rate)?;
    println!("Device: {}", input.device_name());

    let meter = LevelMeter::new();
    let (_activation_tx, activation) = watch::channel(ActivationState::Standby);
    let mut capture = CapturePipeline::spawn(
        Box::new(input),
        CaptureOptions {
            frame_size: config.audio.frame_size,
            input_gain: config.audio.input_gain,
        },
        meter.clone(),
        activation,
        CaptureTaps::default(),
    )?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let level = meter.current().input;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (level * 50.0).clamp(0.0, 50.0) as usize;
        let bar: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] Level: {level:.3} | [{bar}]", i + 1);
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If the level stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Test speaker output with two back-to-back tones
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone then a 660Hz tone, with no gap\n");

    let config = Config::load();
    let (completions_tx, mut completions) = mpsc::unbounded_channel();
    let sink = CpalOutput::open(config.audio.playback_rate, completions_tx)?;
    let mut scheduler = PlaybackScheduler::new(
        Box::new(sink),
        LevelMeter::new(),
        config.audio.speaking_level,
    );

    let sample_rate = scheduler.sample_rate();
    for frequency in [440.0_f32, 660.0] {
        scheduler.schedule(tone(frequency, sample_rate, 1.0))?;
    }

    println!("Playing at {sample_rate} Hz...");

    while scheduler.is_playing() {
        match tokio::time::timeout(Duration::from_secs(5), completions.recv()).await {
            Ok(Some(id)) => scheduler.complete(id),
            Ok(None) | Err(_) => break,
        }
    }

    println!("\n---");
    println!("If you heard both tones, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tone(frequency: f32, sample_rate: u32, seconds: f32) -> DecodedAudio {
    let count = (sample_rate as f32 * seconds) as usize;
    let samples = (0..count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    DecodedAudio {
        samples,
        sample_rate,
    }
}
