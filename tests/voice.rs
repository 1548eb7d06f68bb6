//! Voice pipeline integration tests
//!
//! Tests voice components without requiring audio hardware

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use voicelink::voice::{
    ActivationState, CaptureOptions, CapturePipeline, CaptureTaps, CommitOutcome, DecodedAudio,
    GateState, LevelMeter, PlaybackScheduler, PlaybackSink, PlaybackUnit, RecognizerFeed,
    WakeWordGate, decode_pcm16, samples_to_wav,
};
use voicelink::{Error, Result};

mod common;
use common::{FRAME, ScriptedMic, within};

/// Units a sink was given, with a clock the test moves
#[derive(Clone, Default)]
struct ManualSink {
    clock: Arc<Mutex<f64>>,
    units: Arc<Mutex<Vec<(u64, f64, f64)>>>,
    cleared: Arc<Mutex<bool>>,
}

impl ManualSink {
    fn set_clock(&self, seconds: f64) {
        *self.clock.lock().unwrap() = seconds;
    }

    fn units(&self) -> Vec<(u64, f64, f64)> {
        self.units.lock().unwrap().clone()
    }
}

impl PlaybackSink for ManualSink {
    fn clock(&self) -> f64 {
        *self.clock.lock().unwrap()
    }

    fn sample_rate(&self) -> u32 {
        1000
    }

    fn enqueue(&mut self, unit: PlaybackUnit) -> Result<()> {
        self.units
            .lock()
            .unwrap()
            .push((unit.id, unit.start_not_before, unit.duration));
        Ok(())
    }

    fn clear(&mut self) {
        *self.cleared.lock().unwrap() = true;
    }
}

/// `seconds` of silence at the sink's rate
fn silence(seconds: f64) -> DecodedAudio {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let count = (seconds * 1000.0) as usize;
    DecodedAudio {
        samples: vec![0.0; count],
        sample_rate: 1000,
    }
}

fn scheduler(sink: &ManualSink) -> (PlaybackScheduler, LevelMeter) {
    let meter = LevelMeter::new();
    (
        PlaybackScheduler::new(Box::new(sink.clone()), meter.clone(), 0.8),
        meter,
    )
}

#[test]
fn test_units_play_back_to_back() {
    let sink = ManualSink::default();
    let (mut scheduler, _) = scheduler(&sink);
    sink.set_clock(10.0);

    assert_ok!(scheduler.schedule(silence(0.5)));
    assert_ok!(scheduler.schedule(silence(0.25)));
    assert_ok!(scheduler.schedule(silence(1.0)));

    let starts: Vec<f64> = sink.units().iter().map(|u| u.1).collect();
    assert_eq!(starts, vec![10.0, 10.5, 10.75]);
    assert!((scheduler.next_playback_time() - 11.75).abs() < 1e-9);
}

#[test]
fn test_late_unit_starts_at_clock() {
    let sink = ManualSink::default();
    let (mut scheduler, _) = scheduler(&sink);

    assert_ok!(scheduler.schedule(silence(0.5)));
    sink.set_clock(3.0);
    let start = assert_ok!(scheduler.schedule(silence(0.5)));

    assert!((start - 3.0).abs() < 1e-9);
}

#[test]
fn test_out_of_order_decodes_commit_in_arrival_order() {
    let sink = ManualSink::default();
    let (mut scheduler, _) = scheduler(&sink);

    let first = scheduler.reserve();
    let second = scheduler.reserve();
    let third = scheduler.reserve();

    assert!(scheduler.commit(third, Ok(silence(0.1))).is_empty());
    assert!(scheduler.commit(second, Ok(silence(0.2))).is_empty());
    assert!(sink.units().is_empty());

    let outcomes = scheduler.commit(first, Ok(silence(0.3)));
    assert_eq!(outcomes.len(), 3);

    let ids: Vec<u64> = sink.units().iter().map(|u| u.0).collect();
    assert_eq!(ids, vec![first.id(), second.id(), third.id()]);
    let starts: Vec<f64> = sink.units().iter().map(|u| u.1).collect();
    assert!((starts[1] - 0.3).abs() < 1e-9);
    assert!((starts[2] - 0.5).abs() < 1e-9);
}

#[test]
fn test_failed_decode_does_not_advance_timeline() {
    let sink = ManualSink::default();
    let (mut scheduler, _) = scheduler(&sink);

    scheduler.schedule(silence(0.5)).unwrap();
    let bad = scheduler.reserve();
    let outcomes = scheduler.commit(bad, Err(Error::PlaybackDecode("corrupt".to_string())));

    assert!(matches!(outcomes.as_slice(), [CommitOutcome::Dropped { .. }]));
    assert!((scheduler.next_playback_time() - 0.5).abs() < 1e-9);

    let start = scheduler.schedule(silence(0.5)).unwrap();
    assert!((start - 0.5).abs() < 1e-9);
}

#[test]
fn test_output_level_follows_playback() {
    let sink = ManualSink::default();
    let (mut scheduler, meter) = scheduler(&sink);

    scheduler.schedule(silence(0.5)).unwrap();
    scheduler.schedule(silence(0.5)).unwrap();
    assert!(scheduler.is_playing());
    assert!((meter.current().output - 0.8).abs() < f32::EPSILON);

    scheduler.complete(0);
    assert!((meter.current().output - 0.8).abs() < f32::EPSILON);

    scheduler.complete(1);
    assert!(!scheduler.is_playing());
    assert!(meter.current().output.abs() < f32::EPSILON);
}

#[test]
fn test_reset_discards_stale_tickets() {
    let sink = ManualSink::default();
    let (mut scheduler, _) = scheduler(&sink);

    let stale = scheduler.reserve();
    scheduler.reset();
    assert!(*sink.cleared.lock().unwrap());

    assert!(scheduler.commit(stale, Ok(silence(0.5))).is_empty());
    assert!(sink.units().is_empty());

    scheduler.schedule(silence(0.5)).unwrap();
    assert_eq!(sink.units().len(), 1);
}

#[test]
fn test_units_at_other_rates_are_resampled() {
    let sink = ManualSink::default();
    let (mut scheduler, _) = scheduler(&sink);

    scheduler
        .schedule(DecodedAudio {
            samples: vec![0.0; 2000],
            sample_rate: 2000,
        })
        .unwrap();

    let (_, _, duration) = sink.units()[0];
    assert!((duration - 1.0).abs() < 0.05);
}

#[test]
fn test_pcm16_decoding() {
    let bytes = [0x00, 0x40, 0x00, 0xc0];
    let audio = assert_ok!(decode_pcm16(&bytes, 24_000));
    assert_eq!(audio.samples, vec![0.5, -0.5]);

    let err = assert_err!(decode_pcm16(&[0x00], 24_000));
    assert!(matches!(err, Error::PlaybackDecode(_)));
}

#[test]
fn test_samples_to_wav_header() {
    let wav = assert_ok!(samples_to_wav(&[0.0, 0.5, -0.5], 16_000));
    assert_eq!(&wav[..4], b"RIFF");
    assert_eq!(&wav[8..12], b"WAVE");
}

#[test]
fn test_gate_session_flow() {
    let mut gate = GateState::new(WakeWordGate::new(
        "jarvis",
        vec!["jarvis sleep".to_string(), "dismissed".to_string()],
    ));
    let states = gate.subscribe();

    assert_eq!(gate.apply("open the pod bay doors").next_state, ActivationState::Standby);
    assert_eq!(gate.apply("Jarvis").next_state, ActivationState::Active);
    assert_eq!(*states.borrow(), ActivationState::Active);
    assert_eq!(gate.apply("what time is it").next_state, ActivationState::Active);
    assert_eq!(gate.apply("Jarvis, sleep").next_state, ActivationState::Active);
    assert_eq!(gate.apply("jarvis sleep now").next_state, ActivationState::Standby);
    assert_eq!(*states.borrow(), ActivationState::Standby);
}

#[tokio::test]
async fn test_capture_forwards_only_while_active() {
    let mic = ScriptedMic::default();
    let (activation_tx, activation) = tokio::sync::watch::channel(ActivationState::Standby);
    let (forward_tx, mut forward_rx) = mpsc::unbounded_channel();
    let (feed_tx, mut feed_rx) = mpsc::unbounded_channel();
    let meter = LevelMeter::new();

    let mut capture = CapturePipeline::spawn(
        Box::new(mic.clone()),
        CaptureOptions {
            frame_size: FRAME,
            input_gain: 5.0,
        },
        meter.clone(),
        activation,
        CaptureTaps {
            recognizer: Some(feed_tx),
            forward: Some(forward_tx),
        },
    )
    .unwrap();

    mic.speak();
    for _ in 0..5 {
        assert!(matches!(
            within(feed_rx.recv()).await,
            Some(RecognizerFeed::Samples(_))
        ));
    }
    assert!(forward_rx.try_recv().is_err());
    assert!(meter.current().input.abs() < f32::EPSILON);

    activation_tx.send_replace(ActivationState::Active);
    mic.speak();
    let frame = within(forward_rx.recv()).await.unwrap();
    assert_eq!(frame.samples.len(), FRAME);
    assert!(frame.level > 0.9);
    for _ in 0..4 {
        within(forward_rx.recv()).await.unwrap();
    }
    for _ in 0..5 {
        within(feed_rx.recv()).await.unwrap();
    }

    capture.recognition().suspend();
    mic.speak();
    for _ in 0..5 {
        within(forward_rx.recv()).await.unwrap();
    }
    assert!(matches!(feed_rx.try_recv(), Ok(RecognizerFeed::Reset)));
    assert!(feed_rx.try_recv().is_err());

    capture.stop();
    assert!(!mic.is_started());
}
