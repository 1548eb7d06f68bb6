//! Audio level estimation and the observable input/output level pair

use tokio::sync::watch;

/// Input and output levels, each in `[0, 1]`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioLevels {
    /// Microphone level
    pub input: f32,
    /// Speaker level
    pub output: f32,
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Scale an RMS value into a display level
#[must_use]
pub fn input_level(rms: f32, gain: f32) -> f32 {
    (rms * gain).clamp(0.0, 1.0)
}

/// Observable level pair shared by capture and playback
///
/// Cloning yields another handle on the same pair.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    tx: watch::Sender<AudioLevels>,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelMeter {
    /// Create a meter reading zero on both sides
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AudioLevels::default());
        Self { tx }
    }

    /// Report the microphone level
    pub fn set_input(&self, level: f32) {
        let level = level.clamp(0.0, 1.0);
        self.tx.send_modify(|l| l.input = level);
    }

    /// Report the speaker level
    pub fn set_output(&self, level: f32) {
        let level = level.clamp(0.0, 1.0);
        self.tx.send_if_modified(|l| {
            if (l.output - level).abs() < f32::EPSILON {
                return false;
            }
            l.output = level;
            true
        });
    }

    /// Zero both levels
    pub fn reset(&self) {
        self.tx.send_replace(AudioLevels::default());
    }

    /// Current levels
    #[must_use]
    pub fn current(&self) -> AudioLevels {
        *self.tx.borrow()
    }

    /// Subscribe to level changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AudioLevels> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_calculation() {
        let silence = vec![0.0f32; 100];
        assert!(rms(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(rms(&loud) > 0.4);

        assert!(rms(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn input_level_is_clamped() {
        assert!((input_level(0.5, 5.0) - 1.0).abs() < f32::EPSILON);
        assert!((input_level(0.1, 5.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn meter_tracks_both_sides() {
        let meter = LevelMeter::new();
        let rx = meter.subscribe();

        meter.set_input(0.3);
        meter.set_output(2.0);

        let levels = *rx.borrow();
        assert!((levels.input - 0.3).abs() < f32::EPSILON);
        assert!((levels.output - 1.0).abs() < f32::EPSILON);

        meter.reset();
        assert_eq!(meter.current(), AudioLevels::default());
    }
}
