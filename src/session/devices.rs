//! Media device acquisition

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use super::log::{EventLog, LogSource};
use crate::voice::{AudioInput, CpalInput, CpalOutput, PlaybackSink};
use crate::{Error, Result};

/// A camera that was present at connect time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Camera {
    pub path: PathBuf,
}

/// Opens the host's audio and video devices
pub trait DeviceProvider: Send + Sync {
    /// Open the default microphone at (or resampled to) `target_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no usable input device exists
    fn open_input(&self, target_rate: u32) -> Result<Box<dyn AudioInput>>;

    /// Open the default speaker; unit completions are reported on `completions`
    ///
    /// # Errors
    ///
    /// Returns error if no usable output device exists
    fn open_output(
        &self,
        preferred_rate: u32,
        completions: mpsc::UnboundedSender<u64>,
    ) -> Result<Box<dyn PlaybackSink>>;

    /// Check for a camera
    ///
    /// # Errors
    ///
    /// Returns error if no camera is present
    fn detect_camera(&self) -> Result<Camera>;
}

/// cpal-backed audio plus a camera device node
#[derive(Debug, Clone, Default)]
pub struct SystemDevices {
    camera: Option<PathBuf>,
}

impl SystemDevices {
    #[must_use]
    pub const fn new(camera: Option<PathBuf>) -> Self {
        Self { camera }
    }
}

impl DeviceProvider for SystemDevices {
    fn open_input(&self, target_rate: u32) -> Result<Box<dyn AudioInput>> {
        Ok(Box::new(CpalInput::new(target_rate)?))
    }

    fn open_output(
        &self,
        preferred_rate: u32,
        completions: mpsc::UnboundedSender<u64>,
    ) -> Result<Box<dyn PlaybackSink>> {
        Ok(Box::new(CpalOutput::open(preferred_rate, completions)?))
    }

    fn detect_camera(&self) -> Result<Camera> {
        let path = self
            .camera
            .as_deref()
            .ok_or_else(|| Error::DeviceAcquisition("no camera configured".to_string()))?;
        open_camera(path)
    }
}

fn open_camera(path: &Path) -> Result<Camera> {
    if path.exists() {
        Ok(Camera {
            path: path.to_path_buf(),
        })
    } else {
        Err(Error::DeviceAcquisition(format!(
            "camera not found at {}",
            path.display()
        )))
    }
}

/// Device streams handed to a session
pub struct MediaDevices {
    pub input: Box<dyn AudioInput>,
    pub camera: Option<Camera>,
}

impl std::fmt::Debug for MediaDevices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaDevices")
            .field("sample_rate", &self.input.sample_rate())
            .field("camera", &self.camera)
            .finish()
    }
}

impl MediaDevices {
    /// Acquire microphone and camera, degrading to audio-only
    ///
    /// # Errors
    ///
    /// Returns `DeviceAcquisition` if no microphone can be opened
    pub fn acquire(
        provider: &dyn DeviceProvider,
        capture_rate: u32,
        log: &EventLog,
    ) -> Result<Self> {
        let camera = provider.detect_camera();
        let input = provider.open_input(capture_rate);

        if let (Ok(input), Ok(camera)) = (&input, &camera) {
            log.success(
                LogSource::System,
                format!(
                    "Sensors online: audio at {} Hz, camera {}",
                    input.sample_rate(),
                    camera.path.display()
                ),
            );
        }

        match (input, camera) {
            (Ok(input), Ok(camera)) => Ok(Self {
                input,
                camera: Some(camera),
            }),
            (input, camera) => {
                if let Err(e) = &camera {
                    tracing::debug!(error = %e, "camera detection failed");
                }
                log.warning(
                    LogSource::System,
                    "Video sensors unavailable. Falling back to audio-only mode.",
                );

                let input = match input {
                    Ok(input) => Ok(input),
                    Err(e) => {
                        tracing::debug!(error = %e, "combined acquisition failed, retrying audio");
                        provider.open_input(capture_rate)
                    }
                };

                match input {
                    Ok(input) => Ok(Self {
                        input,
                        camera: None,
                    }),
                    Err(e) => {
                        log.error(
                            LogSource::System,
                            format!("Critical Sensor Failure: {e}"),
                        );
                        Err(Error::DeviceAcquisition(e.to_string()))
                    }
                }
            }
        }
    }

    /// Whether a camera was acquired
    #[must_use]
    pub const fn has_camera(&self) -> bool {
        self.camera.is_some()
    }
}
