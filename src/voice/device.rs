//! Audio device threads
//!
//! cpal streams are not `Send`, so each stream lives on its own thread for
//! as long as it runs. The owning handle is `Send` and can sit inside async
//! session state.

use std::sync::mpsc;
use std::thread::JoinHandle;

use crate::{Error, Result};

/// Handle to a thread that owns one running cpal stream
#[derive(Debug)]
pub struct StreamThread {
    name: &'static str,
    shutdown: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Build and play a stream on a dedicated thread
    ///
    /// Blocks until the stream is playing or has failed to start.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `build`, or an audio error if the
    /// thread could not be spawned
    pub fn spawn<F>(name: &'static str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        use cpal::traits::StreamTrait;

        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(format!("voicelink-{name}"))
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(Error::Audio(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until the handle asks us to stop or is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!(stream = name, "audio stream released");
            })
            .map_err(|e| Error::Audio(format!("failed to spawn {name} thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                name,
                shutdown: Some(shutdown_tx),
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::Audio(format!("{name} thread exited during startup")))
            }
        }
    }

    /// Stop the stream and wait for its thread
    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(stream = self.name, "audio thread panicked");
            }
        }
    }

    /// Whether the stream is still running
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}
