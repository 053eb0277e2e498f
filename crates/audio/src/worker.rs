//! Dedicated thread ownership of a cpal stream.
//!
//! cpal streams are not `Send`, so each capture or playback stream is built
//! and kept alive on its own OS thread. The worker hands the build result
//! back synchronously and holds the stream until asked to stop; teardown
//! waits a bounded time for the thread so a stuck device driver cannot hang
//! session cleanup.

use std::sync::mpsc;
use std::time::Duration;

use cpal::traits::StreamTrait;
use tracing::warn;
use utils::{Error, Result};

pub(crate) struct StreamWorker {
    stop_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
}

impl StreamWorker {
    /// Spawn a thread, build and start the stream on it, and report the build
    /// outcome to the caller.
    pub(crate) fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(Error::wrap(
                        utils::ErrorKind::AudioDevice,
                        "failed to start audio stream",
                        e,
                    )));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park here; the stream keeps running via its callbacks until
                // it is dropped.
                let _ = stop_rx.recv();
                drop(stream);
                let _ = done_tx.send(());
            })
            .map_err(|e| Error::wrap(utils::ErrorKind::AudioDevice, "failed to spawn audio thread", e))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { stop_tx, done_rx }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::audio_device("audio thread exited before ready")),
        }
    }

    /// Ask the thread to drop its stream, waiting up to `timeout`.
    pub(crate) fn stop(self, timeout: Duration) {
        let _ = self.stop_tx.send(());
        if self.done_rx.recv_timeout(timeout).is_err() {
            warn!("audio stream thread did not stop within {timeout:?}, detaching");
        }
    }
}
