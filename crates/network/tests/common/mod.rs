//! Shared fixtures for the integration tests: an in-memory playback sink, a
//! scripted capture source, and server/client setup helpers. None of this
//! touches audio hardware, so the suite runs on headless CI.

// Each test binary compiles its own copy; not every helper is used in all of
// them.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use audio::{Capture, FrameSink, Playback};
use network::{CaptureFactory, PlaybackFactory, Server};
use protocol::StreamParams;
use utils::{AudioStats, Config, Mode, Result, ShutdownCoordinator};

/// A small PCM geometry that keeps test payloads tiny.
pub fn pcm_params() -> StreamParams {
    StreamParams {
        sample_rate: 8_000,
        channels: 1,
        bit_depth: 16,
        frames_per_packet: 160,
        buffer_count: 4,
        compression: false,
    }
}

/// A server config matching [`pcm_params`], bound to an ephemeral port.
pub fn server_config() -> Config {
    let mut config = Config::new(Mode::Server);
    config.port = 0;
    config.compression = false;
    config.sample_rate = 8_000;
    config.channels = 1;
    config.bit_depth = 16;
    config.frames_per_packet = 160;
    config
}

/// A client config matching [`pcm_params`], pointed at `addr`.
pub fn client_config(addr: SocketAddr) -> Config {
    let mut config = Config::new(Mode::Client);
    config.host = addr.ip().to_string();
    config.port = addr.port();
    config.compression = false;
    config.sample_rate = 8_000;
    config.channels = 1;
    config.bit_depth = 16;
    config.frames_per_packet = 160;
    config
}

/// Playback sink that records queued frames instead of playing them.
pub struct MockPlayback {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    stats: Arc<AudioStats>,
}

impl Playback for MockPlayback {
    fn queue_frame(&self, frame: &[u8]) -> Result<()> {
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    fn stats(&self) -> Arc<AudioStats> {
        self.stats.clone()
    }

    fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }

    fn stop(&mut self) {}
}

/// A playback factory plus the handle its sinks record into.
pub fn mock_playback() -> (PlaybackFactory, Arc<Mutex<Vec<Vec<u8>>>>) {
    let frames: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_frames = frames.clone();
    let factory: PlaybackFactory = Arc::new(move |_params: &StreamParams| {
        Ok(Box::new(MockPlayback {
            frames: sink_frames.clone(),
            stats: Arc::new(AudioStats::new()),
        }) as Box<dyn Playback>)
    });
    (factory, frames)
}

/// Bind a server and drive its accept loop in the background.
pub async fn start_server(
    config: Config,
    coordinator: Arc<ShutdownCoordinator>,
    factory: PlaybackFactory,
) -> (Arc<Server>, SocketAddr) {
    let server = Arc::new(
        Server::bind(config, coordinator, factory)
            .await
            .expect("bind server"),
    );
    let addr = server.local_addr().expect("local addr");
    let runner = server.clone();
    tokio::spawn(async move {
        let _ = runner.run().await;
    });
    (server, addr)
}

/// Capture source that emits a fixed frame at a fixed cadence from its own
/// thread, reporting a fixed level.
pub struct ScriptedCapture {
    frame: Vec<u8>,
    period: Duration,
    level_db: f32,
    stats: Arc<AudioStats>,
    running: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl ScriptedCapture {
    pub fn new(frame: Vec<u8>, period: Duration, level_db: f32) -> Self {
        Self {
            frame,
            period,
            level_db,
            stats: Arc::new(AudioStats::new()),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl Capture for ScriptedCapture {
    fn start(&mut self, mut sink: FrameSink) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let stats = self.stats.clone();
        let frame = self.frame.clone();
        let period = self.period;
        let level_db = self.level_db;
        self.worker = Some(std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                stats.level().update(level_db);
                sink(&frame);
                stats.add_processed(1);
                std::thread::sleep(period);
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn stats(&self) -> Arc<AudioStats> {
        self.stats.clone()
    }
}

/// A capture factory producing [`ScriptedCapture`] sources sized to the
/// negotiated geometry.
pub fn scripted_capture(period: Duration, level_db: f32, fill: u8) -> CaptureFactory {
    Arc::new(move |params: &StreamParams| {
        let frame = vec![fill; params.payload_len()];
        Ok(Box::new(ScriptedCapture::new(frame, period, level_db)) as Box<dyn Capture>)
    })
}

/// Poll until `predicate` holds or the deadline passes.
pub async fn wait_for(mut predicate: impl FnMut() -> bool, deadline: Duration) -> bool {
    let started = std::time::Instant::now();
    while started.elapsed() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    predicate()
}
