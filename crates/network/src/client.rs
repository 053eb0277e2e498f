//! Client orchestration: dial, handshake, capture, stream.
//!
//! After the handshake settles the geometry, the client builds its capturer
//! through a factory and spawns three tasks: the writer (audio frames from a
//! bounded channel plus heartbeat ticks, the single writer for this
//! direction), the reader (heartbeat echoes and server errors), and the stats
//! emitter. Any critical failure closes the session's stop signal and
//! notifies the shutdown coordinator.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use audio::{Capture, FrameEncoder};
use protocol::{Packet, PacketType, StreamParams};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use utils::{
    Config, Error, ErrorKind, NetworkStats, Result, ShutdownCoordinator, StopSignal, Timeouts,
};

use crate::excitation::ExcitationGate;
use crate::session::{join_with_timeout, spawn_stats_task, TASK_JOIN_TIMEOUT};

/// Builds the capturer once the handshake has settled the geometry.
///
/// In production this opens a cpal `Capturer`; tests substitute a synthetic
/// frame source.
pub type CaptureFactory =
    Arc<dyn Fn(&StreamParams) -> Result<Box<dyn Capture>> + Send + Sync>;

/// The audio streaming client: dials one server and streams until stopped.
pub struct Client {
    config: Config,
    coordinator: Arc<ShutdownCoordinator>,
    stats: Arc<NetworkStats>,
}

impl Client {
    pub fn new(config: Config, coordinator: Arc<ShutdownCoordinator>) -> Self {
        Self {
            config,
            coordinator,
            stats: Arc::new(NetworkStats::new()),
        }
    }

    /// This client's network statistics.
    pub fn stats(&self) -> Arc<NetworkStats> {
        self.stats.clone()
    }

    /// Run one session to completion. Returns an error on a critical failure
    /// and Ok when stopped by the shutdown signal.
    pub async fn run(&self, capture_factory: CaptureFactory) -> Result<()> {
        self.config.validate()?;
        let timeouts = self.config.timeouts;
        let addr = self.config.address();

        // Dialing.
        info!(%addr, "connecting to server");
        let mut stream = timeout(timeouts.connect, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::timeout(format!("timed out connecting to {addr}")))?
            .map_err(|e| {
                Error::wrap(
                    ErrorKind::Connection,
                    format!("failed to connect to {addr}"),
                    e,
                )
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("failed to disable Nagle on client socket: {e}");
        }
        info!("tcp connection established");
        self.coordinator.connection_opened();
        let _connection_guard = ConnectionGuard(self.coordinator.clone());

        // Handshake; both sides adopt whatever the server echoes.
        let params = self.handshake(&mut stream).await?;
        info!(
            sample_rate = params.sample_rate,
            channels = params.channels,
            bit_depth = params.bit_depth,
            frames_per_packet = params.frames_per_packet,
            compression = params.compression,
            "handshake completed"
        );

        let encoder = FrameEncoder::new(&params)?;
        let mut capture = capture_factory(&params)?;
        let audio_stats = capture.stats();

        // The capture callback runs on the device thread; it hands frames to
        // the writer task through a bounded channel and drops on overflow.
        let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(params.buffer_count as usize * 2);
        {
            let frames = params.frames_per_packet as u64;
            let drop_stats = capture.stats();
            capture.start(Box::new(move |bytes| {
                if frame_tx.try_send(bytes.to_vec()).is_err() {
                    drop_stats.add_dropped(frames);
                }
            }))?;
        }

        let stop = StopSignal::new();
        let failure = FailureHandle {
            slot: Arc::new(Mutex::new(None)),
            coordinator: self.coordinator.clone(),
            stats: self.stats.clone(),
        };
        let last_heartbeat: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

        let gate = self
            .config
            .excitation
            .enabled
            .then(|| ExcitationGate::new(self.config.excitation.threshold_db, self.config.excitation.timeout));
        let silent_ms = gate.as_ref().map(|g| g.suspended_counter());

        let (read_half, write_half) = stream.into_split();
        let writer = spawn_writer_task(WriterTask {
            write_half,
            frame_rx,
            encoder,
            gate,
            audio_stats: audio_stats.clone(),
            stats: self.stats.clone(),
            timeouts,
            stop: stop.clone(),
            last_heartbeat: last_heartbeat.clone(),
            failure: failure.clone(),
        });
        let reader = spawn_reader_task(
            read_half,
            self.stats.clone(),
            timeouts,
            stop.clone(),
            last_heartbeat,
            failure.clone(),
        );
        let stats_task = spawn_stats_task(
            "client",
            self.stats.clone(),
            audio_stats,
            silent_ms,
            stop.clone(),
        );

        info!("client streaming");

        // Streaming until a task fails or the process shuts down.
        tokio::select! {
            _ = stop.wait() => {}
            _ = self.coordinator.wait() => {
                info!("shutdown signal received");
                stop.close();
            }
        }

        // Draining.
        capture.stop();
        join_with_timeout(vec![writer, reader, stats_task], TASK_JOIN_TIMEOUT).await;

        match failure.take() {
            Some(err) => Err(err),
            None => {
                info!("client stopped");
                Ok(())
            }
        }
    }

    async fn handshake(&self, stream: &mut TcpStream) -> Result<StreamParams> {
        let timeouts = self.config.timeouts;
        let proposal = StreamParams::from_config(&self.config);
        let packet = Packet::handshake(&proposal);
        timeout(timeouts.write, packet.write_to(stream))
            .await
            .map_err(|_| Error::timeout("timed out sending handshake"))??;
        debug!("handshake packet sent");

        let reply = timeout(timeouts.read, Packet::read_from(stream))
            .await
            .map_err(|_| Error::timeout("timed out waiting for handshake reply"))?
            .map_err(|e| {
                // A closed connection here usually means the server rejected
                // the proposal (or the whitelist rejected us).
                Error::wrap(ErrorKind::Protocol, "handshake failed", e)
            })?;

        if reply.header.packet_type != PacketType::Handshake {
            return Err(Error::protocol(format!(
                "unexpected packet type in handshake reply: {}",
                reply.header.packet_type
            )));
        }
        let params = StreamParams::from_bytes(&reply.payload)?;
        params.validate()?;
        Ok(params)
    }
}

/// Balances `connection_opened` on every exit path.
struct ConnectionGuard(Arc<ShutdownCoordinator>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.connection_closed();
    }
}

/// First-failure slot shared by the client tasks.
#[derive(Clone)]
struct FailureHandle {
    slot: Arc<Mutex<Option<Error>>>,
    coordinator: Arc<ShutdownCoordinator>,
    stats: Arc<NetworkStats>,
}

impl FailureHandle {
    fn record(&self, err: Error, stop: &StopSignal) {
        error!("client error: {err}");
        self.stats.record_error();
        let critical = err.kind().is_critical();
        {
            let mut slot = self.slot.lock().unwrap();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        stop.close();
        if critical {
            self.coordinator.notify_shutdown();
        }
    }

    fn take(&self) -> Option<Error> {
        self.slot.lock().unwrap().take()
    }
}

struct WriterTask {
    write_half: OwnedWriteHalf,
    frame_rx: mpsc::Receiver<Vec<u8>>,
    encoder: FrameEncoder,
    gate: Option<ExcitationGate>,
    audio_stats: Arc<utils::AudioStats>,
    stats: Arc<NetworkStats>,
    timeouts: Timeouts,
    stop: StopSignal,
    last_heartbeat: Arc<Mutex<Option<Instant>>>,
    failure: FailureHandle,
}

/// The single writer for the client→server direction: audio frames and
/// heartbeats interleave here, so the peer observes them in emit order.
fn spawn_writer_task(mut task: WriterTask) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sequence: u32 = 0;
        let mut heartbeat = interval(task.timeouts.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = task.stop.wait() => return,

                maybe_frame = task.frame_rx.recv() => {
                    let Some(frame) = maybe_frame else { return };

                    if let Some(gate) = task.gate.as_mut() {
                        if !gate.permit(task.audio_stats.level().current()) {
                            continue;
                        }
                    }

                    let payload = match task.encoder.encode(&frame) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!("failed to encode frame: {e}");
                            task.stats.record_error();
                            continue;
                        }
                    };

                    sequence = sequence.wrapping_add(1);
                    let packet = Packet::audio(payload, sequence);
                    match timeout(task.timeouts.write, packet.write_to(&mut task.write_half)).await {
                        Err(_) => {
                            task.failure.record(
                                Error::new(ErrorKind::Network, "audio write timed out"),
                                &task.stop,
                            );
                            return;
                        }
                        Ok(Err(e)) => {
                            task.failure.record(e, &task.stop);
                            return;
                        }
                        Ok(Ok(())) => task.stats.add_sent(packet.wire_len() as u64),
                    }
                }

                _ = heartbeat.tick() => {
                    let packet = Packet::heartbeat();
                    *task.last_heartbeat.lock().unwrap() = Some(Instant::now());
                    match timeout(task.timeouts.write, packet.write_to(&mut task.write_half)).await {
                        Err(_) => {
                            task.failure.record(
                                Error::new(ErrorKind::Network, "heartbeat write timed out"),
                                &task.stop,
                            );
                            return;
                        }
                        Ok(Err(e)) => {
                            task.failure.record(e, &task.stop);
                            return;
                        }
                        Ok(Ok(())) => task.stats.add_sent(packet.wire_len() as u64),
                    }
                }
            }
        }
    })
}

/// Drains the server→client direction: heartbeat echoes close the RTT
/// measurement, Error packets are logged, everything else is skipped.
fn spawn_reader_task(
    mut read_half: OwnedReadHalf,
    stats: Arc<NetworkStats>,
    timeouts: Timeouts,
    stop: StopSignal,
    last_heartbeat: Arc<Mutex<Option<Instant>>>,
    failure: FailureHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let packet = tokio::select! {
                _ = stop.wait() => return,
                result = timeout(timeouts.read, Packet::read_from(&mut read_half)) => match result {
                    Err(_) => {
                        // The server echoes heartbeats every interval, so a
                        // silent read window means the peer is gone.
                        failure.record(
                            Error::new(ErrorKind::Network, "no packets from server within read deadline"),
                            &stop,
                        );
                        return;
                    }
                    Ok(Err(e)) => {
                        if stop.is_closed() {
                            return;
                        }
                        failure.record(e, &stop);
                        return;
                    }
                    Ok(Ok(packet)) => packet,
                },
            };

            stats.add_received(packet.wire_len() as u64);

            match packet.header.packet_type {
                PacketType::Heartbeat => {
                    if let Some(sent) = last_heartbeat.lock().unwrap().take() {
                        stats.set_round_trip_time(sent.elapsed());
                    }
                }
                PacketType::Error => {
                    warn!(
                        "server error: {}",
                        String::from_utf8_lossy(&packet.payload)
                    );
                }
                other => {
                    debug!("ignoring {other} packet from server");
                }
            }
        }
    })
}
