//! Server orchestration: listener, single-session gate, per-session driving.
//!
//! The accept loop polls with a one-second deadline so it can observe the
//! shutdown signal. Each accepted connection passes the IP allow-list and the
//! single-session gate before a session task is spawned; everyone else is
//! closed on the spot. The session itself is the state machine described in
//! the module docs: handshake → streaming → draining → closed, with a
//! connection monitor enforcing keepalive and a stats emitter alongside.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use audio::{FrameDecoder, Playback};
use protocol::{Packet, PacketType, StreamParams};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use utils::{Config, Error, NetworkStats, Result, ShutdownCoordinator, StopSignal, Timeouts};

use crate::session::{
    join_with_timeout, spawn_stats_task, ActivityTracker, MONITOR_INTERVAL, TASK_JOIN_TIMEOUT,
};

/// Builds the playback sink for a session once the geometry is negotiated.
///
/// In production this opens a cpal `Player`; tests substitute a recording
/// sink. Device handles never appear in session types.
pub type PlaybackFactory =
    Arc<dyn Fn(&StreamParams) -> Result<Box<dyn Playback>> + Send + Sync>;

/// How long each accept poll waits before re-checking the shutdown signal.
const ACCEPT_POLL: Duration = Duration::from_secs(1);

/// The audio streaming server: one listener, at most one live session.
pub struct Server {
    config: Config,
    listener: TcpListener,
    coordinator: Arc<ShutdownCoordinator>,
    playback_factory: PlaybackFactory,
    running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    policy_rejections: AtomicU64,
}

impl Server {
    /// Bind the listener on 0.0.0.0 at the configured port.
    pub async fn bind(
        config: Config,
        coordinator: Arc<ShutdownCoordinator>,
        playback_factory: PlaybackFactory,
    ) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .map_err(|e| {
                Error::wrap(
                    utils::ErrorKind::Network,
                    format!("failed to bind 0.0.0.0:{}", config.port),
                    e,
                )
            })?;

        let running = Arc::new(AtomicBool::new(true));
        {
            let running = running.clone();
            coordinator.register_callback(move || {
                running.store(false, Ordering::Release);
            });
        }

        Ok(Self {
            config,
            listener,
            coordinator,
            playback_factory,
            running,
            connected: Arc::new(AtomicBool::new(false)),
            policy_rejections: AtomicU64::new(0),
        })
    }

    /// The bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::wrap(utils::ErrorKind::Network, "failed to read local address", e))
    }

    /// Whether a client session is currently live.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connections closed by the allow list before any handshake.
    pub fn policy_rejections(&self) -> u64 {
        self.policy_rejections.load(Ordering::Relaxed)
    }

    /// Stop accepting; `run` returns at its next poll.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Accept connections until stopped or shut down.
    pub async fn run(&self) -> Result<()> {
        info!(addr = %self.local_addr()?, "server listening");

        while self.running.load(Ordering::Acquire) && !self.coordinator.is_shutdown_requested() {
            let (stream, peer) = match timeout(ACCEPT_POLL, self.listener.accept()).await {
                Err(_) => continue, // poll the shutdown signal
                Ok(Err(e)) => {
                    error!("failed to accept connection: {e}");
                    continue;
                }
                Ok(Ok(accepted)) => accepted,
            };

            info!(remote = %peer, "client connected");

            if !ip_allowed(&self.config.allow_clients, &peer) {
                self.policy_rejections.fetch_add(1, Ordering::Relaxed);
                warn!(remote = %peer, "client not on the allow list, closing connection");
                continue; // dropping the stream closes it before any handshake
            }

            if self
                .connected
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                warn!(remote = %peer, "another client is already connected, closing new connection");
                continue;
            }

            self.coordinator.connection_opened();
            let session = ServerSession {
                config: self.config.clone(),
                coordinator: self.coordinator.clone(),
                playback_factory: self.playback_factory.clone(),
                connected: self.connected.clone(),
            };
            tokio::spawn(async move {
                session.run(stream, peer).await;
            });
        }

        info!("server stopped");
        Ok(())
    }
}

/// Non-empty allow list ⇒ the remote IP must string-match an entry.
fn ip_allowed(allow_clients: &[String], peer: &SocketAddr) -> bool {
    if allow_clients.is_empty() {
        return true;
    }
    let ip = peer.ip().to_string();
    allow_clients.iter().any(|allowed| *allowed == ip)
}

/// Everything one accepted connection needs to run to completion.
struct ServerSession {
    config: Config,
    coordinator: Arc<ShutdownCoordinator>,
    playback_factory: PlaybackFactory,
    connected: Arc<AtomicBool>,
}

impl ServerSession {
    async fn run(self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = self.drive(stream, peer).await {
            error!(remote = %peer, "session ended: {e}");
        }
        self.connected.store(false, Ordering::Release);
        self.coordinator.connection_closed();
        info!("ready for new client connections");
    }

    async fn drive(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("failed to disable Nagle on session socket: {e}");
        }

        // Handshake: invalid proposals close the connection without a reply.
        let params = self.handshake(&mut stream).await?;
        info!(
            remote = %peer,
            sample_rate = params.sample_rate,
            channels = params.channels,
            bit_depth = params.bit_depth,
            frames_per_packet = params.frames_per_packet,
            compression = params.compression,
            "handshake completed"
        );

        let mut playback = (self.playback_factory)(&params)?;
        let mut decoder = FrameDecoder::new(&params)?;
        let stats = Arc::new(NetworkStats::new());
        let stop = StopSignal::new();
        let activity = Arc::new(ActivityTracker::new());
        activity.touch();

        let monitor = spawn_monitor_task(
            stop.clone(),
            self.coordinator.clone(),
            activity.clone(),
            self.config.timeouts,
        );
        let stats_task = spawn_stats_task("server", stats.clone(), playback.stats(), None, stop.clone());

        let result = self
            .packet_loop(&mut stream, playback.as_mut(), &mut decoder, &stats, &activity, &stop)
            .await;

        // Draining: stop the player, reap background tasks, clear state.
        stop.close();
        playback.stop();
        join_with_timeout(vec![monitor, stats_task], TASK_JOIN_TIMEOUT).await;
        stats.reset();

        result
    }

    async fn handshake(&self, stream: &mut TcpStream) -> Result<StreamParams> {
        let timeouts = self.config.timeouts;
        let packet = timeout(timeouts.read, Packet::read_from(stream))
            .await
            .map_err(|_| Error::timeout("timed out waiting for handshake"))??;

        if packet.header.packet_type != PacketType::Handshake {
            return Err(Error::protocol(format!(
                "expected Handshake packet, got {}",
                packet.header.packet_type
            )));
        }

        let params = StreamParams::from_bytes(&packet.payload)?;
        params.validate()?;

        // Accept the client's proposal verbatim and echo it back.
        let reply = Packet::handshake(&params);
        timeout(timeouts.write, reply.write_to(stream))
            .await
            .map_err(|_| Error::timeout("timed out sending handshake reply"))??;

        Ok(params)
    }

    async fn packet_loop(
        &self,
        stream: &mut TcpStream,
        playback: &mut dyn Playback,
        decoder: &mut FrameDecoder,
        stats: &NetworkStats,
        activity: &ActivityTracker,
        stop: &StopSignal,
    ) -> Result<()> {
        let timeouts = self.config.timeouts;
        let mut last_sequence: Option<u32> = None;

        loop {
            let packet = tokio::select! {
                _ = stop.wait() => return Ok(()),
                result = timeout(timeouts.read, Packet::read_from(stream)) => match result {
                    Err(_) => {
                        return Err(Error::timeout("read deadline exceeded waiting for packet"));
                    }
                    Ok(Err(e)) => {
                        stats.record_error();
                        info!("client appears to have disconnected");
                        return Err(e);
                    }
                    Ok(Ok(packet)) => packet,
                },
            };

            stats.add_received(packet.wire_len() as u64);
            activity.touch();

            match packet.header.packet_type {
                PacketType::Audio => {
                    let sequence = packet.header.sequence;
                    if let Some(last) = last_sequence {
                        let gap = sequence.wrapping_sub(last).wrapping_sub(1);
                        // A backwards or duplicate sequence wraps to a huge
                        // gap; TCP cannot reorder, so only count sane gaps.
                        if gap > 0 && gap < u32::MAX / 2 {
                            stats.record_lost(gap as u64);
                            debug!(gap, sequence, "sequence gap in audio stream");
                        }
                    }
                    last_sequence = Some(sequence);

                    match decoder.decode(&packet.payload) {
                        Ok(frame) => {
                            if let Err(e) = playback.queue_frame(&frame) {
                                debug!("failed to queue audio: {e}");
                                stats.record_error();
                            }
                        }
                        Err(e) => {
                            warn!("dropping undecodable audio packet: {e}");
                            stats.record_error();
                        }
                    }
                }
                PacketType::Heartbeat => {
                    let reply = Packet::heartbeat();
                    match timeout(timeouts.write, reply.write_to(stream)).await {
                        Err(_) => {
                            warn!("heartbeat reply timed out");
                            stats.record_error();
                        }
                        Ok(Err(e)) => {
                            warn!("failed to send heartbeat reply: {e}");
                            stats.record_error();
                        }
                        Ok(Ok(())) => stats.add_sent(reply.wire_len() as u64),
                    }
                }
                PacketType::Error => {
                    warn!(
                        "client error: {}",
                        String::from_utf8_lossy(&packet.payload)
                    );
                }
                other => {
                    warn!("ignoring unexpected {other} packet");
                }
            }
        }
    }
}

/// Watches the session for inactivity and for process shutdown.
fn spawn_monitor_task(
    stop: StopSignal,
    coordinator: Arc<ShutdownCoordinator>,
    activity: Arc<ActivityTracker>,
    timeouts: Timeouts,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(MONITOR_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick.tick().await;
        loop {
            tokio::select! {
                _ = stop.wait() => return,
                _ = coordinator.wait() => {
                    info!("shutdown requested, closing client session");
                    stop.close();
                    return;
                }
                _ = tick.tick() => {
                    let idle = activity.idle();
                    if idle > timeouts.keepalive {
                        warn!(idle_secs = idle.as_secs(), "keepalive timeout exceeded, closing session");
                        stop.close();
                        return;
                    }
                    if idle > timeouts.heartbeat {
                        warn!(idle_secs = idle.as_secs(), "no heartbeat from client");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str) -> SocketAddr {
        format!("{ip}:9000").parse().unwrap()
    }

    #[test]
    fn empty_allow_list_admits_everyone() {
        assert!(ip_allowed(&[], &addr("10.0.0.7")));
    }

    #[test]
    fn allow_list_matches_on_ip_string() {
        let allow = vec!["192.168.1.50".to_string(), "10.0.0.1".to_string()];
        assert!(ip_allowed(&allow, &addr("10.0.0.1")));
        assert!(ip_allowed(&allow, &addr("192.168.1.50")));
        assert!(!ip_allowed(&allow, &addr("192.168.1.51")));
        assert!(!ip_allowed(&allow, &addr("127.0.0.1")));
    }
}
