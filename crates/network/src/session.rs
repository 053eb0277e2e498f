//! Pieces shared by both ends of a session: activity tracking, the stats
//! emitter, and bounded task joins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};
use utils::{AudioStats, NetworkStats, StopSignal};

/// How often each side emits a statistics event.
pub(crate) const STATS_INTERVAL: Duration = Duration::from_secs(1);

/// How often the server's connection monitor checks liveness.
pub(crate) const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// How long teardown waits for background tasks before abandoning them.
pub(crate) const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Records when the peer last produced traffic, readable from the monitor
/// task without locking.
pub(crate) struct ActivityTracker {
    epoch: Instant,
    last_activity_ms: AtomicU64,
}

impl ActivityTracker {
    pub(crate) fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
        }
    }

    pub(crate) fn touch(&self) {
        self.last_activity_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    /// Time since the last [`touch`](Self::touch).
    pub(crate) fn idle(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }
}

/// Spawn the periodic statistics emitter for one session side.
pub(crate) fn spawn_stats_task(
    side: &'static str,
    net: Arc<NetworkStats>,
    audio: Arc<AudioStats>,
    silent_ms: Option<Arc<AtomicU64>>,
    stop: StopSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(STATS_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the interval's immediate first fire.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = stop.wait() => return,
                _ = tick.tick() => {
                    let n = net.snapshot();
                    let a = audio.snapshot();
                    debug!(
                        side,
                        bytes_sent = n.bytes_sent,
                        bytes_received = n.bytes_received,
                        errors = n.error_count,
                        packets_lost = n.packets_lost,
                        rtt_us = n.round_trip_time.as_micros() as u64,
                        frames = a.frames_processed,
                        dropped = a.dropped_frames,
                        latency_us = a.latency.as_micros() as u64,
                        buffer_usage = a.buffer_usage,
                        level_db = a.decibel_level,
                        silent_ms = silent_ms.as_ref().map(|c| c.load(Ordering::Relaxed)),
                        "session statistics"
                    );
                }
            }
        }
    })
}

/// Join background tasks within one shared deadline; whatever is still
/// running afterwards is aborted. Teardown must never block on a stuck task.
pub(crate) async fn join_with_timeout(handles: Vec<JoinHandle<()>>, limit: Duration) {
    let deadline = Instant::now() + limit;
    for mut handle in handles {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if tokio::time::timeout(remaining, &mut handle).await.is_err() {
            warn!("background task did not stop within {limit:?}, aborting");
            handle.abort();
        }
    }
}
