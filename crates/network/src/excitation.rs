//! Silence-gated transmission.
//!
//! When excitation mode is enabled, the client watches the capturer's
//! smoothed level: once it stays below the threshold for the configured
//! timeout, the audio send path is suspended (heartbeats keep flowing). The
//! next frame at or above the threshold resumes transmission implicitly;
//! there is no explicit resume message on the wire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

/// Decides, frame by frame, whether the send path is live.
pub struct ExcitationGate {
    threshold_db: f32,
    timeout: Duration,
    below_since: Option<Instant>,
    suspended: bool,
    suspended_since: Option<Instant>,
    /// Total suspended time in milliseconds, shared with the stats emitter.
    suspended_ms: Arc<AtomicU64>,
}

impl ExcitationGate {
    pub fn new(threshold_db: f32, timeout: Duration) -> Self {
        Self {
            threshold_db,
            timeout,
            below_since: None,
            suspended: false,
            suspended_since: None,
            suspended_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether the frame observed at this level may be sent.
    pub fn permit(&mut self, level_db: f32) -> bool {
        self.permit_at(level_db, Instant::now())
    }

    fn permit_at(&mut self, level_db: f32, now: Instant) -> bool {
        if level_db >= self.threshold_db {
            if self.suspended {
                info!(level_db, "signal back above threshold, resuming transmission");
                self.accumulate(now);
                self.suspended = false;
                self.suspended_since = None;
            }
            self.below_since = None;
            return true;
        }

        match self.below_since {
            None => self.below_since = Some(now),
            Some(since) if !self.suspended && now.duration_since(since) >= self.timeout => {
                info!(
                    threshold_db = self.threshold_db,
                    "sustained silence, suspending transmission"
                );
                self.suspended = true;
                self.suspended_since = Some(now);
            }
            _ => {}
        }

        if self.suspended {
            self.accumulate(now);
            return false;
        }
        true
    }

    fn accumulate(&mut self, now: Instant) {
        if let Some(since) = self.suspended_since {
            let delta = now.duration_since(since).as_millis() as u64;
            self.suspended_ms.fetch_add(delta, Ordering::Relaxed);
            self.suspended_since = Some(now);
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Handle on the running suspended-time counter (milliseconds), for the
    /// stats emitter.
    pub fn suspended_counter(&self) -> Arc<AtomicU64> {
        self.suspended_ms.clone()
    }

    /// Total time spent suspended so far.
    pub fn suspended_total(&self) -> Duration {
        Duration::from_millis(self.suspended_ms.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f32 = -45.0;

    fn gate() -> ExcitationGate {
        ExcitationGate::new(THRESHOLD, Duration::from_secs(2))
    }

    #[test]
    fn loud_frames_always_pass() {
        let mut gate = gate();
        let t0 = Instant::now();
        for i in 0..100 {
            assert!(gate.permit_at(-20.0, t0 + Duration::from_millis(i * 20)));
        }
        assert!(!gate.is_suspended());
    }

    #[test]
    fn silence_suspends_only_after_the_timeout() {
        let mut gate = gate();
        let t0 = Instant::now();

        // Below threshold but inside the grace window: still sending.
        assert!(gate.permit_at(-55.0, t0));
        assert!(gate.permit_at(-55.0, t0 + Duration::from_secs(1)));
        assert!(!gate.is_suspended());

        // Timeout elapsed: suspended.
        assert!(!gate.permit_at(-55.0, t0 + Duration::from_secs(2)));
        assert!(gate.is_suspended());
        assert!(!gate.permit_at(-55.0, t0 + Duration::from_secs(3)));
    }

    #[test]
    fn a_loud_frame_resumes_immediately() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.permit_at(-55.0, t0);
        assert!(!gate.permit_at(-55.0, t0 + Duration::from_secs(2)));

        // One frame above the threshold flips the gate back open.
        assert!(gate.permit_at(-30.0, t0 + Duration::from_secs(4)));
        assert!(!gate.is_suspended());
        assert!(gate.permit_at(-55.0, t0 + Duration::from_secs(4)));
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut gate = gate();
        let t0 = Instant::now();
        assert!(gate.permit_at(THRESHOLD, t0));
        assert!(gate.permit_at(THRESHOLD, t0 + Duration::from_secs(10)));
        assert!(!gate.is_suspended());
    }

    #[test]
    fn suspended_time_is_accounted() {
        let mut gate = gate();
        let t0 = Instant::now();
        gate.permit_at(-55.0, t0);
        gate.permit_at(-55.0, t0 + Duration::from_secs(2)); // suspends here
        gate.permit_at(-55.0, t0 + Duration::from_secs(5));
        gate.permit_at(-20.0, t0 + Duration::from_secs(6)); // resumes

        let total = gate.suspended_total();
        assert_eq!(total, Duration::from_secs(4));

        // Not suspended afterwards: the counter stays put.
        gate.permit_at(-20.0, t0 + Duration::from_secs(9));
        assert_eq!(gate.suspended_total(), total);
    }

    #[test]
    fn brief_dips_below_threshold_do_not_suspend() {
        let mut gate = gate();
        let t0 = Instant::now();
        let mut t = t0;
        for _ in 0..10 {
            assert!(gate.permit_at(-55.0, t));
            t += Duration::from_secs(1);
            assert!(gate.permit_at(-20.0, t)); // resets the grace window
            t += Duration::from_secs(1);
        }
        assert!(!gate.is_suspended());
        assert_eq!(gate.suspended_total(), Duration::ZERO);
    }
}
