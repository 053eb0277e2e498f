//! Per-session statistics counters.
//!
//! Statistics are session-owned, never process-global: each side of a session
//! holds an `Arc` to its own counters and passes clones into the tasks that
//! update them. Counters are plain atomics updated with fetch-add and read
//! with load; snapshots are taken for logging.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::level::LevelMeter;

/// Counters for one direction-pair of a session's network traffic.
#[derive(Debug, Default)]
pub struct NetworkStats {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    error_count: AtomicU64,
    packets_lost: AtomicU64,
    rtt_micros: AtomicU64,
}

/// A point-in-time copy of [`NetworkStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkStatsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub error_count: u64,
    pub packets_lost: u64,
    pub round_trip_time: Duration,
}

impl NetworkStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost(&self, packets: u64) {
        self.packets_lost.fetch_add(packets, Ordering::Relaxed);
    }

    pub fn set_round_trip_time(&self, rtt: Duration) {
        self.rtt_micros
            .store(rtt.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> NetworkStatsSnapshot {
        NetworkStatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
            round_trip_time: Duration::from_micros(self.rtt_micros.load(Ordering::Relaxed)),
        }
    }

    /// Zero all counters. Called when a server session closes so the next
    /// client starts from a clean slate.
    pub fn reset(&self) {
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        self.packets_lost.store(0, Ordering::Relaxed);
        self.rtt_micros.store(0, Ordering::Relaxed);
    }
}

/// Counters for one audio path (capture or playback).
#[derive(Debug, Default)]
pub struct AudioStats {
    frames_processed: AtomicU64,
    dropped_frames: AtomicU64,
    latency_nanos: AtomicU64,
    buffer_usage_bits: AtomicU32,
    level: LevelMeter,
}

/// A point-in-time copy of [`AudioStats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioStatsSnapshot {
    pub frames_processed: u64,
    pub dropped_frames: u64,
    pub latency: Duration,
    pub buffer_usage: f32,
    pub decibel_level: f32,
}

impl AudioStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_processed(&self, frames: u64) {
        self.frames_processed.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn add_dropped(&self, frames: u64) {
        self.dropped_frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_nanos
            .store(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn set_buffer_usage(&self, usage: f32) {
        let clamped = usage.clamp(0.0, 1.0);
        self.buffer_usage_bits
            .store(clamped.to_bits(), Ordering::Relaxed);
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    /// The level meter fed by the capture or playback loop.
    pub fn level(&self) -> &LevelMeter {
        &self.level
    }

    pub fn snapshot(&self) -> AudioStatsSnapshot {
        AudioStatsSnapshot {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            latency: Duration::from_nanos(self.latency_nanos.load(Ordering::Relaxed)),
            buffer_usage: f32::from_bits(self.buffer_usage_bits.load(Ordering::Relaxed)),
            decibel_level: self.level.current(),
        }
    }

    pub fn reset(&self) {
        self.frames_processed.store(0, Ordering::Relaxed);
        self.dropped_frames.store(0, Ordering::Relaxed);
        self.latency_nanos.store(0, Ordering::Relaxed);
        self.buffer_usage_bits.store(0f32.to_bits(), Ordering::Relaxed);
        self.level.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_counters_accumulate() {
        let stats = NetworkStats::new();
        stats.add_sent(3860);
        stats.add_sent(20);
        stats.add_received(20);
        stats.record_error();
        stats.record_lost(2);
        stats.set_round_trip_time(Duration::from_millis(4));

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_sent, 3880);
        assert_eq!(snap.bytes_received, 20);
        assert_eq!(snap.error_count, 1);
        assert_eq!(snap.packets_lost, 2);
        assert_eq!(snap.round_trip_time, Duration::from_millis(4));
    }

    #[test]
    fn network_reset_zeroes_everything() {
        let stats = NetworkStats::new();
        stats.add_sent(100);
        stats.record_error();
        stats.reset();
        let snap = stats.snapshot();
        assert_eq!(snap.bytes_sent, 0);
        assert_eq!(snap.error_count, 0);
        assert_eq!(snap.round_trip_time, Duration::ZERO);
    }

    #[test]
    fn audio_snapshot_defaults_to_silence() {
        let stats = AudioStats::new();
        let snap = stats.snapshot();
        assert_eq!(snap.frames_processed, 0);
        assert_eq!(snap.dropped_frames, 0);
        assert_eq!(snap.decibel_level, -60.0);
    }

    #[test]
    fn buffer_usage_is_clamped() {
        let stats = AudioStats::new();
        stats.set_buffer_usage(1.5);
        assert_eq!(stats.snapshot().buffer_usage, 1.0);
        stats.set_buffer_usage(-0.5);
        assert_eq!(stats.snapshot().buffer_usage, 0.0);
    }

    #[test]
    fn shared_counters_across_threads() {
        use std::sync::Arc;
        let stats = Arc::new(AudioStats::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let stats = stats.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    stats.add_processed(1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.frames_processed(), 4000);
    }
}
