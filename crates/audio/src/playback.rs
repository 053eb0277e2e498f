//! Audio playback: ring buffer → output device.
//!
//! The player owns the frame ring the network side feeds and drains it from
//! the device's output callback. A missing frame never stalls the device:
//! silence is substituted, the drop is counted, and the level meter is pulled
//! toward the floor. An optional fade-in ramps the first samples of a fresh
//! session to mask click artifacts.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::DeviceTrait;
use cpal::{BufferSize, Device, SampleFormat, StreamConfig};
use protocol::StreamParams;
use tracing::{debug, error, info, warn};
use utils::{AudioStats, Error, ErrorKind, Result};

use crate::ring::FrameRing;
use crate::sample::unpack_samples;
use crate::worker::StreamWorker;

/// The playback side of the pipeline, as seen by the session layer.
pub trait Playback: Send {
    /// Queue one frame of packed PCM for playback. Returns a Buffer error
    /// when the ring is saturated; the frame is dropped and counted but
    /// playback continues.
    fn queue_frame(&self, frame: &[u8]) -> Result<()>;

    /// This player's statistics (shared, updated from the device thread).
    fn stats(&self) -> Arc<AudioStats>;

    /// Discard everything queued.
    fn clear(&self);

    /// Stop the stream and clear the ring. Idempotent.
    fn stop(&mut self);
}

const STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Plays to a cpal output device.
pub struct Player {
    device: Device,
    params: StreamParams,
    ring: Arc<FrameRing>,
    stats: Arc<AudioStats>,
    fade_in: Duration,
    worker: Option<StreamWorker>,
}

impl Player {
    /// Validate the geometry against what the playback path supports; as on
    /// the capture side, 24-bit is rejected at initialization.
    pub fn new(device: Device, params: StreamParams, fade_in: Duration) -> Result<Self> {
        if !matches!(params.bit_depth, 16 | 32) {
            return Err(Error::audio_playback(format!(
                "unsupported bit depth: {}",
                params.bit_depth
            )));
        }
        // Twice the negotiated slot count, as a safety margin against bursts.
        let ring = Arc::new(FrameRing::new(params.buffer_count as usize * 2));
        Ok(Self {
            device,
            params,
            ring,
            stats: Arc::new(AudioStats::new()),
            fade_in,
            worker: None,
        })
    }

    /// Open the device stream and begin draining the ring.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::audio_playback("player already running"));
        }

        let device = self.device.clone();
        let params = self.params;
        let ring = self.ring.clone();
        let stats = self.stats.clone();
        let fade_in = self.fade_in;
        let worker = StreamWorker::spawn("lancast-playback", move || {
            build_output_stream(&device, params, ring, stats, fade_in)
        })?;
        self.worker = Some(worker);

        info!(
            sample_rate = self.params.sample_rate,
            channels = self.params.channels,
            bit_depth = self.params.bit_depth,
            buffers = self.ring.capacity(),
            "audio playback started"
        );
        Ok(())
    }
}

impl Playback for Player {
    fn queue_frame(&self, frame: &[u8]) -> Result<()> {
        if frame.len() != self.params.payload_len() {
            return Err(Error::audio_playback(format!(
                "unexpected frame size: expected {} bytes, got {}",
                self.params.payload_len(),
                frame.len()
            )));
        }
        if !self.ring.write(frame.to_vec()) {
            self.stats
                .add_dropped(self.params.frames_per_packet as u64);
            return Err(Error::buffer("audio buffer is full"));
        }
        Ok(())
    }

    fn stats(&self) -> Arc<AudioStats> {
        self.stats.clone()
    }

    fn clear(&self) {
        self.ring.clear();
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop(STOP_TIMEOUT);
            info!("audio playback stopped");
        }
        self.ring.clear();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Linear amplitude ramp applied to the first samples of a session.
struct FadeIn {
    position: usize,
    total: usize,
}

impl FadeIn {
    fn new(duration: Duration, params: &StreamParams) -> Self {
        let total =
            (duration.as_secs_f64() * params.sample_rate as f64) as usize * params.channels as usize;
        Self { position: 0, total }
    }

    fn next_gain(&mut self) -> f32 {
        if self.position >= self.total {
            return 1.0;
        }
        let gain = self.position as f32 / self.total as f32;
        self.position += 1;
        gain
    }
}

/// Pulls frames out of the ring and serves the device callback.
struct PlaybackFeeder {
    params: StreamParams,
    ring: Arc<FrameRing>,
    stats: Arc<AudioStats>,
    pending: VecDeque<f32>,
    scratch: Vec<f32>,
    fade: FadeIn,
}

impl PlaybackFeeder {
    fn new(
        params: StreamParams,
        ring: Arc<FrameRing>,
        stats: Arc<AudioStats>,
        fade_in: Duration,
    ) -> Self {
        let fade = FadeIn::new(fade_in, &params);
        Self {
            params,
            ring,
            stats,
            pending: VecDeque::with_capacity(params.samples_per_packet() * 2),
            scratch: Vec::with_capacity(params.samples_per_packet()),
            fade,
        }
    }

    /// Pull one frame from the ring into `pending`, substituting silence when
    /// nothing is queued.
    fn pull_frame(&mut self) {
        let samples = self.params.samples_per_packet();
        let frames = self.params.frames_per_packet as u64;
        match self.ring.read() {
            Some(bytes) => {
                self.scratch.clear();
                let ok = unpack_samples(&bytes, self.params.bit_depth, &mut self.scratch).is_ok()
                    && self.scratch.len() == samples;
                if ok {
                    self.stats.level().update_from_samples(&self.scratch);
                    self.pending.extend(self.scratch.iter().copied());
                } else {
                    error!("discarding malformed frame of {} bytes", bytes.len());
                    self.stats.add_dropped(frames);
                    self.stats.level().decay_to_silence();
                    self.pending.extend(std::iter::repeat(0.0).take(samples));
                }
            }
            None => {
                // Underrun: keep the device fed with silence.
                self.stats.add_dropped(frames);
                self.stats.level().decay_to_silence();
                self.pending.extend(std::iter::repeat(0.0).take(samples));
            }
        }
        self.stats.add_processed(frames);
    }

    fn fill(&mut self, data: &mut [f32]) {
        let started = Instant::now();
        while self.pending.len() < data.len() {
            self.pull_frame();
        }
        for out in data.iter_mut() {
            let sample = self.pending.pop_front().unwrap_or(0.0);
            *out = sample * self.fade.next_gain();
        }
        self.stats.set_latency(started.elapsed());
        self.stats.set_buffer_usage(self.ring.usage());
    }
}

fn build_output_stream(
    device: &Device,
    params: StreamParams,
    ring: Arc<FrameRing>,
    stats: Arc<AudioStats>,
    fade_in: Duration,
) -> Result<cpal::Stream> {
    let stream_config = StreamConfig {
        channels: params.channels as u16,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: BufferSize::Default,
    };

    let mut feeder = PlaybackFeeder::new(params, ring, stats, fade_in);
    let err_fn = |err: cpal::StreamError| {
        // Underruns are routine under scheduling jitter; playback continues.
        warn!("audio output error: {err}");
    };

    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::wrap(ErrorKind::AudioPlayback, "failed to query output formats", e))?;
    let format = supported
        .filter(|c| c.channels() == params.channels as u16)
        .filter(|c| {
            c.min_sample_rate() <= cpal::SampleRate(params.sample_rate)
                && c.max_sample_rate() >= cpal::SampleRate(params.sample_rate)
        })
        .map(|c| c.sample_format())
        .next();

    let stream = match format {
        Some(SampleFormat::F32) => {
            debug!("playback using device f32 format");
            device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| feeder.fill(data),
                err_fn,
                None,
            )
        }
        Some(SampleFormat::I16) => {
            debug!("playback using device i16 format");
            let mut float_buf: Vec<f32> = Vec::new();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    float_buf.resize(data.len(), 0.0);
                    feeder.fill(&mut float_buf);
                    for (out, &f) in data.iter_mut().zip(float_buf.iter()) {
                        *out = (f * i16::MAX as f32) as i16;
                    }
                },
                err_fn,
                None,
            )
        }
        Some(other) => {
            return Err(Error::audio_playback(format!(
                "unsupported device sample format: {other:?}"
            )));
        }
        None => {
            warn!("no matching output format advertised, trying f32 default");
            device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| feeder.fill(data),
                err_fn,
                None,
            )
        }
    }
    .map_err(|e| Error::wrap(ErrorKind::AudioPlayback, "failed to open audio stream", e))?;

    Ok(stream)
}
