//! Audio capture: device input → fixed-size PCM frames.
//!
//! The capturer opens an input stream at the negotiated geometry and
//! re-frames whatever the device delivers into exactly
//! `frames_per_packet × channels` samples. For each complete frame it updates
//! the level meter (RMS → dBFS, smoothed) and hands the packed little-endian
//! PCM bytes to the caller-supplied sink, on the device callback thread, so
//! the sink must be cheap and non-blocking.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::DeviceTrait;
use cpal::{BufferSize, Device, SampleFormat, StreamConfig};
use protocol::StreamParams;
use tracing::{debug, error, info, warn};
use utils::{AudioStats, Error, ErrorKind, Result};

use crate::sample::pack_samples;
use crate::worker::StreamWorker;

/// Callback receiving each captured frame as packed PCM bytes.
pub type FrameSink = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// The capture side of the pipeline, as seen by the session layer.
pub trait Capture: Send {
    /// Open the device stream and begin delivering frames to `sink`.
    fn start(&mut self, sink: FrameSink) -> Result<()>;

    /// Stop the stream. Idempotent.
    fn stop(&mut self);

    /// This capturer's statistics (shared, updated from the device thread).
    fn stats(&self) -> Arc<AudioStats>;
}

/// How long teardown waits for the device thread before detaching.
const STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Captures from a cpal input device.
pub struct Capturer {
    device: Device,
    params: StreamParams,
    stats: Arc<AudioStats>,
    worker: Option<StreamWorker>,
}

impl Capturer {
    /// Validate the geometry against what the capture path supports.
    ///
    /// The wire carries 16- or 32-bit PCM; a 24-bit request fails here, at
    /// initialization, so the front-end can downgrade to 16-bit and retry.
    pub fn new(device: Device, params: StreamParams) -> Result<Self> {
        if !matches!(params.bit_depth, 16 | 32) {
            return Err(Error::audio_capture(format!(
                "unsupported bit depth: {}",
                params.bit_depth
            )));
        }
        Ok(Self {
            device,
            params,
            stats: Arc::new(AudioStats::new()),
            worker: None,
        })
    }
}

impl Capture for Capturer {
    fn start(&mut self, sink: FrameSink) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::audio_capture("capturer already running"));
        }

        let device = self.device.clone();
        let params = self.params;
        let stats = self.stats.clone();
        let worker = StreamWorker::spawn("lancast-capture", move || {
            build_input_stream(&device, params, stats, sink)
        })?;
        self.worker = Some(worker);

        info!(
            sample_rate = self.params.sample_rate,
            channels = self.params.channels,
            bit_depth = self.params.bit_depth,
            frames_per_packet = self.params.frames_per_packet,
            "audio capture started"
        );
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop(STOP_TIMEOUT);
            info!("audio capture stopped");
        }
    }

    fn stats(&self) -> Arc<AudioStats> {
        self.stats.clone()
    }
}

impl Drop for Capturer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Accumulates device samples and emits exact frames to the sink.
struct FrameAssembler {
    params: StreamParams,
    stats: Arc<AudioStats>,
    sink: FrameSink,
    pending: Vec<f32>,
    packed: Vec<u8>,
}

impl FrameAssembler {
    fn new(params: StreamParams, stats: Arc<AudioStats>, sink: FrameSink) -> Self {
        let samples = params.samples_per_packet();
        Self {
            params,
            stats,
            sink,
            pending: Vec::with_capacity(samples * 2),
            packed: Vec::with_capacity(params.payload_len()),
        }
    }

    fn push(&mut self, data: &[f32]) {
        self.pending.extend_from_slice(data);
        self.drain_frames();
    }

    fn push_i16(&mut self, data: &[i16]) {
        self.pending
            .extend(data.iter().map(|&s| s as f32 / i16::MAX as f32));
        self.drain_frames();
    }

    fn drain_frames(&mut self) {
        let samples = self.params.samples_per_packet();
        while self.pending.len() >= samples {
            let started = Instant::now();
            let frame: Vec<f32> = self.pending.drain(..samples).collect();

            self.stats.level().update_from_samples(&frame);

            self.packed.clear();
            if let Err(e) = pack_samples(&frame, self.params.bit_depth, &mut self.packed) {
                error!("failed to pack captured frame: {e}");
                self.stats.add_dropped(self.params.frames_per_packet as u64);
                continue;
            }
            (self.sink)(&self.packed);

            self.stats.add_processed(self.params.frames_per_packet as u64);
            self.stats.set_latency(started.elapsed());
            self.stats
                .set_buffer_usage(self.pending.len() as f32 / (samples * 2) as f32);
        }
    }
}

fn build_input_stream(
    device: &Device,
    params: StreamParams,
    stats: Arc<AudioStats>,
    sink: FrameSink,
) -> Result<cpal::Stream> {
    let stream_config = StreamConfig {
        channels: params.channels as u16,
        sample_rate: cpal::SampleRate(params.sample_rate),
        buffer_size: BufferSize::Default,
    };

    let mut assembler = FrameAssembler::new(params, stats.clone(), sink);

    // Input overflow and other stream errors are logged and counted; the
    // stream keeps running.
    let err_stats = stats;
    let frames = params.frames_per_packet as u64;
    let err_fn = move |err: cpal::StreamError| {
        warn!("audio input error: {err}");
        err_stats.add_dropped(frames);
    };

    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::wrap(ErrorKind::AudioCapture, "failed to query input formats", e))?;
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
            debug!("capture using device f32 format");
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| assembler.push(data),
                err_fn,
                None,
            )
        }
        Some(SampleFormat::I16) => {
            debug!("capture using device i16 format");
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| assembler.push_i16(data),
                err_fn,
                None,
            )
        }
        Some(other) => {
            return Err(Error::audio_capture(format!(
                "unsupported device sample format: {other:?}"
            )));
        }
        None => {
            // No exact match reported; try the f32 default, which most hosts
            // accept.
            warn!("no matching input format advertised, trying f32 default");
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| assembler.push(data),
                err_fn,
                None,
            )
        }
    }
    .map_err(|e| Error::wrap(ErrorKind::AudioCapture, "failed to open audio stream", e))?;

    Ok(stream)
}
