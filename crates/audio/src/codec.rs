//! The audio codec layer: PCM passthrough or Opus.
//!
//! Both directions are pure transforms over one packet's worth of audio.
//! The encoder takes a packed PCM frame (frames-per-packet samples per
//! channel, little-endian at the negotiated depth) and produces a payload;
//! the decoder does the inverse. Neither knows anything about sequence
//! numbers or sockets.
//!
//! Opus operates in f32 at a 20 ms-grammar frame size; the geometry is
//! validated against that grammar at handshake time, so by the time a codec
//! is constructed the parameters are known-good.

use opus::{Application, Bitrate, Channels};
use protocol::StreamParams;
use tracing::debug;
use utils::{Error, ErrorKind, Result};

use crate::sample::{pack_samples, unpack_samples};

/// Upper bound on one compressed frame.
///
/// For 20 ms stereo at 128 kbps the real maximum is a few hundred bytes;
/// 4000 leaves room for higher bitrates.
pub const MAX_ENCODED_LEN: usize = 4000;

/// Target bitrate for compressed mode, in bits per second.
const OPUS_BITRATE: i32 = 128_000;

fn opus_channels(params: &StreamParams) -> Result<Channels> {
    match params.channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        other => Err(Error::invalid_config(format!(
            "compressed mode supports 1 or 2 channels, got {other}"
        ))),
    }
}

/// Per-session encoder: raw PCM frame in, wire payload out.
pub enum FrameEncoder {
    Pcm {
        params: StreamParams,
    },
    Opus {
        params: StreamParams,
        encoder: opus::Encoder,
        pcm: Vec<f32>,
        out: Box<[u8; MAX_ENCODED_LEN]>,
    },
}

impl FrameEncoder {
    pub fn new(params: &StreamParams) -> Result<Self> {
        if !params.compression {
            return Ok(FrameEncoder::Pcm { params: *params });
        }

        let mut encoder =
            opus::Encoder::new(params.sample_rate, opus_channels(params)?, Application::Audio)
                .map_err(|e| {
                    Error::wrap(ErrorKind::AudioCapture, "encoder initialization failed", e)
                })?;
        encoder
            .set_bitrate(Bitrate::Bits(OPUS_BITRATE))
            .map_err(|e| Error::wrap(ErrorKind::AudioCapture, "failed to set bitrate", e))?;

        debug!(
            sample_rate = params.sample_rate,
            channels = params.channels,
            frames_per_packet = params.frames_per_packet,
            bitrate = OPUS_BITRATE,
            "opus encoder initialized"
        );

        Ok(FrameEncoder::Opus {
            params: *params,
            encoder,
            pcm: Vec::with_capacity(params.samples_per_packet()),
            out: Box::new([0u8; MAX_ENCODED_LEN]),
        })
    }

    /// Transform one packed PCM frame into a packet payload.
    pub fn encode(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        match self {
            FrameEncoder::Pcm { params } => {
                let expected = params.payload_len();
                if frame.len() != expected {
                    return Err(Error::audio_capture(format!(
                        "invalid frame size: expected {expected} bytes, got {}",
                        frame.len()
                    )));
                }
                Ok(frame.to_vec())
            }
            FrameEncoder::Opus {
                params,
                encoder,
                pcm,
                out,
            } => {
                let expected = params.payload_len();
                if frame.len() != expected {
                    return Err(Error::audio_capture(format!(
                        "invalid frame size: expected {expected} bytes, got {}",
                        frame.len()
                    )));
                }
                pcm.clear();
                unpack_samples(frame, params.bit_depth, pcm)?;
                let len = encoder
                    .encode_float(pcm, &mut out[..])
                    .map_err(|e| Error::wrap(ErrorKind::AudioCapture, "encoding failed", e))?;
                Ok(out[..len].to_vec())
            }
        }
    }
}

/// Per-session decoder: wire payload in, packed PCM frame out.
pub enum FrameDecoder {
    Pcm {
        params: StreamParams,
    },
    Opus {
        params: StreamParams,
        decoder: opus::Decoder,
        pcm: Vec<f32>,
    },
}

impl FrameDecoder {
    pub fn new(params: &StreamParams) -> Result<Self> {
        if !params.compression {
            return Ok(FrameDecoder::Pcm { params: *params });
        }

        let decoder = opus::Decoder::new(params.sample_rate, opus_channels(params)?)
            .map_err(|e| {
                Error::wrap(ErrorKind::AudioPlayback, "decoder initialization failed", e)
            })?;

        debug!(
            sample_rate = params.sample_rate,
            channels = params.channels,
            "opus decoder initialized"
        );

        Ok(FrameDecoder::Opus {
            params: *params,
            decoder,
            pcm: vec![0.0; params.samples_per_packet()],
        })
    }

    /// Transform one packet payload back into a packed PCM frame.
    ///
    /// Malformed input surfaces as an error; the caller drops the packet and
    /// keeps the session alive.
    pub fn decode(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        match self {
            FrameDecoder::Pcm { params } => {
                let expected = params.payload_len();
                if payload.len() != expected {
                    return Err(Error::audio_playback(format!(
                        "invalid payload size: expected {expected} bytes, got {}",
                        payload.len()
                    )));
                }
                Ok(payload.to_vec())
            }
            FrameDecoder::Opus {
                params,
                decoder,
                pcm,
            } => {
                let frames = decoder
                    .decode_float(payload, pcm, false)
                    .map_err(|e| Error::wrap(ErrorKind::AudioPlayback, "decoding failed", e))?;
                if frames != params.frames_per_packet as usize {
                    return Err(Error::audio_playback(format!(
                        "decoded unexpected frame count: expected {}, got {frames}",
                        params.frames_per_packet
                    )));
                }
                let samples = frames * params.channels as usize;
                let mut packed = Vec::with_capacity(samples * (params.bit_depth as usize / 8));
                pack_samples(&pcm[..samples], params.bit_depth, &mut packed)?;
                Ok(packed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_params() -> StreamParams {
        StreamParams {
            sample_rate: 48_000,
            channels: 2,
            bit_depth: 16,
            frames_per_packet: 960,
            buffer_count: 4,
            compression: false,
        }
    }

    fn opus_params() -> StreamParams {
        StreamParams {
            compression: true,
            channels: 1,
            ..pcm_params()
        }
    }

    fn sine_frame(params: &StreamParams, freq: f32, amplitude: f32) -> Vec<u8> {
        let rate = params.sample_rate as f32;
        let samples: Vec<f32> = (0..params.frames_per_packet as usize)
            .flat_map(|i| {
                let s = (2.0 * std::f32::consts::PI * freq * i as f32 / rate).sin() * amplitude;
                std::iter::repeat(s).take(params.channels as usize)
            })
            .collect();
        let mut packed = Vec::new();
        pack_samples(&samples, params.bit_depth, &mut packed).unwrap();
        packed
    }

    #[test]
    fn pcm_mode_is_identity() {
        let params = pcm_params();
        let mut encoder = FrameEncoder::new(&params).unwrap();
        let mut decoder = FrameDecoder::new(&params).unwrap();

        let frame = sine_frame(&params, 440.0, 0.5);
        let payload = encoder.encode(&frame).unwrap();
        assert_eq!(payload, frame);
        assert_eq!(decoder.decode(&payload).unwrap(), frame);
    }

    #[test]
    fn pcm_mode_enforces_frame_size() {
        let params = pcm_params();
        let mut encoder = FrameEncoder::new(&params).unwrap();
        let err = encoder.encode(&[0u8; 100]).unwrap_err();
        assert!(err.to_string().contains("invalid frame size"));

        let mut decoder = FrameDecoder::new(&params).unwrap();
        assert!(decoder.decode(&[0u8; 100]).is_err());
    }

    #[test]
    fn opus_round_trip_preserves_signal_energy() {
        let params = opus_params();
        let mut encoder = FrameEncoder::new(&params).unwrap();
        let mut decoder = FrameDecoder::new(&params).unwrap();

        let frame = sine_frame(&params, 440.0, 0.5);
        // Run a few frames so the codec settles.
        let mut decoded = Vec::new();
        for _ in 0..5 {
            let payload = encoder.encode(&frame).unwrap();
            assert!(!payload.is_empty());
            assert!(payload.len() <= MAX_ENCODED_LEN);
            assert!(payload.len() < frame.len(), "opus should compress");
            decoded = decoder.decode(&payload).unwrap();
            assert_eq!(decoded.len(), params.payload_len());
        }

        let mut original = Vec::new();
        unpack_samples(&frame, params.bit_depth, &mut original).unwrap();
        let mut recovered = Vec::new();
        unpack_samples(&decoded, params.bit_depth, &mut recovered).unwrap();

        let rms = |s: &[f32]| (s.iter().map(|x| x * x).sum::<f32>() / s.len() as f32).sqrt();
        let original_rms = rms(&original);
        let recovered_rms = rms(&recovered);
        assert!(
            recovered_rms > original_rms * 0.3 && recovered_rms < original_rms * 3.0,
            "recovered RMS {recovered_rms:.4} vs original {original_rms:.4}"
        );
    }

    #[test]
    fn opus_stereo_round_trip() {
        let params = StreamParams {
            compression: true,
            ..pcm_params()
        };
        let mut encoder = FrameEncoder::new(&params).unwrap();
        let mut decoder = FrameDecoder::new(&params).unwrap();
        let frame = sine_frame(&params, 880.0, 0.3);
        let payload = encoder.encode(&frame).unwrap();
        let decoded = decoder.decode(&payload).unwrap();
        assert_eq!(decoded.len(), params.payload_len());
    }

    #[test]
    fn opus_rejects_wrong_input_size() {
        let params = opus_params();
        let mut encoder = FrameEncoder::new(&params).unwrap();
        let err = encoder.encode(&[0u8; 4]).unwrap_err();
        assert!(err.to_string().contains("invalid frame size"));
    }

    #[test]
    fn opus_rejects_more_than_two_channels() {
        let params = StreamParams {
            compression: true,
            channels: 4,
            ..pcm_params()
        };
        assert!(FrameEncoder::new(&params).is_err());
        assert!(FrameDecoder::new(&params).is_err());
    }
}
