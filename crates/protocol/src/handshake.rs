//! The handshake payload: negotiated audio geometry.
//!
//! The client opens every session by sending a [`StreamParams`] in a
//! Handshake packet; the server validates it, echoes the accepted geometry,
//! and both sides open their device streams with it.

use bytes::{Buf, BufMut};
use utils::{Config, Error, Result};

pub use utils::config::{OPUS_FRAME_SIZES, OPUS_SAMPLE_RATES};

/// Wire size of the handshake payload.
pub const HANDSHAKE_LEN: usize = 12;

/// The shape of the audio stream both sides agree on.
///
/// Wire layout (big-endian): 4B sample_rate, 1B channels, 1B bit_depth,
/// 2B frames_per_packet, 1B buffer_count, 1B compression, 2B reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
    /// Audio frames carried by one packet.
    pub frames_per_packet: u16,
    /// Ring-buffer slot count on the playback side.
    pub buffer_count: u8,
    /// False = interleaved little-endian PCM payloads, true = one compressed
    /// frame per payload.
    pub compression: bool,
}

impl StreamParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            bit_depth: config.bit_depth,
            frames_per_packet: config.frames_per_packet,
            buffer_count: config.buffer_count,
            compression: config.compression,
        }
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut bytes = [0u8; HANDSHAKE_LEN];
        let mut buf = &mut bytes[..];
        buf.put_u32(self.sample_rate);
        buf.put_u8(self.channels);
        buf.put_u8(self.bit_depth);
        buf.put_u16(self.frames_per_packet);
        buf.put_u8(self.buffer_count);
        buf.put_u8(self.compression as u8);
        // Remaining two bytes stay reserved-zero.
        bytes
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HANDSHAKE_LEN {
            return Err(Error::protocol(format!(
                "handshake payload too short: {} bytes",
                data.len()
            )));
        }
        let mut buf = data;
        Ok(Self {
            sample_rate: buf.get_u32(),
            channels: buf.get_u8(),
            bit_depth: buf.get_u8(),
            frames_per_packet: buf.get_u16(),
            buffer_count: buf.get_u8(),
            compression: buf.get_u8() != 0,
        })
    }

    /// Reject geometries the pipeline cannot run with. The compressed-mode
    /// grammar (codec-valid sample rates, frame sizes, channel counts) is
    /// enforced here, at handshake time, not at send time.
    pub fn validate(&self) -> Result<()> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(Error::protocol(format!(
                "invalid sample rate: {}",
                self.sample_rate
            )));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(Error::protocol(format!(
                "invalid channel count: {}",
                self.channels
            )));
        }
        if !matches!(self.bit_depth, 16 | 24 | 32) {
            return Err(Error::protocol(format!(
                "invalid bit depth: {}",
                self.bit_depth
            )));
        }
        if self.frames_per_packet == 0 || self.frames_per_packet > 8192 {
            return Err(Error::protocol(format!(
                "invalid frames per packet: {}",
                self.frames_per_packet
            )));
        }
        if self.buffer_count == 0 || self.buffer_count > 16 {
            return Err(Error::protocol(format!(
                "invalid buffer count: {}",
                self.buffer_count
            )));
        }
        if self.compression {
            if !OPUS_SAMPLE_RATES.contains(&self.sample_rate) {
                return Err(Error::protocol(format!(
                    "sample rate {} not valid for compressed mode",
                    self.sample_rate
                )));
            }
            if self.channels > 2 {
                return Err(Error::protocol(format!(
                    "channel count {} not valid for compressed mode",
                    self.channels
                )));
            }
            if !OPUS_FRAME_SIZES.contains(&self.frames_per_packet) {
                return Err(Error::protocol(format!(
                    "frames per packet {} not valid for compressed mode",
                    self.frames_per_packet
                )));
            }
        }
        Ok(())
    }

    /// Size of one audio frame (one sample per channel) in bytes.
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * (self.bit_depth as usize / 8)
    }

    /// Interleaved samples carried by one packet.
    pub fn samples_per_packet(&self) -> usize {
        self.frames_per_packet as usize * self.channels as usize
    }

    /// Size of one uncompressed packet payload in bytes.
    pub fn payload_len(&self) -> usize {
        self.frame_bytes() * self.frames_per_packet as usize
    }
}
