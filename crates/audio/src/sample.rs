//! Conversion between normalized f32 samples and wire PCM.
//!
//! The pipeline works in f32 internally (device formats and the Opus codec
//! both speak f32); the wire carries interleaved little-endian integer PCM at
//! the negotiated bit depth. Only 16- and 32-bit payloads are supported; the
//! 24-bit case is rejected where the stream is opened so the front-end can
//! downgrade and retry.

use utils::{Error, Result};

/// Pack normalized samples into little-endian PCM at the given depth.
pub fn pack_samples(samples: &[f32], bit_depth: u8, out: &mut Vec<u8>) -> Result<()> {
    match bit_depth {
        16 => {
            out.reserve(samples.len() * 2);
            for &s in samples {
                let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                out.extend_from_slice(&v.to_le_bytes());
            }
            Ok(())
        }
        32 => {
            out.reserve(samples.len() * 4);
            for &s in samples {
                let v = (s.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
                out.extend_from_slice(&v.to_le_bytes());
            }
            Ok(())
        }
        other => Err(Error::invalid_config(format!(
            "unsupported bit depth: {other}"
        ))),
    }
}

/// Unpack little-endian PCM into normalized samples.
pub fn unpack_samples(bytes: &[u8], bit_depth: u8, out: &mut Vec<f32>) -> Result<()> {
    match bit_depth {
        16 => {
            if bytes.len() % 2 != 0 {
                return Err(Error::protocol(format!(
                    "16-bit payload length {} is not sample-aligned",
                    bytes.len()
                )));
            }
            out.reserve(bytes.len() / 2);
            for chunk in bytes.chunks_exact(2) {
                let v = i16::from_le_bytes([chunk[0], chunk[1]]);
                out.push(v as f32 / 32768.0);
            }
            Ok(())
        }
        32 => {
            if bytes.len() % 4 != 0 {
                return Err(Error::protocol(format!(
                    "32-bit payload length {} is not sample-aligned",
                    bytes.len()
                )));
            }
            out.reserve(bytes.len() / 4);
            for chunk in bytes.chunks_exact(4) {
                let v = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                out.push((v as f64 / 2147483648.0) as f32);
            }
            Ok(())
        }
        other => Err(Error::invalid_config(format!(
            "unsupported bit depth: {other}"
        ))),
    }
}
