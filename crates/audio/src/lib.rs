//! Audio capture, playback, buffering, and the codec layer.
//!
//! This crate owns everything that touches sound:
//!
//! - [`AudioSystem`] / device lookup: a thin adapter over the cpal host, so
//!   device handles never leak into protocol or session types
//! - [`FrameRing`]: the bounded frame queue between the network and the
//!   output device
//! - [`FrameEncoder`] / [`FrameDecoder`]: PCM passthrough or Opus, selected
//!   by the negotiated geometry
//! - [`Capturer`] / [`Player`]: the input and output halves of the pipeline,
//!   each keeping its cpal stream alive on a dedicated thread (cpal streams
//!   are not `Send`)
//!
//! The session layer talks to capture and playback exclusively through the
//! [`Capture`] and [`Playback`] traits, which keeps the networking code
//! testable without audio hardware.

pub mod capture;
pub mod codec;
pub mod device;
pub mod playback;
pub mod ring;
pub mod sample;

mod worker;

pub use capture::{Capture, Capturer, FrameSink};
pub use cpal::Device;
pub use codec::{FrameDecoder, FrameEncoder, MAX_ENCODED_LEN};
pub use device::{AudioSystem, DeviceInfo};
pub use playback::{Playback, Player};
pub use ring::FrameRing;
