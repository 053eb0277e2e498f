//! Framed wire protocol for the lancast audio streamer.
//!
//! Everything on the TCP connection is a [`Packet`]: a fixed 20-byte
//! big-endian header followed by a payload of at most 64 KiB. The first
//! packets exchanged carry [`StreamParams`], the negotiated audio geometry;
//! after which Audio, Heartbeat, and Error packets flow freely.
//!
//! This crate is a pure codec: it knows how to put packets on a byte stream
//! and take them off again, and how to validate what it reads. Session
//! behavior (who sends what when) lives in the `network` crate.

pub mod handshake;
pub mod packet;

pub use handshake::{StreamParams, HANDSHAKE_LEN, OPUS_FRAME_SIZES, OPUS_SAMPLE_RATES};
pub use packet::{Packet, PacketHeader, PacketType, HEADER_LEN, MAGIC, MAX_PAYLOAD_LEN, VERSION};
