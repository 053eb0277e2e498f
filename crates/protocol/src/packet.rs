//! Packet framing: the 20-byte header, encode/decode, and async stream I/O.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use utils::{Error, Result};

use crate::handshake::StreamParams;

/// Magic number opening every header: "AUDI" in ASCII.
pub const MAGIC: u32 = 0x4155_4449;

/// Current protocol version.
pub const VERSION: u8 = 1;

/// Size of the packet header in bytes.
pub const HEADER_LEN: usize = 20;

/// Maximum payload size in bytes.
pub const MAX_PAYLOAD_LEN: usize = 65_536;

/// The kind of traffic a packet carries.
///
/// Unknown type bytes are preserved rather than rejected so the session layer
/// can log and skip them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Handshake,
    Audio,
    Control,
    Heartbeat,
    Error,
    Unknown(u8),
}

impl PacketType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => PacketType::Handshake,
            1 => PacketType::Audio,
            2 => PacketType::Control,
            3 => PacketType::Heartbeat,
            4 => PacketType::Error,
            other => PacketType::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            PacketType::Handshake => 0,
            PacketType::Audio => 1,
            PacketType::Control => 2,
            PacketType::Heartbeat => 3,
            PacketType::Error => 4,
            PacketType::Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::Handshake => f.write_str("Handshake"),
            PacketType::Audio => f.write_str("Audio"),
            PacketType::Control => f.write_str("Control"),
            PacketType::Heartbeat => f.write_str("Heartbeat"),
            PacketType::Error => f.write_str("Error"),
            PacketType::Unknown(byte) => write!(f, "Unknown({byte})"),
        }
    }
}

/// The fixed-size header preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u8,
    pub packet_type: PacketType,
    pub flags: u8,
    pub reserved: u8,
    /// Monotonically increasing per direction for Audio packets, zero
    /// elsewhere.
    pub sequence: u32,
    pub payload_len: u32,
    /// Seconds since the Unix epoch at packet construction.
    pub timestamp: u32,
}

/// One framed protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

impl Packet {
    /// Build a packet of the given type. The timestamp is stamped here, not
    /// by the codec.
    pub fn new(packet_type: PacketType, payload: Vec<u8>) -> Self {
        Self {
            header: PacketHeader {
                magic: MAGIC,
                version: VERSION,
                packet_type,
                flags: 0,
                reserved: 0,
                sequence: 0,
                payload_len: payload.len() as u32,
                timestamp: unix_now(),
            },
            payload,
        }
    }

    pub fn audio(payload: Vec<u8>, sequence: u32) -> Self {
        let mut packet = Self::new(PacketType::Audio, payload);
        packet.header.sequence = sequence;
        packet
    }

    pub fn handshake(params: &StreamParams) -> Self {
        Self::new(PacketType::Handshake, params.to_bytes().to_vec())
    }

    pub fn heartbeat() -> Self {
        Self::new(PacketType::Heartbeat, Vec::new())
    }

    pub fn error_message(message: &str) -> Self {
        Self::new(PacketType::Error, message.as_bytes().to_vec())
    }

    /// Total bytes this packet occupies on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialize header and payload into one buffer.
    ///
    /// Rejects packets whose magic is wrong, whose payload exceeds the limit,
    /// or whose declared payload size disagrees with the actual payload.
    pub fn encode(&self) -> Result<BytesMut> {
        if self.header.magic != MAGIC {
            return Err(Error::protocol(format!(
                "invalid magic number: {:#010X}",
                self.header.magic
            )));
        }
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::protocol(format!(
                "payload too large: {} bytes",
                self.payload.len()
            )));
        }
        if self.header.payload_len as usize != self.payload.len() {
            return Err(Error::protocol(format!(
                "payload size mismatch: header={}, actual={}",
                self.header.payload_len,
                self.payload.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u32(self.header.magic);
        buf.put_u8(self.header.version);
        buf.put_u8(self.header.packet_type.as_byte());
        buf.put_u8(self.header.flags);
        buf.put_u8(self.header.reserved);
        buf.put_u32(self.header.sequence);
        buf.put_u32(self.header.payload_len);
        buf.put_u32(self.header.timestamp);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Parse and validate a header. Called before any payload bytes are
    /// consumed, so a rejected header costs the reader exactly
    /// [`HEADER_LEN`] bytes.
    pub fn decode_header(bytes: &[u8; HEADER_LEN]) -> Result<PacketHeader> {
        let mut buf = &bytes[..];
        let header = PacketHeader {
            magic: buf.get_u32(),
            version: buf.get_u8(),
            packet_type: PacketType::from_byte(buf.get_u8()),
            flags: buf.get_u8(),
            reserved: buf.get_u8(),
            sequence: buf.get_u32(),
            payload_len: buf.get_u32(),
            timestamp: buf.get_u32(),
        };

        if header.magic != MAGIC {
            return Err(Error::protocol(format!(
                "invalid magic number: {:#010X}",
                header.magic
            )));
        }
        if header.version != VERSION {
            return Err(Error::protocol(format!(
                "unsupported protocol version: {}",
                header.version
            )));
        }
        if header.payload_len as usize > MAX_PAYLOAD_LEN {
            return Err(Error::protocol(format!(
                "payload too large: {} bytes",
                header.payload_len
            )));
        }
        Ok(header)
    }

    /// Write the whole packet as one logical write and flush.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let buf = self.encode()?;
        writer
            .write_all(&buf)
            .await
            .map_err(|e| Error::wrap(utils::ErrorKind::Network, "failed to write packet", e))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::wrap(utils::ErrorKind::Network, "failed to flush packet", e))?;
        Ok(())
    }

    /// Read one packet: block for a full header, validate it, then block for
    /// the full payload. Short reads on either segment are i/o failures.
    pub async fn read_from<R>(reader: &mut R) -> Result<Packet>
    where
        R: AsyncRead + Unpin,
    {
        let mut header_bytes = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut header_bytes)
            .await
            .map_err(|e| Error::wrap(utils::ErrorKind::Network, "failed to read header", e))?;

        let header = Self::decode_header(&header_bytes)?;

        let mut payload = vec![0u8; header.payload_len as usize];
        if !payload.is_empty() {
            reader
                .read_exact(&mut payload)
                .await
                .map_err(|e| Error::wrap(utils::ErrorKind::Network, "failed to read payload", e))?;
        }

        Ok(Packet { header, payload })
    }
}
