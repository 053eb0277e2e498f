//! Validated runtime configuration.
//!
//! The front-end (CLI flags, optional config file) is responsible for
//! producing a [`Config`]; the core consumes it as-is after
//! [`Config::validate`]. Quality presets map a single user choice onto the
//! sample rate / channel / depth / frame-count tuple the streaming pipeline
//! needs.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Operating mode of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Server,
    Client,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Server => f.write_str("server"),
            Mode::Client => f.write_str("client"),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(Mode::Server),
            "client" => Ok(Mode::Client),
            other => Err(Error::invalid_config(format!(
                "mode must be 'server' or 'client', got '{other}'"
            ))),
        }
    }
}

/// Preset bundles of audio parameters, each a valid 20 ms Opus geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamQuality {
    VeryLow,
    Low,
    Normal,
    High,
    Lossless,
}

impl StreamQuality {
    /// The `(sample_rate, channels, bit_depth, frames_per_packet)` tuple this
    /// preset stands for.
    pub fn params(self) -> (u32, u8, u8, u16) {
        match self {
            StreamQuality::VeryLow => (8_000, 1, 16, 160),
            StreamQuality::Low => (16_000, 1, 16, 320),
            StreamQuality::Normal => (24_000, 2, 16, 480),
            StreamQuality::High => (48_000, 2, 16, 960),
            StreamQuality::Lossless => (48_000, 2, 24, 960),
        }
    }
}

impl fmt::Display for StreamQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamQuality::VeryLow => "verylow",
            StreamQuality::Low => "low",
            StreamQuality::Normal => "normal",
            StreamQuality::High => "high",
            StreamQuality::Lossless => "lossless",
        };
        f.write_str(name)
    }
}

impl FromStr for StreamQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "verylow" | "very-low" => Ok(StreamQuality::VeryLow),
            "low" => Ok(StreamQuality::Low),
            "normal" | "default" => Ok(StreamQuality::Normal),
            "high" => Ok(StreamQuality::High),
            "lossless" | "max" => Ok(StreamQuality::Lossless),
            other => Err(Error::invalid_config(format!(
                "unknown stream quality '{other}'"
            ))),
        }
    }
}

/// Silence-gated transmission settings (client only).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExcitationConfig {
    pub enabled: bool,
    /// Frames whose smoothed level is below this are considered silent.
    pub threshold_db: f32,
    /// How long the level must stay below the threshold before the send path
    /// is suspended.
    pub timeout: Duration,
}

impl Default for ExcitationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_db: -45.0,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Socket and liveness deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Deadline for establishing the TCP connection.
    pub connect: Duration,
    /// Per-packet read deadline.
    pub read: Duration,
    /// Per-packet write deadline.
    pub write: Duration,
    /// How often the client emits heartbeats.
    pub heartbeat_interval: Duration,
    /// Server warns when no traffic arrives for this long.
    pub heartbeat: Duration,
    /// Server closes the session when no traffic arrives for this long.
    pub keepalive: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(15),
            write: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat: Duration::from_secs(10),
            keepalive: Duration::from_secs(30),
        }
    }
}

/// Everything the core needs to run one endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub mode: Mode,
    pub host: String,
    pub port: u16,
    /// Input device selector: exact name or numeric index. `None` = default.
    pub input_device: Option<String>,
    /// Output device selector: exact name or numeric index. `None` = default.
    pub output_device: Option<String>,

    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: u8,
    pub frames_per_packet: u16,
    pub buffer_count: u8,
    pub compression: bool,

    pub excitation: ExcitationConfig,
    pub timeouts: Timeouts,
    /// Allowed client IPs (server only). Empty = allow all.
    pub allow_clients: Vec<String>,
    /// Playback fade-in applied to a fresh session to mask click artifacts.
    pub fade_in: Duration,
}

impl Config {
    /// A configuration at the `Normal` preset, ready to be adjusted by the
    /// front-end.
    pub fn new(mode: Mode) -> Self {
        let mut config = Self {
            mode,
            host: "localhost".to_string(),
            port: 8080,
            input_device: None,
            output_device: None,
            sample_rate: 0,
            channels: 0,
            bit_depth: 0,
            frames_per_packet: 0,
            buffer_count: 4,
            compression: true,
            excitation: ExcitationConfig::default(),
            timeouts: Timeouts::default(),
            allow_clients: Vec::new(),
            fade_in: Duration::from_millis(500),
        };
        config.apply_quality(StreamQuality::Normal);
        config
    }

    /// Overwrite the audio geometry with a preset.
    pub fn apply_quality(&mut self, quality: StreamQuality) {
        let (sample_rate, channels, bit_depth, frames_per_packet) = quality.params();
        self.sample_rate = sample_rate;
        self.channels = channels;
        self.bit_depth = bit_depth;
        self.frames_per_packet = frames_per_packet;
    }

    /// Size of one audio frame (one sample per channel) in bytes.
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * (self.bit_depth as usize / 8)
    }

    /// Size of one uncompressed packet payload in bytes.
    pub fn payload_len(&self) -> usize {
        self.frame_bytes() * self.frames_per_packet as usize
    }

    /// `host:port` of the endpoint to bind or dial.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reject configurations the pipeline cannot run with.
    ///
    /// The audio geometry checks here mirror the handshake validation; the
    /// compressed-mode grammar is enforced again by the wire layer so a
    /// misbehaving peer cannot bypass it. The port range is the front-end's
    /// concern (port 0 is legitimate here: it asks the OS for an ephemeral
    /// port, which the tests rely on).
    pub fn validate(&self) -> Result<()> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(Error::invalid_config(format!(
                "sample rate must be between 8000 and 192000, got {}",
                self.sample_rate
            )));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(Error::invalid_config(format!(
                "channels must be between 1 and 8, got {}",
                self.channels
            )));
        }
        if !matches!(self.bit_depth, 16 | 24 | 32) {
            return Err(Error::invalid_config(format!(
                "bit depth must be 16, 24, or 32, got {}",
                self.bit_depth
            )));
        }
        if self.frames_per_packet == 0 || self.frames_per_packet > 8192 {
            return Err(Error::invalid_config(format!(
                "frames per packet must be between 1 and 8192, got {}",
                self.frames_per_packet
            )));
        }
        if self.buffer_count == 0 || self.buffer_count > 16 {
            return Err(Error::invalid_config(format!(
                "buffer count must be between 1 and 16, got {}",
                self.buffer_count
            )));
        }
        if self.compression {
            if !OPUS_SAMPLE_RATES.contains(&self.sample_rate) {
                return Err(Error::invalid_config(format!(
                    "compressed mode requires a sample rate in {OPUS_SAMPLE_RATES:?}, got {}",
                    self.sample_rate
                )));
            }
            if self.channels > 2 {
                return Err(Error::invalid_config(format!(
                    "compressed mode supports 1 or 2 channels, got {}",
                    self.channels
                )));
            }
            if !OPUS_FRAME_SIZES.contains(&self.frames_per_packet) {
                return Err(Error::invalid_config(format!(
                    "compressed mode requires frames per packet in {OPUS_FRAME_SIZES:?}, got {}",
                    self.frames_per_packet
                )));
            }
        }
        Ok(())
    }
}

/// Sample rates the compressed codec grammar accepts.
pub const OPUS_SAMPLE_RATES: [u32; 5] = [8_000, 12_000, 16_000, 24_000, 48_000];

/// Frame counts per packet the compressed codec grammar accepts.
pub const OPUS_FRAME_SIZES: [u16; 8] = [40, 80, 120, 160, 240, 320, 480, 960];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::new(Mode::Client);
        config.validate().expect("default config validates");
        assert_eq!(config.sample_rate, 24_000);
        assert_eq!(config.channels, 2);
        assert_eq!(config.frames_per_packet, 480);
        assert!(config.compression);
    }

    #[test]
    fn presets_cover_the_documented_tuples() {
        assert_eq!(StreamQuality::VeryLow.params(), (8_000, 1, 16, 160));
        assert_eq!(StreamQuality::Low.params(), (16_000, 1, 16, 320));
        assert_eq!(StreamQuality::Normal.params(), (24_000, 2, 16, 480));
        assert_eq!(StreamQuality::High.params(), (48_000, 2, 16, 960));
        assert_eq!(StreamQuality::Lossless.params(), (48_000, 2, 24, 960));
    }

    #[test]
    fn every_preset_validates_in_both_modes() {
        for quality in [
            StreamQuality::VeryLow,
            StreamQuality::Low,
            StreamQuality::Normal,
            StreamQuality::High,
            StreamQuality::Lossless,
        ] {
            for compression in [false, true] {
                let mut config = Config::new(Mode::Client);
                config.apply_quality(quality);
                config.compression = compression;
                config.validate().unwrap_or_else(|e| {
                    panic!("preset {quality} compression={compression}: {e}")
                });
            }
        }
    }

    #[test]
    fn rejects_out_of_range_geometry() {
        let mut config = Config::new(Mode::Server);
        config.compression = false;

        config.sample_rate = 4_000;
        assert!(config.validate().is_err());
        config.sample_rate = 44_100;
        config.validate().expect("44.1k is fine uncompressed");

        config.channels = 9;
        assert!(config.validate().is_err());
        config.channels = 2;

        config.bit_depth = 20;
        assert!(config.validate().is_err());
        config.bit_depth = 16;

        config.frames_per_packet = 0;
        assert!(config.validate().is_err());
        config.frames_per_packet = 9000;
        assert!(config.validate().is_err());
        config.frames_per_packet = 1024;

        config.buffer_count = 0;
        assert!(config.validate().is_err());
        config.buffer_count = 17;
        assert!(config.validate().is_err());
    }

    #[test]
    fn compressed_mode_enforces_codec_grammar() {
        let mut config = Config::new(Mode::Client);
        config.compression = true;

        config.sample_rate = 44_100;
        assert!(config.validate().is_err());
        config.sample_rate = 48_000;

        config.frames_per_packet = 1024;
        assert!(config.validate().is_err());
        config.frames_per_packet = 960;

        config.channels = 4;
        assert!(config.validate().is_err());
        config.channels = 2;

        config.validate().expect("grammar-conforming config");
    }

    #[test]
    fn frame_and_payload_sizes() {
        let mut config = Config::new(Mode::Client);
        config.apply_quality(StreamQuality::High);
        assert_eq!(config.frame_bytes(), 4); // stereo 16-bit
        assert_eq!(config.payload_len(), 3840); // 960 frames
    }

    #[test]
    fn parses_mode_and_quality_strings() {
        assert_eq!("server".parse::<Mode>().unwrap(), Mode::Server);
        assert_eq!("CLIENT".parse::<Mode>().unwrap(), Mode::Client);
        assert!("proxy".parse::<Mode>().is_err());
        assert_eq!(
            "lossless".parse::<StreamQuality>().unwrap(),
            StreamQuality::Lossless
        );
        assert!("ultra".parse::<StreamQuality>().is_err());
    }
}
