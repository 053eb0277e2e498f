//! Front-end configuration: CLI flags layered over an optional TOML file.
//!
//! Precedence, lowest to highest:
//! 1. Built-in defaults (the `normal` quality preset)
//! 2. TOML config file, when `--config` points at one
//! 3. Command-line arguments
//!
//! The outcome is the validated [`utils::Config`] the core consumes. Nothing
//! is ever written to disk.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use utils::{Config, Mode, StreamQuality};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "lancast")]
#[command(about = "Stream audio between two LAN machines over TCP", long_about = None)]
pub struct CliArgs {
    /// Operating mode: server (play received audio) or client (capture and
    /// send).
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Server host address (client mode).
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port to listen on / connect to.
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Input device name or index (client mode). Default device when omitted.
    #[arg(long)]
    pub input_device: Option<String>,

    /// Output device name or index (server mode). Default device when
    /// omitted.
    #[arg(long)]
    pub output_device: Option<String>,

    /// Stream quality preset: verylow, low, normal, high, lossless.
    #[arg(short, long)]
    pub quality: Option<String>,

    /// Compression mode: "yes" (Opus) or "no" (PCM).
    #[arg(long)]
    pub compress: Option<String>,

    /// Pause streaming during sustained silence (client mode).
    #[arg(long)]
    pub excitation: bool,

    /// Excitation threshold in dBFS.
    #[arg(long, allow_negative_numbers = true)]
    pub excitation_threshold: Option<f32>,

    /// Excitation timeout in seconds.
    #[arg(long)]
    pub excitation_timeout: Option<u64>,

    /// Comma-separated list of allowed client IPs (server mode). Empty allows
    /// everyone.
    #[arg(long)]
    pub allow_client: Option<String>,

    /// Path to a TOML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Logging level: trace, debug, info, warn, error.
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// List available audio devices and exit.
    #[arg(long)]
    pub list_devices: bool,
}

/// TOML configuration file structure. Every field is optional; missing ones
/// fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub mode: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub quality: Option<String>,
    pub compress: Option<bool>,
    pub excitation: Option<bool>,
    pub excitation_threshold: Option<f32>,
    pub excitation_timeout_secs: Option<u64>,
    pub allow_clients: Option<Vec<String>>,
    pub log_level: Option<String>,
}

/// Everything main needs to start.
#[derive(Debug)]
pub struct AppConfig {
    pub config: Config,
    pub log_level: String,
    pub list_devices: bool,
}

impl AppConfig {
    /// Parse the command line, layer in the config file, and produce the
    /// validated core configuration.
    pub fn load() -> Result<Self> {
        let args = CliArgs::parse();
        Self::from_sources(args)
    }

    fn from_sources(args: CliArgs) -> Result<Self> {
        let file = match &args.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str::<FileConfig>(&text)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let mode_str = args
            .mode
            .as_deref()
            .or(file.mode.as_deref())
            .unwrap_or("server");
        let mode: Mode = mode_str.parse()?;

        let mut config = Config::new(mode);

        let quality = match args.quality.as_deref().or(file.quality.as_deref()) {
            Some(q) => q.parse::<StreamQuality>()?,
            None => StreamQuality::Normal,
        };
        config.apply_quality(quality);

        if let Some(host) = args.host.or(file.host) {
            config.host = host;
        }
        if let Some(port) = args.port.or(file.port) {
            config.port = port;
        }
        config.input_device = args.input_device.or(file.input_device);
        config.output_device = args.output_device.or(file.output_device);

        config.compression = match args.compress.as_deref() {
            Some(value) => parse_compression(value)?,
            None => file.compress.unwrap_or(true),
        };

        config.excitation.enabled = args.excitation || file.excitation.unwrap_or(false);
        if let Some(threshold) = args.excitation_threshold.or(file.excitation_threshold) {
            config.excitation.threshold_db = threshold;
        }
        if let Some(secs) = args.excitation_timeout.or(file.excitation_timeout_secs) {
            config.excitation.timeout = Duration::from_secs(secs);
        }

        config.allow_clients = match args.allow_client.as_deref() {
            Some(list) => list
                .split(',')
                .map(|ip| ip.trim().to_string())
                .filter(|ip| !ip.is_empty())
                .collect(),
            None => file.allow_clients.unwrap_or_default(),
        };

        let log_level = args
            .log_level
            .or(file.log_level)
            .unwrap_or_else(|| "info".to_string());

        Ok(Self {
            config,
            log_level,
            list_devices: args.list_devices,
        })
    }
}

fn parse_compression(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "opus" | "true" | "1" => Ok(true),
        "no" | "pcm" | "false" | "0" => Ok(false),
        other => anyhow::bail!("compression must be 'yes' or 'no', got '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("lancast").chain(line.iter().copied()))
    }

    #[test]
    fn defaults_are_a_normal_quality_server() {
        let app = AppConfig::from_sources(args(&[])).unwrap();
        assert_eq!(app.config.mode, Mode::Server);
        assert_eq!(app.config.port, 8080);
        assert_eq!(app.config.sample_rate, 24_000);
        assert!(app.config.compression);
        assert_eq!(app.log_level, "info");
    }

    #[test]
    fn cli_flags_override_defaults() {
        let app = AppConfig::from_sources(args(&[
            "--mode",
            "client",
            "--host",
            "192.168.1.40",
            "--port",
            "9000",
            "--quality",
            "high",
            "--compress",
            "no",
            "--excitation",
            "--excitation-threshold",
            "-50",
            "--excitation-timeout",
            "3",
        ]))
        .unwrap();

        assert_eq!(app.config.mode, Mode::Client);
        assert_eq!(app.config.host, "192.168.1.40");
        assert_eq!(app.config.port, 9000);
        assert_eq!(app.config.sample_rate, 48_000);
        assert!(!app.config.compression);
        assert!(app.config.excitation.enabled);
        assert_eq!(app.config.excitation.threshold_db, -50.0);
        assert_eq!(app.config.excitation.timeout, Duration::from_secs(3));
        app.config.validate().unwrap();
    }

    #[test]
    fn allow_client_list_is_split_and_trimmed() {
        let app = AppConfig::from_sources(args(&[
            "--allow-client",
            "192.168.1.50, 10.0.0.1 ,",
        ]))
        .unwrap();
        assert_eq!(
            app.config.allow_clients,
            vec!["192.168.1.50".to_string(), "10.0.0.1".to_string()]
        );
    }

    #[test]
    fn bad_quality_or_mode_is_rejected() {
        assert!(AppConfig::from_sources(args(&["--quality", "ultra"])).is_err());
        assert!(AppConfig::from_sources(args(&["--mode", "proxy"])).is_err());
        assert!(AppConfig::from_sources(args(&["--compress", "maybe"])).is_err());
    }

    #[test]
    fn file_layer_applies_and_cli_wins() {
        let path = std::env::temp_dir().join("lancast-config-layering-test.toml");
        std::fs::write(
            &path,
            "mode = \"client\"\nhost = \"10.0.0.9\"\nport = 7000\nquality = \"low\"\ncompress = false\n",
        )
        .unwrap();

        let app = AppConfig::from_sources(args(&[
            "--config",
            path.to_str().unwrap(),
            "--port",
            "7100",
        ]))
        .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(app.config.mode, Mode::Client);
        assert_eq!(app.config.host, "10.0.0.9");
        assert_eq!(app.config.sample_rate, 16_000); // "low" preset from the file
        assert!(!app.config.compression);
        assert_eq!(app.config.port, 7100, "CLI flag beats the file");
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let parsed = toml::from_str::<FileConfig>("bandwidth = 9000\n");
        assert!(parsed.is_err());
    }
}
