//! lancast: stream audio between two LAN machines over a single TCP
//! connection.
//!
//! This binary is a thin front-end: it parses configuration, picks devices,
//! wires Ctrl-C into the shutdown coordinator, and hands everything to the
//! `network` crate. Exit status is 0 on a graceful stop and 1 on any startup
//! or fatal session failure.

mod config;

use std::sync::Arc;

use anyhow::Result;
use audio::{AudioSystem, Capture, Capturer, Playback, Player};
use network::{CaptureFactory, Client, PlaybackFactory, Server};
use tracing::{error, info, warn};
use utils::{Config, ErrorKind, Mode, ShutdownCoordinator};

use crate::config::AppConfig;

#[tokio::main]
async fn main() {
    let app = match AppConfig::load() {
        Ok(app) => app,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_new(&app.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Err(e) = run(app).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(app: AppConfig) -> Result<()> {
    let audio_system = AudioSystem::new();

    if app.list_devices {
        list_devices(&audio_system);
        return Ok(());
    }

    let config = app.config;
    config.validate()?;
    info!(
        mode = %config.mode,
        address = %config.address(),
        sample_rate = config.sample_rate,
        channels = config.channels,
        bit_depth = config.bit_depth,
        compression = config.compression,
        "starting lancast"
    );

    let coordinator = Arc::new(ShutdownCoordinator::new());
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                coordinator.notify_shutdown();
            }
        });
    }

    match config.mode {
        Mode::Server => run_server(config, coordinator, &audio_system).await,
        Mode::Client => run_client(config, coordinator, &audio_system).await,
    }
}

fn list_devices(audio_system: &AudioSystem) {
    println!("Input devices:");
    for device in audio_system.list_input_devices() {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  [{}] {}{}", device.index, device.name, marker);
    }
    println!("Output devices:");
    for device in audio_system.list_output_devices() {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  [{}] {}{}", device.index, device.name, marker);
    }
}

async fn run_server(
    config: Config,
    coordinator: Arc<ShutdownCoordinator>,
    audio_system: &AudioSystem,
) -> Result<()> {
    let device = audio_system.find_output_device(config.output_device.as_deref())?;
    let fade_in = config.fade_in;

    let factory: PlaybackFactory = Arc::new(move |params| {
        let mut player = Player::new(device.clone(), *params, fade_in)?;
        player.start()?;
        Ok(Box::new(player) as Box<dyn Playback>)
    });

    let server = Server::bind(config, coordinator, factory).await?;
    server.run().await?;
    Ok(())
}

async fn run_client(
    mut config: Config,
    coordinator: Arc<ShutdownCoordinator>,
    audio_system: &AudioSystem,
) -> Result<()> {
    let device = audio_system.find_input_device(config.input_device.as_deref())?;

    let client = Client::new(config.clone(), coordinator.clone());
    match client.run(capture_factory(device.clone())).await {
        Ok(()) => Ok(()),
        // A device that refuses 24-bit capture gets one retry at 16-bit.
        Err(e)
            if e.kind() == ErrorKind::AudioCapture
                && e.to_string().contains("unsupported bit depth")
                && config.bit_depth == 24 =>
        {
            warn!("device rejected 24-bit capture, retrying once at 16-bit");
            config.bit_depth = 16;
            let client = Client::new(config, coordinator);
            client.run(capture_factory(device)).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn capture_factory(device: audio::Device) -> CaptureFactory {
    Arc::new(move |params| {
        let capturer = Capturer::new(device.clone(), *params)?;
        Ok(Box::new(capturer) as Box<dyn Capture>)
    })
}
