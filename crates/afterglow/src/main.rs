//! Afterglow command line entry point

use afterglow::{logging_setup, AppConfig, Overrides, SessionController};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "afterglow")]
#[command(version, about = "Audio-reactive themes, DMX lighting and player supervision")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// WAV file to analyze; synthetic frames are used without one
    #[arg(short, long)]
    audio: Option<PathBuf>,

    /// Lighting server as host:port
    #[arg(long)]
    endpoint: Option<String>,

    /// Base URL of the remote player
    #[arg(long)]
    widget_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Do not connect to the lighting server
    #[arg(long)]
    no_lighting: bool,

    /// Do not supervise a remote player
    #[arg(long)]
    no_widget: bool,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            endpoint: self.endpoint.clone(),
            widget_url: self.widget_url.clone(),
            audio_file: self.audio.clone(),
            log_level: self.log_level.clone(),
            no_lighting: self.no_lighting,
            no_widget: self.no_widget,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref()).context("Failed to load config")?;
    config.apply_overrides(args.overrides());
    let _log_guard = logging_setup::init(&config.log)?;

    info!("Afterglow {} starting", env!("CARGO_PKG_VERSION"));
    let session = SessionController::new(config)?;
    let summary = session
        .run(wait_for_shutdown(args.duration.map(Duration::from_secs)))
        .await?;

    info!(
        "Session ended: {} frames ({}), {} beats, theme {}, {} DMX frames sent, {} dropped",
        summary.frames,
        summary.strategy,
        summary.beats,
        summary.theme,
        summary.dmx_frames_sent,
        summary.dmx_frames_dropped
    );
    Ok(())
}

/// Resolves on Ctrl-C or when the optional time limit expires
async fn wait_for_shutdown(limit: Option<Duration>) {
    let expire = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => info!("Interrupted"),
        _ = expire => info!("Time limit reached"),
    }
}
