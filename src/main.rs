//! # Telemetry Gatherer
//!
//! Records live telemetry from a serial device into series and prints a JSON
//! summary when the acquisition ends.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load the TOML configuration and apply command line overrides
//!    - Set up logging (console, plus daily rolling files when configured)
//!    - Open the serial port, or a raw capture with `--replay`
//!
//! 2. **Acquisition**
//!    - The worker runs in the background until the device stops answering,
//!      the link fails, Ctrl+C is pressed or `--stop-after` elapses
//!
//! 3. **Shutdown**
//!    - The open series is finalized (or discarded when too short)
//!    - The summary of every stored series is printed to stdout
//!
//! # Examples
//!
//! ```bash
//! telemetry-gatherer --config config/default.toml --port /dev/ttyUSB0
//! telemetry-gatherer --replay capture.bin
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use telemetry_gatherer::acquisition::sink::SeriesSummary;
use telemetry_gatherer::acquisition::{
    AcquisitionScheduler, AcquisitionSession, Diagnostics, MemorySeriesSink, SessionReport,
};
use telemetry_gatherer::config::{Config, LoggingConfig};
use telemetry_gatherer::error::GathererError;
use telemetry_gatherer::framing::frame_source;
use telemetry_gatherer::serial;

/// Live telemetry acquisition over serial links
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Serial port, overrides the configured one
    #[arg(short, long)]
    port: Option<String>,

    /// Read a raw capture file instead of a serial port
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Stop the acquisition after this many seconds
    #[arg(short, long)]
    stop_after: Option<u64>,

    /// Log level, overrides the configured one
    #[arg(long)]
    log_level: Option<String>,
}

/// Printed when the acquisition ends
#[derive(Debug, Serialize)]
struct Summary {
    device: String,
    report: Option<SessionReport>,
    error: Option<String>,
    diagnostics: Diagnostics,
    series: Vec<SeriesSummary>,
}

/// Set up console logging and, when a directory is configured, a daily
/// rolling log file
///
/// The returned guard flushes the file writer and must be held until exit.
fn init_logging(config: &LoggingConfig, level_override: Option<&str>) -> Option<WorkerGuard> {
    let level = level_override.unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let console = tracing_subscriber::fmt::layer();

    match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(console).init();
            None
        }
    }
}

async fn stop_timer(stop_after: Option<u64>) {
    match stop_after {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    if let Some(port) = &args.port {
        config.serial.port = port.clone();
    }

    let _log_guard = init_logging(&config.logging, args.log_level.as_deref());
    info!("Telemetry Gatherer v{} starting...", env!("CARGO_PKG_VERSION"));

    let descriptor = config.device.descriptor()?;
    let decoder = config.device.decoder(&descriptor);
    let source = match &args.replay {
        Some(path) => {
            let port = serial::open_replay(path)
                .await
                .with_context(|| format!("Failed to open capture {}", path.display()))?;
            frame_source(&descriptor, port, config.read_settings())
        }
        None => frame_source(&descriptor, serial::open(&config.serial)?, config.read_settings()),
    };

    let sink = MemorySeriesSink::new();
    let session = AcquisitionSession::new(sink.clone(), config.session_settings());
    let scheduler = AcquisitionScheduler::new(&descriptor, source, Box::new(decoder), session)
        .with_progress(config.acquisition.progress_interval, |progress| {
            info!(
                "{} samples recorded ({} in current series, {} transfer errors)",
                progress.samples, progress.series_samples, progress.xfer_errors
            );
        });

    let mut handle = scheduler.start();
    info!("Recording from {}, press Ctrl+C to stop", descriptor.name);

    let finished = tokio::select! {
        result = handle.wait() => Some(result),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, stopping acquisition...");
            None
        }
        _ = stop_timer(args.stop_after) => {
            info!("Stop time reached, stopping acquisition...");
            None
        }
    };
    let result = match finished {
        Some(result) => result,
        None => {
            handle.request_stop();
            handle.wait().await
        }
    };
    let diagnostics = handle.diagnostics();

    // The end of a capture is the normal end of a replay
    let replay_ended = args.replay.is_some() && matches!(result, Err(GathererError::ConnectionClosed));

    let summary = Summary {
        device: descriptor.name.clone(),
        report: result.as_ref().ok().cloned(),
        error: result.as_ref().err().map(|e| e.to_string()),
        diagnostics,
        series: sink.summaries(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match result {
        Ok(report) => {
            info!(
                "Acquisition finished ({:?}): {} series, {} samples",
                report.reason, report.finalized_series, report.samples
            );
            Ok(())
        }
        Err(_) if replay_ended => {
            info!("Replay finished");
            Ok(())
        }
        Err(e) => {
            warn!("Acquisition failed: {}", e);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["telemetry-gatherer"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config/default.toml"));
        assert!(args.port.is_none());
        assert!(args.replay.is_none());
        assert!(args.stop_after.is_none());
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::try_parse_from([
            "telemetry-gatherer",
            "--port",
            "/dev/ttyUSB3",
            "--replay",
            "capture.bin",
            "--stop-after",
            "30",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(args.port.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(args.replay, Some(PathBuf::from("capture.bin")));
        assert_eq!(args.stop_after, Some(30));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_summary_serializes() {
        let summary = Summary {
            device: "charger".to_string(),
            report: None,
            error: Some("connection closed by device".to_string()),
            diagnostics: Diagnostics::default(),
            series: Vec::new(),
        };

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["device"], "charger");
        assert!(json["report"].is_null());
        assert_eq!(json["diagnostics"]["xfer_errors"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_timer_elapses() {
        let started = tokio::time::Instant::now();
        stop_timer(Some(3)).await;
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }
}
