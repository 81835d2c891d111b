//! # Raceline Server
//!
//! Motorsport telemetry replay server with REST API and WebSocket streaming.
//!
//! This crate provides a replay server that:
//! - Reads per-driver race telemetry from the data directory
//! - Composes it into synchronized multi-car frames (once per race)
//! - Streams frames to each viewer at its own pace and speed
//! - Serves the decimated track outline alongside
//!
//! ## Architecture
//!
//! The server is built on top of [`raceline_core`] for the resampling and
//! playback logic, with [`tokio`] providing the async runtime.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    raceline-server                      │
//! │  ┌─────────────┐  ┌─────────────┐                       │
//! │  │ REST API    │  │ WebSocket   │                       │
//! │  │ (axum)      │  │ (frames)    │                       │
//! │  └──────┬──────┘  └──────┬──────┘                       │
//! │         ▼                ▼                              │
//! │  ┌─────────────────────────────────────────────────────┐│
//! │  │              ReplayService                          ││
//! │  │  - Single-flight frame / track caches               ││
//! │  │  - SessionRegistry (per-race cap, shutdown)         ││
//! │  │  - One paced emission task per session              ││
//! │  └─────────────────────────────────────────────────────┘│
//! │         ▼                                               │
//! │  ┌─────────────────────────────────────────────────────┐│
//! │  │              TelemetryStore                         ││
//! │  │  - FileTelemetryStore (JSON under the data dir)     ││
//! │  │  - MemoryTelemetryStore (tests)                     ││
//! │  └─────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## REST API
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `POST /v1/api/races/{race_id}/replays` | Open a replay session |
//! | `GET /v1/api/replays/{id}` | Session status |
//! | `PUT /v1/api/replays/{id}/control` | Send a playback command |
//! | `DELETE /v1/api/replays/{id}` | Close a session |
//! | `WS /v1/api/replays/{id}/frames` | Frame stream (commands accepted too) |
//! | `GET /v1/api/races/{race_id}/trackShape` | Decimated track outline |
//! | `GET /v1/api/config` | Effective replay configuration |
//!
//! ## Example: Starting the Server
//!
//! ```rust,no_run
//! use clap::Parser;
//! use raceline_server::{replay::ReplayService, storage::FileTelemetryStore, web::Web, Cli};
//! use std::{sync::Arc, time::Duration};
//! use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};
//!
//! #[tokio::main]
//! async fn main() {
//!     let args = Cli::parse_from(["raceline-server", "-p", "8080"]);
//!     let store = Arc::new(FileTelemetryStore::new(&args.data_dir()));
//!     let service = ReplayService::new(args.replay_config().unwrap(), store).unwrap();
//!     let web = Web::new(Arc::new(service), args.port);
//!
//!     Toplevel::new(|s| async move {
//!         s.start(SubsystemBuilder::new("Webserver", |a| web.run(a)));
//!     })
//!     .catch_signals()
//!     .handle_shutdown_requests(Duration::from_secs(5))
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! ## Command-Line Interface
//!
//! See [`Cli`] for all available options. Key options:
//!
//! - `-p, --port` - HTTP server port (default: 6510)
//! - `-d, --data-dir` - Directory holding `races/`
//! - `-v` - Increase verbosity (use multiple times)

use clap::Parser;
use std::path::PathBuf;

use raceline_core::config::{
    DEFAULT_DECIMATE_FACTOR, DEFAULT_MAX_SESSIONS_PER_RACE, DEFAULT_OUTPUT_FPS,
    DEFAULT_TICK_INTERVAL_S,
};
use raceline_core::{Position, ReplayConfig, ReplayError};

pub mod cache;
pub mod replay;
pub mod storage;
pub mod web;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
#[command(version, about)]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    /// Port for webserver
    #[arg(short, long, default_value_t = 6510)]
    pub port: u16,

    /// Directory holding race telemetry, defaults to the user data directory
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Simulation clock step in race seconds
    #[arg(long, default_value_t = DEFAULT_TICK_INTERVAL_S)]
    pub tick_interval: f64,

    /// Keep every Nth point of the reference lap
    #[arg(long, default_value_t = DEFAULT_DECIMATE_FACTOR)]
    pub decimate_factor: usize,

    /// Frames per second sent to viewers at the initial speed
    #[arg(long, default_value_t = DEFAULT_OUTPUT_FPS)]
    pub output_fps: f64,

    /// Maximum number of concurrent replay sessions per race
    #[arg(long, default_value_t = DEFAULT_MAX_SESSIONS_PER_RACE)]
    pub max_sessions_per_race: usize,

    /// Where cars wait before their first sample, as `x,y`
    #[arg(long, value_parser = parse_point)]
    pub pit_anchor: Option<Position>,
}

impl Cli {
    pub fn replay_config(&self) -> Result<ReplayConfig, ReplayError> {
        let config = ReplayConfig {
            tick_interval_s: self.tick_interval,
            decimate_factor: self.decimate_factor,
            output_fps: self.output_fps,
            max_sessions_per_race: self.max_sessions_per_race,
            pit_anchor: self.pit_anchor,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }
}

pub fn default_data_dir() -> PathBuf {
    match directories::ProjectDirs::from("org", "raceline", "raceline") {
        Some(dirs) => dirs.data_dir().to_owned(),
        None => PathBuf::from("data"),
    }
}

/// Parse `x,y` into a [`Position`]
pub fn parse_point(s: &str) -> Result<Position, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected 'x,y', got '{}'", s))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("bad x '{}': {}", x, e))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("bad y '{}': {}", y, e))?;
    Ok(Position::new(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args = Cli::parse_from(["raceline-server"]);
        assert_eq!(args.port, 6510);
        let config = args.replay_config().unwrap();
        assert_eq!(config, ReplayConfig::default());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Cli::parse_from([
            "raceline-server",
            "-p",
            "8080",
            "--data-dir",
            "/srv/raceline",
            "--tick-interval",
            "0.25",
            "--pit-anchor=-120.5, 44",
        ]);
        assert_eq!(args.port, 8080);
        assert_eq!(args.data_dir(), PathBuf::from("/srv/raceline"));
        let config = args.replay_config().unwrap();
        assert_eq!(config.tick_interval_s, 0.25);
        assert_eq!(config.pit_anchor, Some(Position::new(-120.5, 44.0)));
    }

    #[test]
    fn test_cli_rejects_bad_config() {
        let args = Cli::parse_from(["raceline-server", "--decimate-factor", "0"]);
        assert!(args.replay_config().is_err());
        assert!(Cli::try_parse_from(["raceline-server", "--pit-anchor", "12"]).is_err());
    }

    #[test]
    fn test_parse_point() {
        assert_eq!(parse_point("1,2"), Ok(Position::new(1.0, 2.0)));
        assert!(parse_point("1;2").is_err());
        assert!(parse_point("a,2").is_err());
    }
}
