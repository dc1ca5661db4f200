//! Common types and utilities for Mural.
//!
//! This crate defines the shared data structures and IPC protocol used for
//! communication between the daemon (`murald`) and client (`murctl`).
//!
//! # IPC Protocol
//!
//! Communication happens over a Unix domain socket using JSON-serialized
//! messages. The client sends [`Command`] variants and receives [`Response`]
//! variants.
//!
//! # Examples
//!
//! ```no_run
//! use common::{Command, WallpaperMode};
//!
//! // Ask the daemon to switch to per-display wallpapers
//! let cmd = Command::SetMode {
//!     mode: WallpaperMode::Different,
//! };
//!
//! // Serialize for sending over IPC
//! let json = serde_json::to_string(&cmd).unwrap();
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the update pipeline.
///
/// Raw causes (transport failures, IO errors, decode errors) are classified
/// into this taxonomy at the component boundary that observed them; callers
/// further up pass the first value through unchanged. All variants are
/// serializable for transmission over IPC.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum UpdateError {
    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("image download failed")]
    ImageDownloadFailed,

    #[error("response body is not a valid image")]
    InvalidImageData,

    #[error("failed to save image to cache: {0}")]
    CacheSaveFailed(String),

    #[error("failed to set wallpaper: {0}")]
    WallpaperSetFailed(String),

    #[error("giving up after exhausting retry attempts")]
    MaxRetryAttemptsReached,

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("unexpected error: {0}")]
    Unknown(String),
}

/// How often the wallpaper is refreshed in the background.
///
/// The total duration is clamped to 30 minutes..=24 hours by producers of
/// user-supplied values; consumers trust the stored value. Replaced
/// wholesale on change, never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInterval {
    pub hours: u32,
    pub minutes: u32,
}

impl UpdateInterval {
    /// Smallest accepted interval: 30 minutes.
    pub const MIN_SECONDS: u64 = 30 * 60;

    /// Largest accepted interval: 24 hours.
    pub const MAX_SECONDS: u64 = 24 * 60 * 60;

    /// Build an interval from user input, clamping the total duration to
    /// the accepted range.
    pub fn clamped(hours: u32, minutes: u32) -> Self {
        let total = u64::from(hours) * 3600 + u64::from(minutes) * 60;
        if total < Self::MIN_SECONDS {
            Self { hours: 0, minutes: 30 }
        } else if total > Self::MAX_SECONDS {
            Self { hours: 24, minutes: 0 }
        } else {
            Self { hours, minutes }
        }
    }

    /// Total interval duration in seconds.
    pub fn total_seconds(&self) -> u64 {
        u64::from(self.hours) * 3600 + u64::from(self.minutes) * 60
    }
}

impl Default for UpdateInterval {
    fn default() -> Self {
        Self { hours: 24, minutes: 0 }
    }
}

impl fmt::Display for UpdateInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.hours, self.minutes) {
            (0, m) => write!(f, "{}m", m),
            (h, 0) => write!(f, "{}h", h),
            (h, m) => write!(f, "{}h {}m", h, m),
        }
    }
}

/// Fan-out policy for multi-display configurations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WallpaperMode {
    /// One fetched image applied to every display.
    #[default]
    Same,
    /// An independently fetched image per display.
    Different,
}

impl WallpaperMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Same => "same",
            Self::Different => "different",
        }
    }
}

impl FromStr for WallpaperMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "same" => Ok(Self::Same),
            "different" => Ok(Self::Different),
            other => Err(format!("unknown wallpaper mode: {}", other)),
        }
    }
}

impl fmt::Display for WallpaperMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands sent from client to daemon via IPC.
///
/// Each command represents an action the daemon should perform. Commands are
/// serialized to JSON and sent over a Unix socket.
#[derive(Debug, Serialize, Deserialize)]
pub enum Command {
    /// Fetch a fresh wallpaper and apply it now.
    ///
    /// Dropped (not queued) if an update is already in flight.
    Update,
    /// Persist a new fan-out mode and refresh immediately.
    SetMode { mode: WallpaperMode },
    /// Persist a new background update interval.
    ///
    /// Values are clamped to 30 minutes..=24 hours. Restarts the background
    /// scheduler if it is running.
    SetInterval { hours: u32, minutes: u32 },
    /// Arm the background update scheduler.
    Start,
    /// Cancel the background update scheduler.
    ///
    /// An update already in progress is not aborted.
    Stop,
    /// Query daemon status.
    Query,
    /// List currently connected displays.
    ListDisplays,
    /// List cached wallpaper files, newest first.
    ListCache,
    /// Remove every cached wallpaper file.
    ClearCache,
    /// Ping the daemon.
    Ping,
    /// Kill the daemon.
    Kill,
}

/// Response from daemon to client.
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    /// An update was already in flight; the request was dropped.
    Busy,
    Error(UpdateError),
    Status(DaemonStatus),
    Displays(Vec<DisplayInfo>),
    Cache(Vec<CacheEntrySummary>),
    Pong,
}

/// Daemon status information.
#[derive(Debug, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub uptime_secs: u64,
    /// Whether an update is executing right now.
    pub updating: bool,
    /// Whether the background scheduler is armed.
    pub scheduler_running: bool,
    pub mode: WallpaperMode,
    pub interval: UpdateInterval,
    /// RFC 3339 timestamp of the last successful update, if any.
    pub last_update: Option<String>,
    /// Seconds until the next update is due; zero when overdue.
    pub due_in_secs: Option<u64>,
    /// The error captured by the most recent failed update, if any.
    pub last_error: Option<UpdateError>,
}

/// A connected display target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub name: String,
    pub index: usize,
}

/// One cached wallpaper file, as reported over IPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntrySummary {
    pub path: String,
    /// RFC 3339 timestamp of when the file was downloaded.
    pub created_at: String,
    pub size_bytes: u64,
}

/// IPC socket path helper
pub fn get_socket_path() -> std::path::PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));

    std::path::PathBuf::from(runtime_dir).join("mural.sock")
}
