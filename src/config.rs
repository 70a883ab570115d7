//! Runtime configuration
//!
//! Knobs for the orchestrator, the per-platform monitoring backoff, and the
//! timing constants shared by the capture engines and session loop.

use crate::resolver::Platform;
use std::path::PathBuf;
use std::time::Duration;

/// Exponential backoff bounds for the monitoring loop.
///
/// The wait starts at `initial`, doubles after each consecutive not-live
/// poll, and is clamped to `max`. Any live detection resets it to `initial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffConfig {
    /// Default bounds for TikTok monitoring (3 min up to 30 min).
    pub fn tiktok() -> Self {
        Self {
            initial: Duration::from_secs(180),
            max: Duration::from_secs(1800),
        }
    }

    /// Default bounds for Douyin monitoring (1 min up to 16 min).
    pub fn douyin() -> Self {
        Self {
            initial: Duration::from_secs(60),
            max: Duration::from_secs(960),
        }
    }

    /// Default bounds for a platform.
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::TikTok => Self::tiktok(),
            Platform::Douyin => Self::douyin(),
        }
    }
}

/// Timing constants shared by the session loop and capture engines.
#[derive(Debug, Clone, Copy)]
pub struct SessionTuning {
    /// Interval between cancellation checks while waiting or polling an
    /// external process. Also the cadence of countdown status updates.
    pub countdown_tick: Duration,
    /// Minimum interval between capture progress events.
    pub progress_interval: Duration,
    /// Grace period between asking the transcoder to finish and killing it.
    pub stop_grace: Duration,
    /// Captures at or below this size are treated as corrupt/empty.
    pub min_capture_bytes: u64,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            countdown_tick: Duration::from_secs(1),
            progress_interval: Duration::from_secs(10),
            stop_grace: Duration::from_secs(10),
            min_capture_bytes: 1024,
        }
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Root directory for per-user capture output.
    pub output_dir: PathBuf,
    /// Global cap on sessions simultaneously monitoring or recording.
    pub max_active_sessions: usize,
    /// Cookie string sent with TikTok requests, if available.
    pub tiktok_cookie: Option<String>,
    /// Cookie string sent with Douyin requests, if available.
    pub douyin_cookie: Option<String>,
    /// Explicit path to the ffmpeg binary. When unset, a `ffmpeg/`
    /// subdirectory of `output_dir`'s parent and then PATH are searched.
    pub ffmpeg_path: Option<PathBuf>,
    /// Backoff bounds for TikTok sessions.
    pub tiktok_backoff: BackoffConfig,
    /// Backoff bounds for Douyin sessions.
    pub douyin_backoff: BackoffConfig,
    /// Shared timing constants.
    pub tuning: SessionTuning,
    /// Where the identifier history list is persisted. `None` disables it.
    pub history_path: Option<PathBuf>,
}

impl OrchestratorConfig {
    /// Configuration with defaults for everything except the output root.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            max_active_sessions: 5,
            tiktok_cookie: None,
            douyin_cookie: None,
            ffmpeg_path: None,
            tiktok_backoff: BackoffConfig::tiktok(),
            douyin_backoff: BackoffConfig::douyin(),
            tuning: SessionTuning::default(),
            history_path: None,
        }
    }

    /// Backoff bounds for a platform, honoring per-platform overrides.
    pub fn backoff_for(&self, platform: Platform) -> BackoffConfig {
        match platform {
            Platform::TikTok => self.tiktok_backoff,
            Platform::Douyin => self.douyin_backoff,
        }
    }

    /// Cookie string configured for a platform.
    pub fn cookie_for(&self, platform: Platform) -> Option<&str> {
        match platform {
            Platform::TikTok => self.tiktok_cookie.as_deref(),
            Platform::Douyin => self.douyin_cookie.as_deref(),
        }
    }
}
