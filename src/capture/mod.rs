//! Stream capture engines
//!
//! Two ways of getting a live stream onto disk: delegating the pull to an
//! ffmpeg process (TikTok, writes MP4 directly) and chunked HTTP reads into
//! an FLV file (Douyin, remuxed to MP4 afterwards). Both honor the session's
//! stop signal and an optional wall-clock duration limit, and both report
//! file growth through the event sink.

pub mod chunked;
pub mod delegated;

pub use chunked::ChunkedCapture;
pub use delegated::DelegatedCapture;

use crate::events::EventSink;
use crate::session::StopSignal;
use crate::transcode::TranscodeError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

/// Why a capture finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEnd {
    /// The broadcaster ended the stream (or the connection closed).
    StreamEnded,
    /// The session's stop signal fired.
    Interrupted,
    /// The configured duration limit was reached.
    DurationReached,
}

/// Pulls one live stream to a local file.
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    /// Extension of the container this engine writes (`mp4` or `flv`).
    fn container_ext(&self) -> &'static str;

    /// Capture `url` into `output` until the stream ends, the stop signal
    /// fires, or `limit` elapses. On success the file exists and is closed;
    /// the caller decides whether it is large enough to keep.
    async fn capture(
        &self,
        url: &str,
        output: &Path,
        limit: Option<Duration>,
        signal: &StopSignal,
        events: &EventSink,
    ) -> Result<CaptureEnd, CaptureError>;
}

/// Progress line for a growing capture file.
pub(crate) fn progress_line(bytes: u64) -> String {
    format!("[DOWNLOAD] {:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}
