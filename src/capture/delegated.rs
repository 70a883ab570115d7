//! Capture delegated to an ffmpeg process
//!
//! ffmpeg pulls the stream and writes MP4 directly; this engine only
//! supervises the process. A stop request sends ffmpeg its quit key so the
//! container is finalized, a cancel kills it outright since the file is
//! about to be deleted anyway.

use super::{progress_line, CaptureEnd, CaptureEngine, CaptureError};
use crate::config::SessionTuning;
use crate::events::EventSink;
use crate::session::{StopMode, StopSignal};
use crate::transcode::FfmpegGateway;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct DelegatedCapture {
    gateway: Arc<FfmpegGateway>,
    tuning: SessionTuning,
}

impl DelegatedCapture {
    pub fn new(gateway: Arc<FfmpegGateway>, tuning: SessionTuning) -> Self {
        Self { gateway, tuning }
    }
}

#[async_trait]
impl CaptureEngine for DelegatedCapture {
    fn container_ext(&self) -> &'static str {
        "mp4"
    }

    async fn capture(
        &self,
        url: &str,
        output: &Path,
        limit: Option<Duration>,
        signal: &StopSignal,
        events: &EventSink,
    ) -> Result<CaptureEnd, CaptureError> {
        let mut process = self.gateway.spawn_capture(url, output)?;
        let started = Instant::now();
        let mut last_report = Instant::now();

        loop {
            if let Some(status) = process.try_wait()? {
                tracing::info!(%status, "capture process exited, stream ended");
                return Ok(CaptureEnd::StreamEnded);
            }

            if signal.is_fired() {
                match signal.mode() {
                    Some(StopMode::Cancel) => process.kill().await?,
                    _ => process.stop_graceful(self.tuning.stop_grace).await?,
                }
                return Ok(CaptureEnd::Interrupted);
            }

            if let Some(limit) = limit {
                if started.elapsed() >= limit {
                    tracing::info!(?limit, "duration limit reached, finalizing capture");
                    process.stop_graceful(self.tuning.stop_grace).await?;
                    return Ok(CaptureEnd::DurationReached);
                }
            }

            if last_report.elapsed() >= self.tuning.progress_interval {
                if let Ok(meta) = tokio::fs::metadata(output).await {
                    events.progress(progress_line(meta.len()));
                }
                last_report = Instant::now();
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tuning.countdown_tick) => {}
                _ = signal.fired() => {}
            }
        }
    }
}
