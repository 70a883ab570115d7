//! Direct chunked HTTP capture
//!
//! Reads the FLV stream over HTTP and appends each chunk to the output file.
//! Used for Douyin, whose CDN serves plain FLV that ffmpeg remuxes to MP4
//! after the capture ends. A read error after bytes have already landed is
//! treated as the stream ending rather than a capture failure, since live
//! CDNs routinely drop the connection when the broadcast stops.

use super::{progress_line, CaptureEnd, CaptureEngine, CaptureError};
use crate::config::SessionTuning;
use crate::events::EventSink;
use crate::http::streaming_client;
use crate::session::StopSignal;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

pub struct ChunkedCapture {
    client: reqwest::Client,
    tuning: SessionTuning,
}

impl ChunkedCapture {
    pub fn new(
        referer: &str,
        cookie: Option<&str>,
        tuning: SessionTuning,
    ) -> Result<Self, reqwest::Error> {
        let client = streaming_client(referer, cookie)?;
        Ok(Self { client, tuning })
    }
}

#[async_trait]
impl CaptureEngine for ChunkedCapture {
    fn container_ext(&self) -> &'static str {
        "flv"
    }

    async fn capture(
        &self,
        url: &str,
        output: &Path,
        limit: Option<Duration>,
        signal: &StopSignal,
        events: &EventSink,
    ) -> Result<CaptureEnd, CaptureError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(output).await?;
        let mut written: u64 = 0;
        let deadline = limit.map(|limit| Instant::now() + limit);
        let mut last_report = Instant::now();

        let end = loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::info!(?limit, "duration limit reached, closing capture");
                break CaptureEnd::DurationReached;
            }

            if last_report.elapsed() >= self.tuning.progress_interval {
                events.progress(progress_line(written));
                last_report = Instant::now();
            }

            // The tick arm keeps the deadline checked while a stalled
            // connection delivers no chunks.
            let chunk = tokio::select! {
                _ = signal.fired() => break CaptureEnd::Interrupted,
                _ = tokio::time::sleep(self.tuning.countdown_tick) => continue,
                chunk = stream.next() => chunk,
            };

            match chunk {
                None => break CaptureEnd::StreamEnded,
                Some(Ok(bytes)) => {
                    file.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                }
                Some(Err(e)) if written > 0 => {
                    tracing::warn!(error = %e, "stream read failed mid-capture, treating as end");
                    break CaptureEnd::StreamEnded;
                }
                Some(Err(e)) => return Err(e.into()),
            }
        };

        file.flush().await?;
        Ok(end)
    }
}
