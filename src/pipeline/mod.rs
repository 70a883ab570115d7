//! Post-capture processing pipeline
//!
//! Runs after every successful capture: an FLV capture is first remuxed to
//! MP4, then the session's options select one of four branches (keep as-is,
//! extract MP3, strip the audio track, or both). Only the remux is fatal;
//! a failed MP3 extraction or mute is logged and the video is kept.

use crate::events::EventSink;
use crate::transcode::{TranscodeError, Transcoder};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// MP3 extraction flavor.
///
/// The enhanced profiles apply the tempo/pitch adjustment chains some users
/// run to dodge audio fingerprinting on re-upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioProfile {
    #[default]
    Standard,
    Enhanced1,
    Enhanced2,
}

impl AudioProfile {
    fn ffmpeg_args(self) -> Vec<String> {
        let mut args: Vec<String> = ["-vn", "-acodec", "mp3", "-ab", "128k"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        match self {
            AudioProfile::Standard => {}
            AudioProfile::Enhanced1 => args.extend(
                [
                    "-ar",
                    "44100",
                    "-af",
                    "atempo=0.92,asetrate=44100*1.2,aresample=44100",
                ]
                .iter()
                .map(|s| s.to_string()),
            ),
            AudioProfile::Enhanced2 => args.extend(
                [
                    "-ar",
                    "48000",
                    "-af",
                    "atempo=0.93,asetrate=48000*1.3,aresample=48000",
                ]
                .iter()
                .map(|s| s.to_string()),
            ),
        }
        args
    }
}

/// What to do with a finished capture.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostProcessOptions {
    /// Extract an MP3 alongside (or instead of the audio track in) the video.
    pub convert_audio: bool,
    /// Extraction flavor, relevant only when `convert_audio` is set.
    pub profile: AudioProfile,
    /// Remove the audio track from the kept video.
    pub mute_video: bool,
}

/// Files left on disk after the pipeline finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub video: PathBuf,
    pub audio: Option<PathBuf>,
}

/// The only fatal pipeline failure. Every other step degrades: it is logged,
/// reported through the event sink, and the best surviving files become the
/// artifacts.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The FLV capture could not be remuxed; the raw file is preserved.
    #[error("remux failed: {0}")]
    Remux(TranscodeError),
}

/// Seam for the session loop; the real implementation drives ffmpeg.
#[async_trait]
pub trait PostProcess: Send + Sync {
    async fn run(
        &self,
        capture: &Path,
        options: &PostProcessOptions,
        events: &EventSink,
    ) -> Result<Artifacts, PipelineError>;
}

pub struct PostProcessor {
    transcoder: Arc<dyn Transcoder>,
}

impl PostProcessor {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self { transcoder }
    }

    /// Remux an FLV capture to MP4 and delete the FLV. Failure keeps the FLV
    /// on disk for manual recovery and aborts the pipeline.
    async fn remux(&self, capture: &Path, events: &EventSink) -> Result<PathBuf, PipelineError> {
        let mp4 = capture.with_extension("mp4");
        events.progress("Converting FLV to MP4...");
        self.transcoder
            .invoke(Some(capture), &mp4, &["-c".into(), "copy".into()])
            .await
            .map_err(PipelineError::Remux)?;
        if let Err(e) = tokio::fs::remove_file(capture).await {
            tracing::warn!(path = %capture.display(), error = %e, "could not delete raw capture after remux");
        }
        Ok(mp4)
    }

    async fn extract_mp3(&self, video: &Path, options: &PostProcessOptions, events: &EventSink) -> Option<PathBuf> {
        let mp3 = video.with_extension("mp3");
        events.progress("Extracting MP3 audio...");
        match self
            .transcoder
            .invoke(Some(video), &mp3, &options.profile.ffmpeg_args())
            .await
        {
            Ok(()) => Some(mp3),
            Err(e) => {
                tracing::warn!(error = %e, "mp3 extraction failed, keeping video only");
                events.progress(format!("MP3 extraction failed: {e}"));
                None
            }
        }
    }

    async fn mute_into(&self, video: &Path, output: &Path) -> Result<(), TranscodeError> {
        self.transcoder
            .invoke(
                Some(video),
                output,
                &["-c:v".into(), "copy".into(), "-map".into(), "0:v".into()],
            )
            .await
    }
}

#[async_trait]
impl PostProcess for PostProcessor {
    async fn run(
        &self,
        capture: &Path,
        options: &PostProcessOptions,
        events: &EventSink,
    ) -> Result<Artifacts, PipelineError> {
        let video = if capture.extension().and_then(|e| e.to_str()) == Some("flv") {
            self.remux(capture, events).await?
        } else {
            capture.to_path_buf()
        };

        match (options.convert_audio, options.mute_video) {
            (false, false) => Ok(Artifacts { video, audio: None }),

            (true, false) => {
                let audio = self.extract_mp3(&video, options, events).await;
                Ok(Artifacts { video, audio })
            }

            (false, true) => {
                // Replace the original in place via a temp file so a failed
                // mute never leaves the user with no video at all.
                events.progress("Removing audio track...");
                let stem = video.file_stem().and_then(|s| s.to_str()).unwrap_or("capture");
                let temp = video.with_file_name(format!("{stem}_muted_temp.mp4"));
                match self.mute_into(&video, &temp).await {
                    Ok(()) => {
                        // Rename replaces the destination, so the original
                        // only disappears once the muted file has fully taken
                        // its place.
                        if let Err(e) = tokio::fs::rename(&temp, &video).await {
                            tracing::warn!(error = %e, "could not swap in muted file, keeping original");
                            events.progress(format!("Audio removal failed: {e}"));
                            let _ = tokio::fs::remove_file(&temp).await;
                        }
                        Ok(Artifacts { video, audio: None })
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "mute failed, keeping original video");
                        events.progress(format!("Audio removal failed: {e}"));
                        let _ = tokio::fs::remove_file(&temp).await;
                        Ok(Artifacts { video, audio: None })
                    }
                }
            }

            (true, true) => {
                // MP3 must come from the original, before its audio is gone.
                let audio = self.extract_mp3(&video, options, events).await;
                events.progress("Removing audio track...");
                let stem = video.file_stem().and_then(|s| s.to_str()).unwrap_or("capture");
                let muted = video.with_file_name(format!("{stem}_muted.mp4"));
                match self.mute_into(&video, &muted).await {
                    Ok(()) => {
                        if let Err(e) = tokio::fs::remove_file(&video).await {
                            tracing::warn!(error = %e, "could not delete original after muting");
                            events.progress(format!("Could not delete original: {e}"));
                        }
                        Ok(Artifacts { video: muted, audio })
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "mute failed, keeping original video");
                        events.progress(format!("Audio removal failed: {e}"));
                        let _ = tokio::fs::remove_file(&muted).await;
                        Ok(Artifacts { video, audio })
                    }
                }
            }
        }
    }
}
