//! FFmpeg gateway
//!
//! All media work is delegated to an external `ffmpeg` binary: stream
//! capture, the FLV to MP4 remux, MP3 extraction, and audio-track removal.
//! The gateway locates the binary once and exposes two shapes of call:
//! a run-to-completion transcode and a long-lived capture process that the
//! session polls and stops.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("ffmpeg binary not found; install ffmpeg or set an explicit path")]
    BinaryNotFound,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ffmpeg failed: {0}")]
    Failed(String),
}

/// One ffmpeg invocation that runs to completion.
///
/// `input` becomes `-i <path>` when present; `extra_args` land between the
/// input and the output path. The seam exists so the post-processing
/// pipeline can be tested without spawning processes.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn invoke(
        &self,
        input: Option<&Path>,
        output: &Path,
        extra_args: &[String],
    ) -> Result<(), TranscodeError>;
}

/// Handle on the real ffmpeg binary.
#[derive(Debug)]
pub struct FfmpegGateway {
    binary: PathBuf,
}

impl FfmpegGateway {
    /// Locate ffmpeg: an explicit path wins, then an `ffmpeg/` directory
    /// under `root`, then whatever `ffmpeg` resolves to on PATH.
    pub fn locate(explicit: Option<&Path>, root: &Path) -> Result<Self, TranscodeError> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(Self {
                    binary: path.to_path_buf(),
                });
            }
            tracing::warn!(path = %path.display(), "configured ffmpeg path does not exist");
            return Err(TranscodeError::BinaryNotFound);
        }

        let name = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };
        let bundled = root.join("ffmpeg").join(name);
        if bundled.is_file() {
            tracing::debug!(path = %bundled.display(), "using bundled ffmpeg");
            return Ok(Self { binary: bundled });
        }

        // Fall through to PATH resolution at spawn time.
        Ok(Self {
            binary: PathBuf::from("ffmpeg"),
        })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Spawn a capture: ffmpeg pulls `url` and writes `output` until the
    /// stream ends or the process is stopped via [`CaptureProcess`].
    pub fn spawn_capture(&self, url: &str, output: &Path) -> Result<CaptureProcess, TranscodeError> {
        let child = Command::new(&self.binary)
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(url)
            .arg("-c")
            .arg("copy")
            .arg("-bsf:a")
            .arg("aac_adtstoasc")
            .arg("-y")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TranscodeError::BinaryNotFound,
                _ => TranscodeError::Io(e),
            })?;
        tracing::debug!(output = %output.display(), "capture process started");
        Ok(CaptureProcess { child })
    }
}

#[async_trait]
impl Transcoder for FfmpegGateway {
    async fn invoke(
        &self,
        input: Option<&Path>,
        output: &Path,
        extra_args: &[String],
    ) -> Result<(), TranscodeError> {
        let mut command = Command::new(&self.binary);
        command.arg("-loglevel").arg("error");
        if let Some(input) = input {
            command.arg("-i").arg(input);
        }
        command.args(extra_args);
        command.arg("-y").arg(output);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let result = command.output().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TranscodeError::BinaryNotFound,
            _ => TranscodeError::Io(e),
        })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let line = stderr.lines().last().unwrap_or("unknown error").to_string();
            return Err(TranscodeError::Failed(line));
        }
        Ok(())
    }
}

/// A running ffmpeg capture.
pub struct CaptureProcess {
    child: Child,
}

impl CaptureProcess {
    /// Whether the process has exited on its own (stream ended).
    pub fn try_wait(&mut self) -> Result<Option<std::process::ExitStatus>, TranscodeError> {
        Ok(self.child.try_wait()?)
    }

    /// Ask ffmpeg to finalize the output and exit, then wait up to `grace`
    /// before killing it. The quit keypress lets ffmpeg write the trailer so
    /// the file stays playable.
    pub async fn stop_graceful(mut self, grace: Duration) -> Result<(), TranscodeError> {
        if let Some(mut stdin) = self.child.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.flush().await;
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                status?;
            }
            Err(_) => {
                tracing::warn!("capture process ignored quit, killing it");
                self.child.start_kill()?;
                self.child.wait().await?;
            }
        }
        Ok(())
    }

    /// Kill immediately without letting ffmpeg finalize the file.
    pub async fn kill(mut self) -> Result<(), TranscodeError> {
        self.child.start_kill()?;
        self.child.wait().await?;
        Ok(())
    }
}
