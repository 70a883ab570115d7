//! Per-user recording session
//!
//! A session owns the full lifecycle for one tracked user: poll until live
//! with exponential backoff, capture the stream to disk, post-process, and
//! either finish or fall back to monitoring when the broadcast ends. It runs
//! as a single task and is controlled from outside only through its
//! [`StopSignal`].

pub mod backoff;
pub mod signal;

pub use backoff::Backoff;
pub use signal::{StopMode, StopSignal};

use crate::capture::{CaptureEnd, CaptureEngine};
use crate::config::{BackoffConfig, SessionTuning};
use crate::events::{EventSink, Severity};
use crate::pipeline::PostProcess;
use crate::resolver::{Platform, Resolver, StreamSource};
use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub type SessionId = Uuid;

/// Terminal result of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionOutcome {
    /// A capture completed and its artifacts are on disk.
    Success,
    /// The user stopped the session during recording; artifacts kept.
    Stopped,
    /// The user stopped the session before anything was captured.
    MonitoringStopped,
    /// The user cancelled; any partial capture was deleted.
    Cancelled,
    /// The session failed; the message says why.
    Failed(String),
}

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "outcome")]
pub enum SessionStatus {
    Idle,
    Monitoring,
    Recording,
    Stopping,
    Cancelling,
    Done(SessionOutcome),
}

/// Per-session settings chosen at start time.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Stop the capture after this much wall-clock recording time.
    pub duration_limit: Option<Duration>,
    /// Base file name override; generated from user and timestamp when unset.
    pub custom_filename: Option<String>,
    /// Post-processing branch selection.
    pub post: crate::pipeline::PostProcessOptions,
}

/// Strip characters that are invalid in file names on any supported OS.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect()
}

fn capture_base_name(platform: Platform, identifier: &str, now: DateTime<Local>) -> String {
    format!(
        "{}_{}_{}",
        platform.file_prefix(),
        sanitize_filename(identifier),
        now.format("%Y%m%d_%H%M%S")
    )
}

/// Static inputs a session needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub platform: Platform,
    pub identifier: String,
    pub output_dir: PathBuf,
    pub backoff: BackoffConfig,
    pub tuning: SessionTuning,
    pub options: SessionOptions,
}

enum CycleEnd {
    /// The session is finished.
    Finished(SessionOutcome),
    /// The broadcast ended on its own; go back to monitoring.
    Resume,
}

pub struct Session {
    id: SessionId,
    context: SessionContext,
    display_name: RwLock<Option<String>>,
    status: RwLock<SessionStatus>,
    signal: StopSignal,
    resolver: Arc<dyn Resolver>,
    capture: Arc<dyn CaptureEngine>,
    post: Arc<dyn PostProcess>,
    events: EventSink,
}

impl Session {
    pub fn new(
        context: SessionContext,
        resolver: Arc<dyn Resolver>,
        capture: Arc<dyn CaptureEngine>,
        post: Arc<dyn PostProcess>,
        events: EventSink,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: events.session(),
            context,
            display_name: RwLock::new(None),
            status: RwLock::new(SessionStatus::Idle),
            signal: StopSignal::new(),
            resolver,
            capture,
            post,
            events,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn platform(&self) -> Platform {
        self.context.platform
    }

    pub fn identifier(&self) -> &str {
        &self.context.identifier
    }

    /// The platform-reported display name, once a live poll has seen one.
    pub fn display_name(&self) -> Option<String> {
        self.display_name.read().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    pub fn signal(&self) -> &StopSignal {
        &self.signal
    }

    /// Mark the session as tearing down. The worker task observes the signal
    /// itself; this only makes the transition visible immediately.
    pub fn mark_terminating(&self, mode: StopMode) {
        let mut status = self.status.write();
        if !matches!(*status, SessionStatus::Done(_)) {
            *status = match mode {
                StopMode::Stop => SessionStatus::Stopping,
                StopMode::Cancel => SessionStatus::Cancelling,
            };
        }
    }

    fn label(&self) -> String {
        self.display_name
            .read()
            .clone()
            .unwrap_or_else(|| self.context.identifier.clone())
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.write() = status;
    }

    fn outcome_for_signal(&self) -> SessionOutcome {
        match self.signal.mode() {
            Some(StopMode::Cancel) => SessionOutcome::Cancelled,
            _ => SessionOutcome::MonitoringStopped,
        }
    }

    /// Drive the session to completion. Emits the terminal event exactly
    /// once and leaves the status at `Done`.
    pub async fn run(&self) -> SessionOutcome {
        let outcome = self.run_inner().await;
        tracing::info!(
            session = %self.id,
            platform = self.context.platform.as_str(),
            identifier = %self.context.identifier,
            ?outcome,
            "session finished"
        );
        self.set_status(SessionStatus::Done(outcome.clone()));
        self.events.terminal(outcome.clone());
        outcome
    }

    async fn run_inner(&self) -> SessionOutcome {
        let mut backoff = Backoff::new(self.context.backoff);
        let mut consecutive_errors: u32 = 0;

        loop {
            if self.signal.is_fired() {
                return self.outcome_for_signal();
            }

            self.set_status(SessionStatus::Monitoring);
            self.events.status(
                format!("Checking if {} is live...", self.label()),
                Severity::Info,
            );

            match self.resolver.resolve_live(&self.context.identifier).await {
                Ok(crate::resolver::LiveStatus::Live(source)) => {
                    consecutive_errors = 0;
                    backoff.reset();
                    if let Some(name) = source.display_name.clone() {
                        let mut slot = self.display_name.write();
                        if slot.is_none() {
                            *slot = Some(name);
                        }
                    }
                    match self.record(source).await {
                        CycleEnd::Finished(outcome) => return outcome,
                        CycleEnd::Resume => continue,
                    }
                }
                Ok(crate::resolver::LiveStatus::NotLive) => {
                    consecutive_errors = 0;
                }
                Err(e) if e.is_fatal() => {
                    self.events
                        .status(format!("{} - {e}", self.label()), Severity::Error);
                    return SessionOutcome::Failed(e.to_string());
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        session = %self.id,
                        consecutive_errors,
                        error = %e,
                        "live check failed, will retry"
                    );
                    self.events.status(
                        format!("Check failed ({e}), retrying..."),
                        Severity::Warn,
                    );
                }
            }

            if !self.countdown_wait(backoff.current()).await {
                return self.outcome_for_signal();
            }
            backoff.advance();
        }
    }

    /// Wait out one backoff interval, ticking a countdown status line. Returns
    /// `false` when the stop signal fired mid-wait.
    async fn countdown_wait(&self, total: Duration) -> bool {
        let label = self.label();
        let mut remaining = total;
        while !remaining.is_zero() {
            let step = remaining.min(self.context.tuning.countdown_tick);
            tokio::select! {
                _ = self.signal.fired() => return false,
                _ = tokio::time::sleep(step) => {}
            }
            remaining = remaining.saturating_sub(step);
            self.events.countdown(
                format!(
                    "{} is offline. Next check in {}s",
                    label,
                    remaining.as_secs()
                ),
                Severity::Info,
            );
        }
        true
    }

    /// One live-to-offline capture cycle, post-processing included.
    async fn record(&self, source: StreamSource) -> CycleEnd {
        self.set_status(SessionStatus::Recording);
        self.events
            .status(format!("Recording {}...", self.label()), Severity::Active);

        let dir = self
            .context
            .output_dir
            .join(sanitize_filename(&self.context.identifier));
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            return CycleEnd::Finished(SessionOutcome::Failed(format!(
                "cannot create output directory: {e}"
            )));
        }

        let base = match &self.context.options.custom_filename {
            Some(name) => sanitize_filename(name),
            None => capture_base_name(
                self.context.platform,
                &self.context.identifier,
                Local::now(),
            ),
        };
        let path = dir.join(format!("{base}.{}", self.capture.container_ext()));
        self.events.progress(format!("Output file: {}", path.display()));

        let end = match self
            .capture
            .capture(
                &source.url,
                &path,
                self.context.options.duration_limit,
                &self.signal,
                &self.events,
            )
            .await
        {
            Ok(end) => end,
            Err(e) => {
                // The partial file stays on disk for manual inspection.
                self.events
                    .status(format!("Capture failed: {e}"), Severity::Error);
                return CycleEnd::Finished(SessionOutcome::Failed(format!("capture failed: {e}")));
            }
        };

        if self.signal.mode() == Some(StopMode::Cancel) {
            self.set_status(SessionStatus::Cancelling);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "could not delete cancelled capture");
            }
            return CycleEnd::Finished(SessionOutcome::Cancelled);
        }

        let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if size <= self.context.tuning.min_capture_bytes {
            if self.signal.mode() == Some(StopMode::Stop) {
                // Stopped before anything usable landed.
                let _ = tokio::fs::remove_file(&path).await;
                return CycleEnd::Finished(SessionOutcome::MonitoringStopped);
            }
            return CycleEnd::Finished(SessionOutcome::Failed(format!(
                "capture file is only {size} bytes, likely corrupt"
            )));
        }

        if self.signal.is_fired() {
            self.set_status(SessionStatus::Stopping);
        }

        let artifacts = match self
            .post
            .run(&path, &self.context.options.post, &self.events)
            .await
        {
            Ok(artifacts) => artifacts,
            Err(e) => {
                return CycleEnd::Finished(SessionOutcome::Failed(format!(
                    "post-processing failed: {e}"
                )))
            }
        };
        self.events
            .progress(format!("Saved: {}", artifacts.video.display()));
        if let Some(audio) = &artifacts.audio {
            self.events.progress(format!("Saved: {}", audio.display()));
        }

        match end {
            CaptureEnd::Interrupted => CycleEnd::Finished(SessionOutcome::Stopped),
            CaptureEnd::DurationReached => CycleEnd::Finished(SessionOutcome::Success),
            CaptureEnd::StreamEnded => {
                // A stop that raced the natural end still keeps the file, so
                // report it as a stop rather than looping back.
                if self.signal.is_fired() {
                    return CycleEnd::Finished(SessionOutcome::Stopped);
                }
                self.events.status(
                    format!("{} went offline, resuming monitoring", self.label()),
                    Severity::Info,
                );
                CycleEnd::Resume
            }
        }
    }
}
