//! Multi-session orchestration
//!
//! The orchestrator owns every running session: it enforces the global
//! concurrency cap, rejects duplicate trackers for the same user, funnels
//! all session events into one channel, and keeps the success/failure tally
//! and the identifier history. Sessions run as independent tasks; a reaper
//! removes finished ones from the registry.

use crate::capture::{ChunkedCapture, DelegatedCapture};
use crate::config::OrchestratorConfig;
use crate::events::{EventSink, SessionEvent};
use crate::history::IdentifierHistory;
use crate::pipeline::PostProcessor;
use crate::resolver::{DouyinResolver, Platform, Resolver, TikTokResolver};
use crate::session::{
    Session, SessionContext, SessionId, SessionOptions, SessionOutcome, SessionStatus, StopMode,
};
use crate::transcode::{FfmpegGateway, TranscodeError, Transcoder};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("session limit of {0} reached, stop a session first")]
    CapacityExhausted(usize),

    #[error("already tracking {0}")]
    DuplicateSession(String),

    #[error("cannot extract a user or room id from {0:?}")]
    InvalidIdentifier(String),

    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error("http client setup failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// A request to start tracking one user.
#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    /// Raw user input: a handle, an @handle, or a room URL.
    pub input: String,
    pub options: SessionOptions,
}

/// Collaborators a session needs, bundled per platform.
pub struct SessionParts {
    pub resolver: Arc<dyn Resolver>,
    pub capture: Arc<dyn crate::capture::CaptureEngine>,
    pub post: Arc<dyn crate::pipeline::PostProcess>,
}

/// Builds session collaborators. A seam so tests can run sessions without
/// the network or ffmpeg.
pub trait SessionFactory: Send + Sync {
    fn build(
        &self,
        platform: Platform,
        config: &OrchestratorConfig,
    ) -> Result<SessionParts, OrchestratorError>;
}

/// The production factory: real resolvers, real ffmpeg.
pub struct PlatformFactory {
    gateway: Arc<FfmpegGateway>,
}

impl PlatformFactory {
    pub fn new(gateway: Arc<FfmpegGateway>) -> Self {
        Self { gateway }
    }
}

impl SessionFactory for PlatformFactory {
    fn build(
        &self,
        platform: Platform,
        config: &OrchestratorConfig,
    ) -> Result<SessionParts, OrchestratorError> {
        let cookie = config.cookie_for(platform);
        let post = Arc::new(PostProcessor::new(
            self.gateway.clone() as Arc<dyn Transcoder>
        ));
        let parts = match platform {
            Platform::TikTok => SessionParts {
                resolver: Arc::new(TikTokResolver::new(cookie)?),
                capture: Arc::new(DelegatedCapture::new(self.gateway.clone(), config.tuning)),
                post,
            },
            Platform::Douyin => SessionParts {
                resolver: Arc::new(DouyinResolver::new(cookie)?),
                capture: Arc::new(ChunkedCapture::new(
                    "https://live.douyin.com/",
                    cookie,
                    config.tuning,
                )?),
                post,
            },
        };
        Ok(parts)
    }
}

/// Running totals across sessions, keyed by `platform:identifier`.
///
/// A later success clears an earlier failure for the same user; a failure
/// never demotes a recorded success.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub successes: Vec<String>,
    pub failures: Vec<String>,
}

impl Tally {
    fn record(&mut self, platform: Platform, identifier: &str, outcome: &SessionOutcome) {
        let key = format!("{}:{}", platform.as_str(), identifier);
        match outcome {
            SessionOutcome::Success | SessionOutcome::Stopped => {
                self.failures.retain(|k| k != &key);
                if !self.successes.contains(&key) {
                    self.successes.push(key);
                }
            }
            SessionOutcome::Failed(_) => {
                if !self.failures.contains(&key) {
                    self.failures.push(key);
                }
            }
            SessionOutcome::MonitoringStopped | SessionOutcome::Cancelled => {}
        }
    }
}

/// Snapshot of one session for listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub platform: Platform,
    pub identifier: String,
    pub display_name: Option<String>,
    pub status: SessionStatus,
}

struct SessionHandle {
    session: Arc<Session>,
    task: JoinHandle<()>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    factory: Arc<dyn SessionFactory>,
    sessions: Arc<Mutex<HashMap<SessionId, SessionHandle>>>,
    permits: Arc<Semaphore>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    tally: Arc<Mutex<Tally>>,
    history: Mutex<Option<IdentifierHistory>>,
    reaper: JoinHandle<()>,
}

impl Orchestrator {
    /// Orchestrator with the production factory. Fails if an explicitly
    /// configured ffmpeg path does not exist.
    pub fn new(config: OrchestratorConfig) -> Result<Self, OrchestratorError> {
        let gateway = Arc::new(FfmpegGateway::locate(
            config.ffmpeg_path.as_deref(),
            &config.output_dir,
        )?);
        Ok(Self::with_factory(
            config,
            Arc::new(PlatformFactory::new(gateway)),
        ))
    }

    /// Orchestrator with a custom session factory.
    pub fn with_factory(config: OrchestratorConfig, factory: Arc<dyn SessionFactory>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sessions: Arc<Mutex<HashMap<SessionId, SessionHandle>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let history = config
            .history_path
            .as_ref()
            .map(|path| IdentifierHistory::load(path));

        let reaper_sessions = sessions.clone();
        let reaper = tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                reaper_sessions.lock().retain(|_, h| !h.task.is_finished());
            }
        });

        Self {
            permits: Arc::new(Semaphore::new(config.max_active_sessions)),
            config,
            factory,
            sessions,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            tally: Arc::new(Mutex::new(Tally::default())),
            history: Mutex::new(history),
            reaper,
        }
    }

    /// Start tracking a user. Rejects synchronously when the input cannot be
    /// parsed, the user is already tracked, or the session cap is reached.
    pub fn start(&self, request: StartRequest) -> Result<SessionId, OrchestratorError> {
        let platform = Platform::detect(&request.input);
        let identifier = platform
            .extract_identifier(&request.input)
            .ok_or_else(|| OrchestratorError::InvalidIdentifier(request.input.clone()))?;

        // One critical section from the duplicate check to the insert, so
        // two concurrent starts cannot both admit the same identifier.
        let mut sessions = self.sessions.lock();
        let duplicate = sessions.values().any(|h| {
            h.session.platform() == platform
                && h.session.identifier() == identifier
                && !matches!(h.session.status(), SessionStatus::Done(_))
        });
        if duplicate {
            return Err(OrchestratorError::DuplicateSession(identifier));
        }

        let permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| OrchestratorError::CapacityExhausted(self.config.max_active_sessions))?;

        let parts = self.factory.build(platform, &self.config)?;
        let id = Uuid::new_v4();
        let context = SessionContext {
            platform,
            identifier: identifier.clone(),
            output_dir: self.config.output_dir.clone(),
            backoff: self.config.backoff_for(platform),
            tuning: self.config.tuning,
            options: request.options,
        };
        let session = Session::new(
            context,
            parts.resolver,
            parts.capture,
            parts.post,
            EventSink::new(id, self.events_tx.clone()),
        );

        if let Some(history) = self.history.lock().as_mut() {
            history.push(&identifier);
        }

        tracing::info!(
            session = %id,
            platform = platform.as_str(),
            identifier = %identifier,
            "session started"
        );

        let worker = session.clone();
        let tally = self.tally.clone();
        let task = tokio::spawn(async move {
            let outcome = worker.run().await;
            tally
                .lock()
                .record(worker.platform(), worker.identifier(), &outcome);
            drop(permit);
        });
        sessions.insert(id, SessionHandle { session, task });
        Ok(id)
    }

    /// Ask a session to finish gracefully, keeping its capture. No-op for
    /// unknown ids.
    pub fn stop(&self, id: SessionId) -> bool {
        self.terminate(id, StopMode::Stop)
    }

    /// Ask a session to abort, discarding its capture. No-op for unknown ids.
    pub fn cancel(&self, id: SessionId) -> bool {
        self.terminate(id, StopMode::Cancel)
    }

    fn terminate(&self, id: SessionId, mode: StopMode) -> bool {
        let sessions = self.sessions.lock();
        match sessions.get(&id) {
            Some(handle) => {
                handle.session.mark_terminating(mode);
                handle.session.signal().request(mode);
                true
            }
            None => false,
        }
    }

    pub fn status(&self, id: SessionId) -> Option<SessionStatus> {
        self.sessions.lock().get(&id).map(|h| h.session.status())
    }

    /// Snapshot of every registered session.
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .lock()
            .values()
            .map(|h| SessionSnapshot {
                id: h.session.id(),
                platform: h.session.platform(),
                identifier: h.session.identifier().to_string(),
                display_name: h.session.display_name(),
                status: h.session.status(),
            })
            .collect()
    }

    /// Take the event stream. Yields `Some` exactly once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.lock().take()
    }

    pub fn tally(&self) -> Tally {
        self.tally.lock().clone()
    }

    /// Recently tracked identifiers, most recent first.
    pub fn recent_identifiers(&self) -> Vec<String> {
        self.history
            .lock()
            .as_ref()
            .map(|h| h.entries().to_vec())
            .unwrap_or_default()
    }

    /// Stop every session and wait for all worker tasks to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.sessions.lock();
            sessions.drain().map(|(_, h)| h).collect()
        };
        for handle in &handles {
            handle.session.mark_terminating(StopMode::Stop);
            handle.session.signal().stop();
        }
        for handle in handles {
            if let Err(e) = handle.task.await {
                tracing::warn!(error = %e, "session task panicked during shutdown");
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CaptureEnd, CaptureEngine, CaptureError};
    use crate::config::{BackoffConfig, SessionTuning};
    use crate::pipeline::{Artifacts, PipelineError, PostProcess, PostProcessOptions};
    use crate::resolver::{FatalReason, LiveStatus, ResolveError, StreamSource};
    use crate::session::StopSignal;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;

    struct NotLiveResolver;

    #[async_trait]
    impl Resolver for NotLiveResolver {
        async fn resolve_live(&self, _: &str) -> Result<LiveStatus, ResolveError> {
            Ok(LiveStatus::NotLive)
        }
    }

    struct FatalResolver;

    #[async_trait]
    impl Resolver for FatalResolver {
        async fn resolve_live(&self, _: &str) -> Result<LiveStatus, ResolveError> {
            Err(ResolveError::Fatal(FatalReason::NotFound))
        }
    }

    struct OnceLiveResolver;

    #[async_trait]
    impl Resolver for OnceLiveResolver {
        async fn resolve_live(&self, _: &str) -> Result<LiveStatus, ResolveError> {
            Ok(LiveStatus::Live(StreamSource {
                url: "http://cdn/a.flv".into(),
                display_name: None,
            }))
        }
    }

    struct InstantCapture;

    #[async_trait]
    impl CaptureEngine for InstantCapture {
        fn container_ext(&self) -> &'static str {
            "mp4"
        }

        async fn capture(
            &self,
            _url: &str,
            output: &Path,
            _limit: Option<Duration>,
            _signal: &StopSignal,
            _events: &EventSink,
        ) -> Result<CaptureEnd, CaptureError> {
            tokio::fs::write(output, vec![0u8; 4096]).await?;
            Ok(CaptureEnd::DurationReached)
        }
    }

    struct NoopPost;

    #[async_trait]
    impl PostProcess for NoopPost {
        async fn run(
            &self,
            capture: &Path,
            _options: &PostProcessOptions,
            _events: &EventSink,
        ) -> Result<Artifacts, PipelineError> {
            Ok(Artifacts {
                video: capture.to_path_buf(),
                audio: None,
            })
        }
    }

    struct QueueFactory {
        parts: Mutex<VecDeque<SessionParts>>,
    }

    impl QueueFactory {
        fn new(parts: Vec<SessionParts>) -> Arc<Self> {
            Arc::new(Self {
                parts: Mutex::new(parts.into()),
            })
        }
    }

    impl SessionFactory for QueueFactory {
        fn build(
            &self,
            _platform: Platform,
            _config: &OrchestratorConfig,
        ) -> Result<SessionParts, OrchestratorError> {
            Ok(self.parts.lock().pop_front().expect("scripted parts"))
        }
    }

    fn idle_parts() -> SessionParts {
        SessionParts {
            resolver: Arc::new(NotLiveResolver),
            capture: Arc::new(InstantCapture),
            post: Arc::new(NoopPost),
        }
    }

    fn test_config(dir: &tempfile::TempDir, cap: usize) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::new(dir.path());
        config.max_active_sessions = cap;
        config.tuning = SessionTuning {
            countdown_tick: Duration::from_millis(1),
            ..Default::default()
        };
        let backoff = BackoffConfig {
            initial: Duration::from_millis(50),
            max: Duration::from_millis(200),
        };
        config.tiktok_backoff = backoff;
        config.douyin_backoff = backoff;
        config
    }

    fn request(input: &str) -> StartRequest {
        StartRequest {
            input: input.into(),
            options: SessionOptions::default(),
        }
    }

    #[tokio::test]
    async fn capacity_is_enforced_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let factory = QueueFactory::new(vec![idle_parts(), idle_parts(), idle_parts()]);
        let orchestrator = Orchestrator::with_factory(test_config(&dir, 2), factory);

        let first = orchestrator.start(request("alice")).unwrap();
        orchestrator.start(request("bob")).unwrap();
        let err = orchestrator.start(request("carol")).unwrap_err();
        assert!(matches!(err, OrchestratorError::CapacityExhausted(2)));

        orchestrator.cancel(first);
        // The permit frees once the cancelled session's task finishes.
        let mut started = false;
        for _ in 0..200 {
            if orchestrator.start(request("carol")).is_ok() {
                started = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(started);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_identifiers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let factory = QueueFactory::new(vec![idle_parts(), idle_parts()]);
        let orchestrator = Orchestrator::with_factory(test_config(&dir, 5), factory);

        orchestrator.start(request("@alice")).unwrap();
        let err = orchestrator.start(request("alice")).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateSession(id) if id == "alice"));

        // A different user is fine.
        orchestrator.start(request("@bob")).unwrap();
        orchestrator.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_admit_the_same_identifier_once() {
        let dir = tempfile::tempdir().unwrap();
        let factory = QueueFactory::new(vec![idle_parts(), idle_parts()]);
        let orchestrator = Arc::new(Orchestrator::with_factory(test_config(&dir, 5), factory));

        let mut attempts = Vec::new();
        for _ in 0..2 {
            let orchestrator = orchestrator.clone();
            attempts.push(tokio::spawn(async move { orchestrator.start(request("alice")) }));
        }

        let mut admitted = 0;
        let mut duplicates = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(OrchestratorError::DuplicateSession(_)) => duplicates += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((admitted, duplicates), (1, 1));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn unparseable_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator =
            Orchestrator::with_factory(test_config(&dir, 5), QueueFactory::new(vec![]));
        let err = orchestrator.start(request("not a handle!")).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn stop_and_cancel_unknown_sessions_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator =
            Orchestrator::with_factory(test_config(&dir, 5), QueueFactory::new(vec![]));
        assert!(!orchestrator.stop(Uuid::new_v4()));
        assert!(!orchestrator.cancel(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn tally_promotes_failures_to_successes() {
        let dir = tempfile::tempdir().unwrap();
        let failing = SessionParts {
            resolver: Arc::new(FatalResolver),
            capture: Arc::new(InstantCapture),
            post: Arc::new(NoopPost),
        };
        let succeeding = SessionParts {
            resolver: Arc::new(OnceLiveResolver),
            capture: Arc::new(InstantCapture),
            post: Arc::new(NoopPost),
        };
        let factory = QueueFactory::new(vec![failing, succeeding]);
        let orchestrator = Orchestrator::with_factory(test_config(&dir, 5), factory);

        orchestrator.start(request("alice")).unwrap();
        for _ in 0..200 {
            if !orchestrator.tally().failures.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(orchestrator.tally().failures, ["tiktok:alice"]);

        orchestrator.start(request("alice")).unwrap();
        for _ in 0..200 {
            if !orchestrator.tally().successes.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let tally = orchestrator.tally();
        assert_eq!(tally.successes, ["tiktok:alice"]);
        assert!(tally.failures.is_empty());
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn history_tracks_started_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&dir, 5);
        config.history_path = Some(dir.path().join("history.json"));
        let factory = QueueFactory::new(vec![idle_parts(), idle_parts()]);
        let orchestrator = Orchestrator::with_factory(config, factory);

        orchestrator.start(request("alice")).unwrap();
        orchestrator
            .start(request("https://live.douyin.com/745964462470"))
            .unwrap();
        assert_eq!(
            orchestrator.recent_identifiers(),
            ["745964462470", "alice"]
        );
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn terminal_events_arrive_on_the_shared_channel() {
        let dir = tempfile::tempdir().unwrap();
        let succeeding = SessionParts {
            resolver: Arc::new(OnceLiveResolver),
            capture: Arc::new(InstantCapture),
            post: Arc::new(NoopPost),
        };
        let factory = QueueFactory::new(vec![succeeding]);
        let orchestrator = Orchestrator::with_factory(test_config(&dir, 5), factory);
        let mut events = orchestrator.take_events().unwrap();
        assert!(orchestrator.take_events().is_none());

        let id = orchestrator.start(request("alice")).unwrap();
        let outcome = loop {
            match events.recv().await.expect("channel open") {
                SessionEvent::Terminal { session, outcome } => {
                    assert_eq!(session, id);
                    break outcome;
                }
                _ => continue,
            }
        };
        assert_eq!(outcome, SessionOutcome::Success);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_check_ignores_finished_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let succeeding = SessionParts {
            resolver: Arc::new(OnceLiveResolver),
            capture: Arc::new(InstantCapture),
            post: Arc::new(NoopPost),
        };
        let factory = QueueFactory::new(vec![succeeding, idle_parts()]);
        let orchestrator = Orchestrator::with_factory(test_config(&dir, 5), factory);

        let id = orchestrator.start(request("alice")).unwrap();
        for _ in 0..200 {
            match orchestrator.status(id) {
                Some(SessionStatus::Done(_)) | None => break,
                _ => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        }
        orchestrator.start(request("alice")).unwrap();
        orchestrator.shutdown().await;
    }
}
