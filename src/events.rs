//! Session event delivery
//!
//! Events flow from session worker tasks to a single consumer (typically a
//! UI thread) over an unbounded channel. The crate guarantees per-session
//! ordering only; events from different sessions interleave arbitrarily.

use crate::session::{SessionId, SessionOutcome};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// How a status message should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine state information (monitoring, waiting).
    Info,
    /// The session is actively recording.
    Active,
    /// Recoverable problem; the session keeps going.
    Warn,
    /// Terminal problem.
    Error,
}

/// An event emitted by a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SessionEvent {
    /// The session's user-facing status line changed.
    Status {
        session: SessionId,
        text: String,
        severity: Severity,
        /// Countdown ticks replace the previous line instead of being logged.
        countdown: bool,
    },
    /// A detail/progress line (capture size updates, pipeline steps).
    Progress { session: SessionId, text: String },
    /// The session reached a terminal outcome. Emitted exactly once.
    Terminal {
        session: SessionId,
        outcome: SessionOutcome,
    },
}

/// Cloneable per-session handle for emitting events.
///
/// Send failures are ignored: a consumer that has gone away must not take
/// recording down with it.
#[derive(Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    /// Emit a status change.
    pub fn status(&self, text: impl Into<String>, severity: Severity) {
        let _ = self.tx.send(SessionEvent::Status {
            session: self.session,
            text: text.into(),
            severity,
            countdown: false,
        });
    }

    /// Emit a countdown tick.
    pub fn countdown(&self, text: impl Into<String>, severity: Severity) {
        let _ = self.tx.send(SessionEvent::Status {
            session: self.session,
            text: text.into(),
            severity,
            countdown: true,
        });
    }

    /// Emit a timestamped detail line.
    pub fn progress(&self, text: impl AsRef<str>) {
        let stamped = format!(
            "[{}] {}",
            chrono::Local::now().format("%H:%M:%S"),
            text.as_ref()
        );
        let _ = self.tx.send(SessionEvent::Progress {
            session: self.session,
            text: stamped,
        });
    }

    /// Emit the terminal outcome.
    pub fn terminal(&self, outcome: SessionOutcome) {
        let _ = self.tx.send(SessionEvent::Terminal {
            session: self.session,
            outcome,
        });
    }

    /// Id of the session this sink reports for.
    pub fn session(&self) -> SessionId {
        self.session
    }
}
