//! Stop/cancel signalling
//!
//! A session is torn down in one of two ways: stop keeps whatever was
//! captured, cancel discards it. Whichever arrives first wins; later
//! requests of either kind are ignored so a stop can never be upgraded to a
//! cancel once the session has started finalizing.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How the session was asked to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Finish gracefully and keep the capture.
    Stop,
    /// Abort and delete the capture.
    Cancel,
}

/// Set-once termination latch shared between a session and its controller.
#[derive(Clone)]
pub struct StopSignal {
    token: CancellationToken,
    mode: Arc<Mutex<Option<StopMode>>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            mode: Arc::new(Mutex::new(None)),
        }
    }

    /// Latch the given mode. Returns `false` if a mode was already set, in
    /// which case nothing changes.
    pub fn request(&self, mode: StopMode) -> bool {
        let mut slot = self.mode.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(mode);
        self.token.cancel();
        true
    }

    pub fn stop(&self) -> bool {
        self.request(StopMode::Stop)
    }

    pub fn cancel(&self) -> bool {
        self.request(StopMode::Cancel)
    }

    /// The latched mode, if any.
    pub fn mode(&self) -> Option<StopMode> {
        *self.mode.lock()
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once a stop or cancel has been requested.
    pub async fn fired(&self) {
        self.token.cancelled().await;
    }
}
