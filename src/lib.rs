//! livegrab - livestream capture orchestration for TikTok and Douyin.
//!
//! The crate tracks users across both platforms, waits for them to go live,
//! captures the stream to disk, and post-processes the result. The entry
//! point is [`orchestrator::Orchestrator`]; everything else is the machinery
//! it drives.

pub mod capture;
pub mod config;
pub mod events;
pub mod history;
pub mod http;
pub mod orchestrator;
pub mod pipeline;
pub mod resolver;
pub mod session;
pub mod transcode;

pub use config::{BackoffConfig, OrchestratorConfig, SessionTuning};
pub use events::{SessionEvent, Severity};
pub use orchestrator::{Orchestrator, OrchestratorError, StartRequest};
pub use pipeline::{AudioProfile, PostProcessOptions};
pub use resolver::Platform;
pub use session::{SessionId, SessionOptions, SessionOutcome, SessionStatus};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for binaries embedding this crate.
///
/// Honors `RUST_LOG`; defaults to debug-level output for this crate only.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livegrab=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("livegrab v{}", env!("CARGO_PKG_VERSION"));
}
