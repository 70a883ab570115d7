//! Recently-tracked identifier history
//!
//! A small JSON list persisted to disk so a frontend can offer the last few
//! tracked users again. Most recent first, deduplicated, capped. Load and
//! save errors are logged and otherwise ignored; history is a convenience,
//! never a reason to refuse a recording.

use std::path::{Path, PathBuf};

const HISTORY_CAP: usize = 20;

#[derive(Debug)]
pub struct IdentifierHistory {
    path: PathBuf,
    entries: Vec<String>,
}

impl IdentifierHistory {
    /// Load history from `path`. A missing or unreadable file yields an
    /// empty history.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "history file is corrupt, starting fresh");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not read history file");
                Vec::new()
            }
        };
        Self { path, entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Record an identifier as most recent and persist.
    pub fn push(&mut self, identifier: &str) {
        self.entries.retain(|e| e != identifier);
        self.entries.insert(0, identifier.to_string());
        self.entries.truncate(HISTORY_CAP);
        self.save();
    }

    fn save(&self) {
        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let raw = serde_json::to_string_pretty(&self.entries)
                .map_err(std::io::Error::other)?;
            std::fs::write(&self.path, raw)
        };
        if let Err(e) = write() {
            tracing::warn!(path = %self.path.display(), error = %e, "could not persist history");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
