//! # Intent State
//!
//! The only state that survives a restart: whether the operator wants the bot
//! running. Saved to `data/state.json` unless configured otherwise.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedIntent {
    #[serde(default)]
    pub enabled: bool,
}

pub struct IntentStore {
    path: Option<PathBuf>,
    intent: Mutex<PersistedIntent>,
}

impl IntentStore {
    /// Loads the intent from `path`, falling back to disabled when the file is
    /// missing or unreadable.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let intent = fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str::<PersistedIntent>(&content).ok())
            .unwrap_or_default();
        Self {
            path: Some(path),
            intent: Mutex::new(intent),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            intent: Mutex::new(PersistedIntent::default()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.intent.lock().unwrap_or_else(|p| p.into_inner()).enabled
    }

    /// Updates the intent and persists it. A failed write is logged, not fatal.
    pub fn set_enabled(&self, enabled: bool) {
        let intent = {
            let mut guard = self.intent.lock().unwrap_or_else(|p| p.into_inner());
            guard.enabled = enabled;
            *guard
        };
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                let _ = fs::create_dir_all(parent);
            }
            match serde_json::to_string_pretty(&intent) {
                Ok(content) => {
                    if let Err(e) = fs::write(path, content) {
                        warn!("Failed to persist bot intent to {}: {}", path.display(), e);
                    }
                }
                Err(e) => warn!("Failed to serialize bot intent: {}", e),
            }
        }
    }
}
