//! Process-wide error emitter.
//!
//! Background listeners have no caller to return errors to, so they publish
//! them here; anything interested (the sync stream, logging) subscribes.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use ts_rs::TS;

/// A listener was refused or failed while reading `path`.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq, TS)]
#[error("permission error on {path} ({operation}): {message}")]
#[serde(rename_all = "camelCase")]
pub struct PermissionError {
    pub path: String,
    pub operation: String,
    pub message: String,
}

impl PermissionError {
    pub fn list(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operation: "list".to_string(),
            message: message.into(),
        }
    }
}

pub struct ErrorEmitter {
    tx: broadcast::Sender<PermissionError>,
}

impl ErrorEmitter {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn emit(&self, error: PermissionError) {
        let _ = self.tx.send(error);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PermissionError> {
        self.tx.subscribe()
    }
}

static ERROR_EMITTER: Lazy<ErrorEmitter> = Lazy::new(ErrorEmitter::new);

pub fn error_emitter() -> &'static ErrorEmitter {
    &ERROR_EMITTER
}
