use std::path::PathBuf;
use thiserror::Error;

use crate::tracker::TrackerState;

/// Chain RPC failures, contained to the event being handled.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("connect failed to '{url}': {message}")]
    Connect { url: String, message: String },
    #[error("{op} failed: {message}")]
    Rpc { op: &'static str, message: String },
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: String },
    #[error("cannot decode event log: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn rpc(op: &'static str, err: impl std::fmt::Display) -> Self {
        ProviderError::Rpc {
            op,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not connected")]
    NotConnected,
    #[error("cannot open deposit db {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Notification failures are logged by the caller and never escalate.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("telegram answered {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("missing required setting {0}")]
    MissingSetting(&'static str),
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
    #[error("tracker cannot start from state {0:?}")]
    InvalidState(TrackerState),
    #[error("deposit db unavailable: {0}")]
    Storage(#[from] StorageError),
    #[error("chain provider unavailable: {0}")]
    Provider(#[from] ProviderError),
    #[error("notifier setup failed: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Failure of a single deposit event; reported at the handler boundary.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
