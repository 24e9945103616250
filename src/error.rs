use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;

/// Which of the two stores an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Cache,
    Primary,
}

impl Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Cache => "cache",
            Self::Primary => "primary",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Malformed input. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{store} store has no record for '{key}'")]
    NotFound { store: StoreKind, key: String },

    #[error("{store} store throttled the request after {attempts} attempt(s): {message}")]
    Throttling {
        store:    StoreKind,
        attempts: u32,
        message:  String,
    },

    #[error("network error talking to {store} store after {attempts} attempt(s): {message}")]
    Network {
        store:    StoreKind,
        attempts: u32,
        message:  String,
    },

    #[error("{store} store is unavailable: {message}")]
    Unavailable { store: StoreKind, message: String },

    #[error("operation cancelled")]
    Cancelled,

    /// Only produced by the fallback reader: the primary store failed after the cache path did not deliver.
    #[error("cannot read '{id}': cache path: {cache}; primary path: {source}")]
    ReadFailed {
        id:     String,
        cache:  String,
        #[source]
        source: Box<CacheError>,
    },

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl CacheError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(store: StoreKind, key: impl Into<String>) -> Self {
        Self::NotFound {
            store,
            key: key.into(),
        }
    }

    pub fn throttling(store: StoreKind, message: impl Into<String>) -> Self {
        Self::Throttling {
            store,
            attempts: 1,
            message: message.into(),
        }
    }

    pub fn network(store: StoreKind, message: impl Into<String>) -> Self {
        Self::Network {
            store,
            attempts: 1,
            message: message.into(),
        }
    }

    pub fn unavailable(store: StoreKind, message: impl Into<String>) -> Self {
        Self::Unavailable {
            store,
            message: message.into(),
        }
    }

    /// Throttling and network errors are transient; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttling { .. } | Self::Network { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Number of attempts made before the error was surfaced. Non-retryable kinds always report one.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Throttling { attempts, .. } | Self::Network { attempts, .. } => *attempts,
            _ => 1,
        }
    }

    pub fn with_attempts(self, count: u32) -> Self {
        match self {
            Self::Throttling { store, message, .. } => Self::Throttling {
                store,
                attempts: count,
                message,
            },
            Self::Network { store, message, .. } => Self::Network {
                store,
                attempts: count,
                message,
            },
            other => other,
        }
    }

    pub fn store(&self) -> Option<StoreKind> {
        match self {
            Self::NotFound { store, .. }
            | Self::Throttling { store, .. }
            | Self::Network { store, .. }
            | Self::Unavailable { store, .. } => Some(*store),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("malformed document payload: {err}"))
    }
}

pub type Result<T, E = CacheError> = std::result::Result<T, E>;
