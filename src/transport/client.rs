//! Client interface to the slot-indexed store.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Failure codes a fetch can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorCode {
    /// Nothing stored under the key (yet).
    DataNotFound,
    /// The request could not be routed far enough.
    RouteNotFound,
    /// The key was requested recently and failed; the node is throttling.
    RecentlyFailed,
    /// The remote node is overloaded.
    RejectedOverload,
    /// The request timed out.
    Timeout,
    /// The key itself is invalid; it can never resolve.
    InvalidUri,
    /// The stored document exceeds the size limit.
    TooBig,
    /// The request was cancelled locally.
    Cancelled,
    /// Unexpected error inside the store client.
    Internal,
}

impl FetchErrorCode {
    /// Whether the store guarantees nothing will ever be found at the key.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::InvalidUri | Self::TooBig)
    }
}

impl std::fmt::Display for FetchErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DataNotFound => "data not found",
            Self::RouteNotFound => "route not found",
            Self::RecentlyFailed => "recently failed",
            Self::RejectedOverload => "rejected overload",
            Self::Timeout => "timeout",
            Self::InvalidUri => "invalid uri",
            Self::TooBig => "too big",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal error",
        };
        f.write_str(name)
    }
}

/// Errors from [`StoreClient::fetch`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The connection to the store node went away. Retry on a later pass.
    #[error("Connection to the store terminated")]
    ConnectionTerminated,

    #[error("Fetch failed ({code}): {message}")]
    Failed {
        code: FetchErrorCode,
        message: String,
    },
}

impl FetchError {
    /// Shorthand for a failure without extra detail.
    pub fn failed(code: FetchErrorCode) -> Self {
        Self::Failed {
            code,
            message: code.to_string(),
        }
    }
}

/// Errors from [`StoreClient::insert`].
#[derive(Debug, thiserror::Error)]
pub enum InsertError {
    #[error("Connection to the store terminated")]
    ConnectionTerminated,

    /// Something is already stored under the key.
    #[error("Key collision: {key}")]
    Collision { key: String },

    #[error("Insert failed: {0}")]
    Failed(String),
}

/// Remote store the channels poll and publish into.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Fetch the document at `key` into a local file and return its path.
    /// The caller owns (and removes) the file.
    async fn fetch(&self, key: &str) -> Result<PathBuf, FetchError>;

    /// Publish `data` under `key`. Keys are write-once.
    async fn insert(&self, key: &str, data: &[u8]) -> Result<(), InsertError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(FetchErrorCode::InvalidUri.is_fatal());
        assert!(FetchErrorCode::TooBig.is_fatal());
        assert!(!FetchErrorCode::DataNotFound.is_fatal());
        assert!(!FetchErrorCode::RouteNotFound.is_fatal());
        assert!(!FetchErrorCode::Cancelled.is_fatal());
    }

    #[test]
    fn test_code_serializes_snake_case() {
        let json = serde_json::to_string(&FetchErrorCode::DataNotFound).unwrap();
        assert_eq!(json, "\"data_not_found\"");
    }
}
