use thiserror::Error;

use crate::cache::CacheError;

/// Failure surfaced to a publisher.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to encode invalidation event for `{target}`: {source}")]
    Encode {
        target: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure reported by a subscriber's handler for one message.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("event rejected: {0}")]
    Rejected(String),
}

impl HandlerError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}
