use thiserror::Error;

/// Failure reported by a cache backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("key `{key}` holds a value of the wrong kind for this operation")]
    WrongType { key: String },
    #[error("invalid expire time for key `{key}`")]
    InvalidTtl { key: String },
    #[error("invalid cache store url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl BackendError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// Failure surfaced by [`CacheStore`](super::CacheStore) write-path operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache write failed for `{key}`: {source}")]
    Write {
        key: String,
        #[source]
        source: BackendError,
    },
    #[error("cache lookup failed for `{key}`: {source}")]
    Read {
        key: String,
        #[source]
        source: BackendError,
    },
    #[error("failed to encode cache value for `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub(crate) fn write(key: &str, source: BackendError) -> Self {
        Self::Write {
            key: key.to_string(),
            source,
        }
    }

    pub(crate) fn read(key: &str, source: BackendError) -> Self {
        Self::Read {
            key: key.to_string(),
            source,
        }
    }
}
