//! Upstream content service, as seen from an edge region.

mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::{HttpOriginGateway, OriginConfig};

/// A content item as served by the upstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("Content not found")]
    NotFound,
    #[error("origin request timed out")]
    Timeout,
    #[error("failed to fetch from origin: {0}")]
    Network(String),
    #[error("origin returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("failed to set up origin client: {0}")]
    Setup(String),
}

#[async_trait]
pub trait OriginGateway: Send + Sync {
    async fn get_content(&self, id: &str) -> Result<Content, OriginError>;

    async fn get_all_content(&self) -> Result<Vec<Content>, OriginError>;

    /// True when the upstream reports itself healthy; never fails.
    async fn health_check(&self) -> bool;
}
