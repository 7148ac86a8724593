#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use edge_coherence::origin::{Content, OriginError, OriginGateway};
use serde_json::json;
use tokio::sync::Semaphore;

/// In-process origin that counts fetches and can hold them behind a gate.
pub struct FakeOrigin {
    fetches: AtomicUsize,
    version: AtomicI64,
    gated: AtomicBool,
    gate: Semaphore,
}

impl FakeOrigin {
    pub fn new(version: i64) -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            version: AtomicI64::new(version),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn set_version(&self, version: i64) {
        self.version.store(version, Ordering::SeqCst);
    }

    /// Hold every following fetch until `open_gate` releases it.
    pub fn close_gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn open_gate(&self, fetches: usize) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(fetches);
    }
}

#[async_trait]
impl OriginGateway for FakeOrigin {
    async fn get_content(&self, id: &str) -> Result<Content, OriginError> {
        if self.gated.load(Ordering::SeqCst)
            && let Ok(permit) = self.gate.acquire().await
        {
            permit.forget();
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);

        match id {
            "missing" => Err(OriginError::NotFound),
            "down" => Err(OriginError::Timeout),
            _ => Ok(Content {
                id: id.parse().unwrap_or_default(),
                slug: format!("post-{id}"),
                title: format!("Post {id}"),
                body: "Body".to_string(),
                metadata: json!({ "tags": ["news"] }),
                version: self.version.load(Ordering::SeqCst),
                created_at: "2024-01-01T00:00:00Z".to_string(),
                updated_at: "2024-01-02T00:00:00Z".to_string(),
            }),
        }
    }

    async fn get_all_content(&self) -> Result<Vec<Content>, OriginError> {
        Ok(vec![self.get_content("1").await?, self.get_content("2").await?])
    }

    async fn health_check(&self) -> bool {
        true
    }
}

/// Poll `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Let spawned tasks run without advancing time.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
