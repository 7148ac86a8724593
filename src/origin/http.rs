use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{Content, OriginError, OriginGateway};

const SOURCE: &str = "origin::http";

const REGION_HEADER: &str = "x-edge-region";
const DEFAULT_BASE_URL: &str = "http://localhost:4000";
const DEFAULT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct OriginConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Sent as `X-Edge-Region` on every request.
    pub region: String,
}

impl OriginConfig {
    pub fn new(settings: &crate::config::OriginSettings, region: &str) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            timeout: settings.timeout,
            region: region.to_string(),
        }
    }
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            region: "us-east".to_string(),
        }
    }
}

/// Upstream response envelope: `{success, data}` or `{success:false, error}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
}

/// [`OriginGateway`] over the upstream's JSON HTTP API. No retries.
#[derive(Debug, Clone)]
pub struct HttpOriginGateway {
    client: Client,
    base_url: Url,
    region: String,
}

impl HttpOriginGateway {
    pub fn new(config: &OriginConfig) -> Result<Self, OriginError> {
        let region = HeaderValue::from_str(&config.region).map_err(|err| {
            OriginError::Setup(format!("invalid region header `{}`: {err}", config.region))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(REGION_HEADER, region);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|err| {
            OriginError::Setup(format!("invalid origin url `{}`: {err}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(OriginError::Setup(format!(
                "origin url `{}` cannot carry a path",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| OriginError::Setup(err.to_string()))?;

        Ok(Self {
            client,
            base_url,
            region: config.region.clone(),
        })
    }

    /// Base url extended by `segments`, each percent-encoded as a single
    /// path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn fetch<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, OriginError> {
        let url = self.endpoint(segments);
        debug!(target_module = SOURCE, region = %self.region, url = %url, "Fetching from origin");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        debug!(
            target_module = SOURCE,
            region = %self.region,
            url = %url,
            status = status.as_u16(),
            "Origin response"
        );

        if status == StatusCode::NOT_FOUND {
            return Err(OriginError::NotFound);
        }
        if !status.is_success() {
            return Err(OriginError::InvalidResponse(format!(
                "origin responded with status {status}"
            )));
        }

        let envelope: Envelope<T> = response.json().await.map_err(|err| {
            if err.is_timeout() {
                OriginError::Timeout
            } else {
                OriginError::InvalidResponse(err.to_string())
            }
        })?;

        if !envelope.success {
            let reason = envelope
                .error
                .unwrap_or_else(|| "origin returned unsuccessful response".to_string());
            return Err(OriginError::InvalidResponse(reason));
        }
        envelope
            .data
            .ok_or_else(|| OriginError::InvalidResponse("response carried no data".to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> OriginError {
    if err.is_timeout() {
        OriginError::Timeout
    } else {
        OriginError::Network(err.to_string())
    }
}

#[async_trait]
impl OriginGateway for HttpOriginGateway {
    async fn get_content(&self, id: &str) -> Result<Content, OriginError> {
        self.fetch(&["api", "content", id]).await
    }

    async fn get_all_content(&self) -> Result<Vec<Content>, OriginError> {
        self.fetch(&["api", "content"]).await
    }

    async fn health_check(&self) -> bool {
        let response = match self.client.get(self.endpoint(&["health"])).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    target_module = SOURCE,
                    region = %self.region,
                    error = %err,
                    "Origin health check failed"
                );
                return false;
            }
        };
        match response.json::<HealthBody>().await {
            Ok(body) => body.status == "ok",
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::Path;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    fn content_json(id: i64, version: i64) -> serde_json::Value {
        json!({
            "id": id,
            "slug": format!("item-{id}"),
            "title": "Item",
            "body": "Body",
            "metadata": {"author": "a"},
            "version": version,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z"
        })
    }

    async fn content(Path(id): Path<String>, headers: AxumHeaders) -> axum::response::Response {
        let region = headers
            .get("x-edge-region")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        match id.as_str() {
            "1" => Json(json!({"success": true, "data": content_json(1, 3), "region": region}))
                .into_response(),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(json!({"success": true, "data": content_json(2, 1)})).into_response()
            }
            "broken" => Json(json!({"success": false, "error": "validation failed"}))
                .into_response(),
            "region" if region == "eu-west" => {
                Json(json!({"success": true, "data": content_json(9, 9)})).into_response()
            }
            "boom" => (AxumStatus::INTERNAL_SERVER_ERROR, "boom").into_response(),
            "../health" | "a b?c" => {
                Json(json!({"success": true, "data": content_json(4, 1)})).into_response()
            }
            _ => (
                AxumStatus::NOT_FOUND,
                Json(json!({"success": false, "error": "Content not found"})),
            )
                .into_response(),
        }
    }

    async fn spawn_origin() -> String {
        let app = Router::new()
            .route("/api/content/{id}", get(content))
            .route(
                "/api/content",
                get(|| async {
                    Json(json!({"success": true, "data": [content_json(1, 3), content_json(2, 1)]}))
                }),
            )
            .route("/health", get(|| async { Json(json!({"status": "ok"})) }));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    fn gateway(base_url: String, region: &str) -> HttpOriginGateway {
        HttpOriginGateway::new(&OriginConfig {
            base_url,
            timeout: Duration::from_millis(200),
            region: region.to_string(),
        })
        .expect("gateway")
    }

    #[tokio::test]
    async fn fetches_content_through_envelope() {
        let origin = gateway(spawn_origin().await, "us-east");
        let content = origin.get_content("1").await.expect("content");
        assert_eq!(content.id, 1);
        assert_eq!(content.version, 3);
        assert_eq!(content.slug, "item-1");

        let all = origin.get_all_content().await.expect("list");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn sends_region_header() {
        let origin = gateway(spawn_origin().await, "eu-west");
        let content = origin.get_content("region").await.expect("content");
        assert_eq!(content.id, 9);
    }

    #[tokio::test]
    async fn maps_upstream_failures() {
        let origin = gateway(spawn_origin().await, "us-east");
        assert!(matches!(
            origin.get_content("missing").await,
            Err(OriginError::NotFound)
        ));
        assert!(matches!(
            origin.get_content("broken").await,
            Err(OriginError::InvalidResponse(reason)) if reason == "validation failed"
        ));
        assert!(matches!(
            origin.get_content("boom").await,
            Err(OriginError::InvalidResponse(reason)) if reason.contains("500")
        ));
        assert!(matches!(
            origin.get_content("slow").await,
            Err(OriginError::Timeout)
        ));
    }

    #[tokio::test]
    async fn health_reflects_reachability() {
        let origin = gateway(spawn_origin().await, "us-east");
        assert!(origin.health_check().await);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let unreachable = gateway(format!("http://{addr}"), "us-east");
        assert!(!unreachable.health_check().await);
        assert!(matches!(
            unreachable.get_content("1").await,
            Err(OriginError::Network(_))
        ));
    }

    #[tokio::test]
    async fn content_id_stays_one_path_segment() {
        let origin = gateway(spawn_origin().await, "us-east");
        for id in ["../health", "a b?c"] {
            let content = origin.get_content(id).await.expect("content");
            assert_eq!(content.id, 4, "{id}");
        }

        let url = origin.endpoint(&["api", "content", "../health"]);
        assert!(url.path().ends_with("/api/content/..%2Fhealth"), "{url}");
    }

    #[test]
    fn keeps_base_path_prefix() {
        let origin = gateway("http://origin:4000/upstream/".to_string(), "us-east");
        let url = origin.endpoint(&["api", "content", "7"]);
        assert_eq!(url.as_str(), "http://origin:4000/upstream/api/content/7");
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let result = HttpOriginGateway::new(&OriginConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(OriginError::Setup(_))));
    }

    #[test]
    fn rejects_unencodable_region() {
        let result = HttpOriginGateway::new(&OriginConfig {
            region: "bad\nregion".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(OriginError::Setup(_))));
    }
}
