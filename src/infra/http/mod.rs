//! HTTP read surface of one region.

mod error;
mod middleware;
mod routes;

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware, routing::get, routing::post};

pub use error::{ApiError, ApiErrorBody};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};

use crate::application::RequestHandler;
use crate::bus::EventBus;
use crate::collector::MetricsCollector;
use crate::region::Region;

#[derive(Clone)]
pub struct EdgeState {
    pub region: Arc<str>,
    pub handler: Arc<RequestHandler>,
    pub metrics: Arc<MetricsCollector>,
    pub bus: EventBus,
}

impl EdgeState {
    pub fn new(region: &Region, bus: EventBus) -> Self {
        Self {
            region: Arc::from(region.name()),
            handler: Arc::clone(region.handler()),
            metrics: Arc::clone(region.metrics()),
            bus,
        }
    }
}

pub fn build_router(state: EdgeState) -> Router {
    Router::new()
        .route("/api/content", get(routes::list_content))
        .route("/api/content/{id}", get(routes::get_content))
        .route("/api/invalidations", post(routes::publish_invalidation))
        .route("/health", get(routes::health))
        .route("/metrics", get(routes::metrics))
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
}
