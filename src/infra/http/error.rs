use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::error::{ErrorReport, ServeError};
use crate::bus::BusError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub success: bool,
    pub error: String,
}

/// JSON error response carrying an `ErrorReport` for the logging middleware.
#[derive(Debug)]
pub struct ApiError {
    source: &'static str,
    status: StatusCode,
    message: String,
    chain: Vec<String>,
}

impl ApiError {
    pub fn new(source: &'static str, status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            source,
            status,
            chain: vec![message.clone()],
            message,
        }
    }

    pub fn bad_request(source: &'static str, message: impl Into<String>) -> Self {
        Self::new(source, StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(source: &'static str) -> Self {
        Self::new(source, StatusCode::NOT_FOUND, ServeError::NotFound.to_string())
    }

    pub fn internal(source: &'static str, message: impl Into<String>) -> Self {
        Self::new(source, StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn serve(source: &'static str, err: ServeError) -> Self {
        match err {
            ServeError::NotFound => Self::not_found(source),
            ServeError::Failure(message) => Self::internal(source, message),
        }
    }

    pub fn publish(source: &'static str, err: &BusError) -> Self {
        let report = ErrorReport::from_error(source, StatusCode::INTERNAL_SERVER_ERROR, err);
        Self {
            source,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: err.to_string(),
            chain: report.messages,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            success: false,
            error: self.message,
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport {
            source: self.source,
            status: self.status,
            messages: self.chain,
        }
        .attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_errors_map_to_status_codes() {
        assert_eq!(
            ApiError::serve("test", ServeError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::serve("test", ServeError::failure("origin request timed out")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_carries_report_extension() {
        let response = ApiError::bad_request("test", "target must not be empty").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("report attached");
        assert_eq!(report.messages, vec!["target must not be empty".to_string()]);
    }
}
