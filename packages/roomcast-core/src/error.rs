//! Centralized error types for the Roomcast core library.
//!
//! Defines the bridge-wide error kinds, maps them to HTTP status codes for
//! the dashboard façade, and implements `IntoResponse` for automatic JSON
//! error bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type for the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The configuration file is missing required options or is inconsistent.
    /// Fatal at startup.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A discovery window completed without a usable candidate.
    /// The supervisor retries with backoff.
    #[error("Discovery produced no usable players")]
    DiscoveryEmpty,

    /// An HTTP call to a player failed or returned a non-success status.
    #[error("HTTP fetch failed: {0}")]
    HttpFetchFailed(String),

    /// An inbound frame or payload could not be parsed. The frame is dropped.
    #[error("Parse failed: {0}")]
    ParseFailed(String),

    /// A player transport closed or errored. Collapses the session.
    #[error("Transport lost: {0}")]
    TransportLost(String),

    /// An inventory lookup missed. Surfaced as 404 to the façade.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Anything else. Surfaced as 500 to the façade.
    #[error("Internal failure: {0}")]
    InternalFailure(String),
}

impl BridgeError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "config_invalid",
            Self::DiscoveryEmpty => "discovery_empty",
            Self::HttpFetchFailed(_) => "http_fetch_failed",
            Self::ParseFailed(_) => "parse_failed",
            Self::TransportLost(_) => "transport_lost",
            Self::NotFound(_) => "not_found",
            Self::InternalFailure(_) => "internal_failure",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for bridge-wide operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpFetchFailed(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = BridgeError::NotFound("P404".into());
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn everything_else_maps_to_500() {
        for err in [
            BridgeError::InternalFailure("boom".into()),
            BridgeError::ConfigInvalid("bad".into()),
            BridgeError::ParseFailed("bad frame".into()),
            BridgeError::TransportLost("gone".into()),
        ] {
            assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}
