//! Relay errors and their HTTP mapping.
//!
//! These only apply before a response is committed. Once the stream body has
//! started, failures terminate the body instead (see [`super::relay`]).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::contract::ErrorBody;

pub const MISSING_PARAMETERS: &str = "Missing required parameters";
pub const COMPLETION_FAILED: &str = "An error occurred while processing your request.";
pub const CATALOG_FAILED: &str = "Failed to fetch models";

#[derive(Error, Debug)]
pub enum RelayError {
    /// Client input malformed.
    #[error("Missing required parameters")]
    MissingParameter,

    /// Upstream unavailable, as seen by the catalog route. Same status as
    /// `UpstreamUnavailable`; the body names the catalog and keeps the detail.
    #[error("Failed to fetch models: {0}")]
    CatalogUnavailable(String),

    /// Provider call failed or returned nothing usable.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Provider did not answer in time.
    #[error("upstream timed out: {0}")]
    Timeout(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingParameter => StatusCode::BAD_REQUEST,
            RelayError::CatalogUnavailable(_) | RelayError::UpstreamUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RelayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// The envelope sent to the browser. Upstream detail is only exposed for
    /// the catalog route.
    pub fn body(&self) -> ErrorBody {
        match self {
            RelayError::MissingParameter => ErrorBody {
                error: MISSING_PARAMETERS.to_string(),
                details: None,
            },
            RelayError::CatalogUnavailable(details) => ErrorBody {
                error: CATALOG_FAILED.to_string(),
                details: Some(details.clone()),
            },
            RelayError::UpstreamUnavailable(_) | RelayError::Timeout(_) => ErrorBody {
                error: COMPLETION_FAILED.to_string(),
                details: None,
            },
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(RelayError::MissingParameter.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            RelayError::UpstreamUnavailable("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(RelayError::Timeout("x".into()).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            RelayError::CatalogUnavailable("x".into()).status(),
            RelayError::UpstreamUnavailable("x".into()).status()
        );
    }

    #[test]
    fn test_upstream_detail_is_not_leaked() {
        let body = RelayError::UpstreamUnavailable("invalid api key sk-123".into()).body();
        assert_eq!(body.error, COMPLETION_FAILED);
        assert!(body.details.is_none());
    }

    #[test]
    fn test_catalog_error_carries_details() {
        let body = RelayError::CatalogUnavailable("no chat models".into()).body();
        assert_eq!(body.error, CATALOG_FAILED);
        assert_eq!(body.details.as_deref(), Some("no chat models"));
    }
}
