//! Kernel error → HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use engram_domain::error::{Error, ErrorKind};

/// Wrapper so handlers can return `Result<_, ApiError>` and use `?` on
/// kernel calls directly.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::Auth => match self.0 {
                Error::AdminKeyRequired => StatusCode::FORBIDDEN,
                _ => StatusCode::UNAUTHORIZED,
            },
            ErrorKind::Policy => StatusCode::FORBIDDEN,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        api_error(status, self.0.to_string())
    }
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_the_taxonomy() {
        let cases = [
            (Error::InvalidToken, StatusCode::UNAUTHORIZED),
            (Error::AdminKeyRequired, StatusCode::FORBIDDEN),
            (Error::CapabilityDenied("search".into()), StatusCode::FORBIDDEN),
            (Error::QuotaExceeded("x".into()), StatusCode::FORBIDDEN),
            (Error::InvalidStatus("x".into()), StatusCode::BAD_REQUEST),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::VectorIndexUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::IntegrityError("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            let response = ApiError(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
