//! HTTP error mapping.

use axum::http::header::WWW_AUTHENTICATE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use super::auth::AuthError;
use crate::ingest::IngestError;
use crate::query::QueryError;
use crate::response::ResponseError;

/// Challenge sent with every 401.
const BASIC_CHALLENGE: &str = "Basic realm=\"pathtaker\"";

/// Errors surfaced to HTTP callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("{0}")]
    BadRequest(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Backend(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::MissingParameter(_) | QueryError::InvalidParameter { .. } => {
                ApiError::BadRequest(e.to_string())
            }
            QueryError::Storage(ref storage) if storage.is_unavailable() => {
                ApiError::Unavailable(e.to_string())
            }
            QueryError::Storage(_) => ApiError::Backend(e.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        if e.is_unavailable() {
            ApiError::Unavailable(e.to_string())
        } else {
            ApiError::Backend(e.to_string())
        }
    }
}

impl From<ResponseError> for ApiError {
    fn from(e: ResponseError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = %status, error = %self, "request failed");
        } else {
            warn!(status = %status, error = %self, "request rejected");
        }

        let body = Json(json!({ "ok": false, "error": self.to_string() }));
        match self {
            ApiError::Unauthorized(_) => {
                (status, [(WWW_AUTHENTICATE, BASIC_CHALLENGE)], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;

    #[test]
    fn test_query_error_mapping() {
        let missing: ApiError = QueryError::MissingParameter("start").into();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let down: ApiError =
            QueryError::Storage(StorageError::Unavailable("down".to_string())).into();
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);

        let rejected: ApiError = QueryError::Storage(StorageError::UnexpectedStatus {
            operation: "search",
            status: 400,
            body: String::new(),
        })
        .into();
        assert_eq!(rejected.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_unauthorized_carries_challenge() {
        let response = ApiError::from(AuthError::Missing).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(WWW_AUTHENTICATE).unwrap(),
            BASIC_CHALLENGE
        );
    }
}
