//! Error types shared by handlers and the reporting layer.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use tracing::error;

/// PostgreSQL `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";
const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const CHECK_VIOLATION: &str = "23514";

/// Failure of a single sub-query.
///
/// Kept separate from [`ApiError`] so that callers composing several reads can
/// tell "empty because the table is not provisioned yet" from "empty because
/// the query failed".
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("table {0} is not provisioned")]
    NotProvisioned(String),
    #[error("database unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),
}

impl FetchError {
    /// Classify a driver error raised while reading `table`.
    pub fn from_sqlx(table: &str, err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(UNDEFINED_TABLE) => {
                FetchError::NotProvisioned(table.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                FetchError::Unavailable(err)
            }
            _ => FetchError::Query(err),
        }
    }

    pub fn is_not_provisioned(&self) -> bool {
        matches!(self, FetchError::NotProvisioned(_))
    }
}

/// Errors returned to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(String),
    /// Retryable: the database could not serve the request.
    #[error("service temporarily unavailable")]
    Unavailable(#[source] FetchError),
    #[error("internal server error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ApiError::NotFound(what.into())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            match db.code().as_deref() {
                Some(UNIQUE_VIOLATION) => return ApiError::validation("record already exists"),
                Some(FOREIGN_KEY_VIOLATION) => return ApiError::validation("referenced record does not exist"),
                Some(CHECK_VIOLATION) => return ApiError::validation("value rejected by database constraint"),
                _ => {}
            }
        }
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("record".into()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                ApiError::Unavailable(FetchError::Unavailable(err))
            }
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Query(inner) => ApiError::Internal(inner.into()),
            other => ApiError::Unavailable(other),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errs: validator::ValidationErrors) -> Self {
        let fields = errs
            .field_errors()
            .into_keys()
            .collect::<Vec<_>>()
            .join(", ");
        ApiError::Validation(format!("invalid fields: {}", fields))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            ApiError::Internal(source) => error!(error = ?source, "request failed"),
            ApiError::Unavailable(source) => error!(error = %source, "database unavailable"),
            _ => {}
        }

        let mut builder = HttpResponse::build(status);
        if status == StatusCode::SERVICE_UNAVAILABLE {
            builder.insert_header(("Retry-After", "5"));
        }
        builder.json(json!({ "error": self.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = ApiError::validation("dimension is required");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "dimension is required");
    }

    #[test]
    fn pool_timeout_is_retryable() {
        let err = ApiError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        let resp = err.error_response();
        assert!(resp.headers().contains_key("Retry-After"));
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ApiError::Internal(anyhow::anyhow!("connection string leaked"));
        assert_eq!(err.to_string(), "internal server error");
    }

    #[test]
    fn missing_row_is_not_found() {
        let err = ApiError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn driver_errors_classify_by_kind() {
        assert!(matches!(
            FetchError::from_sqlx("outcomes", sqlx::Error::PoolTimedOut),
            FetchError::Unavailable(_)
        ));
        assert!(matches!(
            FetchError::from_sqlx("outcomes", sqlx::Error::ColumnNotFound("rate".into())),
            FetchError::Query(_)
        ));
    }
}
