//! Error taxonomy for core operations
//!
//! Recoverable conditions (not found, forbidden, conflict, invalid input)
//! are ordinary return values. Storage failures are wrapped and surface as
//! 500 with a generic message; the detail goes to the log only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<tokio_postgres::Error> for Error {
    fn from(e: tokio_postgres::Error) -> Self {
        Error::Storage(e.into())
    }
}

impl From<deadpool_postgres::PoolError> for Error {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        Error::Storage(e.into())
    }
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            Error::Storage(e) => {
                error!("storage error: {e:#}");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(Error::NotFound("user").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::Conflict("already decided".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::Forbidden("admin access required".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::InvalidInput("missing field".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
