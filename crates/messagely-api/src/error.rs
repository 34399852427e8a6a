use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use messagely_db::DbError;
use messagely_types::api::{ErrorBody, ErrorResponse};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Db(#[from] DbError),

    /// Malformed or incomplete JSON body.
    #[error(transparent)]
    JsonBody(#[from] JsonRejection),

    #[error(transparent)]
    PathParam(#[from] PathRejection),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn unauthorized() -> Self {
        ApiError::Unauthorized("Unauthorized".to_string())
    }

    /// Store errors pass through untranslated; the status is inferred here.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::JsonBody(rejection) => rejection.status(),
            ApiError::PathParam(rejection) => rejection.status(),
            ApiError::NotFound(_) | ApiError::Db(DbError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Db(e) if e.is_unique_violation() => StatusCode::CONFLICT,
            ApiError::Db(e) if e.constraint_code().is_some() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = if status.is_server_error() {
            error!("Request failed: {}", self);
            status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: ErrorBody {
                message,
                status: status.as_u16(),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(extended_code: i32) -> DbError {
        DbError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(extended_code),
            Some("constraint failed".into()),
        ))
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::unauthorized().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Db(DbError::NotFound("Username x not found".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Db(DbError::Hash("bad".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::Internal("boom".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn constraint_violations_map_to_client_errors() {
        use rusqlite::ffi;

        assert_eq!(
            ApiError::Db(sqlite_failure(ffi::SQLITE_CONSTRAINT_PRIMARYKEY)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Db(sqlite_failure(ffi::SQLITE_CONSTRAINT_UNIQUE)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Db(sqlite_failure(ffi::SQLITE_CONSTRAINT_FOREIGNKEY)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Db(sqlite_failure(ffi::SQLITE_CONSTRAINT_NOTNULL)).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
