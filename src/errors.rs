use actix_web::http::StatusCode;
use actix_web::{error::ResponseError, HttpResponse};
use log::{debug, error, warn};
use serde_json::json;
use thiserror::Error;

// HTTP-facing error taxonomy
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Authentication error: {0}")]
    AuthError(String),
    #[error("Forbidden: {0}")]
    ForbiddenError(String),
    #[error("Not found: {0}")]
    NotFoundError(String),
    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::ValidationError(msg.into())
    }

    pub fn admin_only() -> Self {
        ApiError::ForbiddenError("Access denied. Administrators only.".to_string())
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::DatabaseError(msg) => {
                error!("\x1B[1;31mDATABASE ERROR:\x1B[0m {}", msg);
                HttpResponse::InternalServerError().json(json!({ "error": "Internal server error" }))
            },
            ApiError::ValidationError(msg) => {
                warn!("\x1B[1;33mVALIDATION ERROR:\x1B[0m {}", msg);
                HttpResponse::BadRequest().json(json!({ "error": msg }))
            },
            ApiError::AuthError(msg) => {
                warn!("\x1B[1;33mAUTHENTICATION ERROR:\x1B[0m {}", msg);
                HttpResponse::Unauthorized().json(json!({ "error": msg }))
            },
            ApiError::ForbiddenError(msg) => {
                warn!("\x1B[1;33mFORBIDDEN:\x1B[0m {}", msg);
                HttpResponse::Forbidden().json(json!({ "error": msg }))
            },
            ApiError::NotFoundError(msg) => {
                debug!("\x1B[1;36mNOT FOUND ERROR:\x1B[0m {}", msg);
                HttpResponse::NotFound().json(json!({ "error": msg }))
            },
            ApiError::InternalError(msg) => {
                error!("\x1B[1;31mINTERNAL SERVER ERROR:\x1B[0m {}", msg);
                HttpResponse::InternalServerError().json(json!({ "error": "Internal server error" }))
            },
        }
    }

    fn status_code(&self) -> StatusCode {
        match *self {
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::AuthError(_) => StatusCode::UNAUTHORIZED,
            ApiError::ForbiddenError(_) => StatusCode::FORBIDDEN,
            ApiError::NotFoundError(_) => StatusCode::NOT_FOUND,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Persistence errors, independent of the HTTP layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Duplicate(String),
    #[error("connection pool: {0}")]
    Pool(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("blocking task failed: {0}")]
    Blocking(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate(_))
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match e {
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Duplicate(info.message().to_string())
            },
            other => StoreError::Query(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Pool(e.to_string())
    }
}

impl From<actix_web::error::BlockingError> for StoreError {
    fn from(e: actix_web::error::BlockingError) -> Self {
        StoreError::Blocking(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(msg) => ApiError::ValidationError(format!("Already exists: {}", msg)),
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ApiError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::AuthError("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::admin_only().status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFoundError("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::InternalError("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn duplicate_store_error_is_a_client_error() {
        let api: ApiError = StoreError::Duplicate("review".into()).into();
        assert_eq!(api.status_code(), StatusCode::BAD_REQUEST);

        let api: ApiError = StoreError::Query("boom".into()).into();
        assert_eq!(api.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
