//! Error types for the approval engine

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use crate::models::EntityType;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("No applicable workflow: {0}")]
    NoApplicableWorkflow(String),

    #[error("Duplicate instance: {entity_type} {entity_id} already has a pending approval")]
    DuplicateInstance {
        entity_type: EntityType,
        entity_id: String,
        existing_id: Option<Uuid>,
    },

    #[error("Stale approval: step {0} is no longer awaiting a decision")]
    StaleApproval(Uuid),

    #[error("Invalid context: {0}")]
    InvalidContext(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code sent to clients alongside the message
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NoApplicableWorkflow(_) => "no_applicable_workflow",
            AppError::DuplicateInstance { .. } => "duplicate_instance",
            AppError::StaleApproval(_) => "stale_approval",
            AppError::InvalidContext(_) => "invalid_context",
            AppError::NotFound(_) => "not_found",
            AppError::NotAuthorized(_) => "not_authorized",
            AppError::InvalidTemplate(_) => "invalid_template",
            AppError::Database(_) => "database",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DuplicateInstance { .. } | AppError::StaleApproval(_) => StatusCode::CONFLICT,
            AppError::NoApplicableWorkflow(_) | AppError::InvalidContext(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            AppError::InvalidTemplate(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Database error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                e.clone()
            }
            AppError::StaleApproval(_) => {
                "This item was already processed, please refresh".to_string()
            }
            other => other.to_string(),
        };

        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("instance".to_string());
        assert_eq!(format!("{}", err), "Not found: instance");

        let err = AppError::InvalidContext("missing salary".to_string());
        assert_eq!(format!("{}", err), "Invalid context: missing salary");

        let err = AppError::DuplicateInstance {
            entity_type: EntityType::Offer,
            entity_id: "offer-7".to_string(),
            existing_id: None,
        };
        assert_eq!(
            format!("{}", err),
            "Duplicate instance: offer offer-7 already has a pending approval"
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::NoApplicableWorkflow("x".into()).code(),
            "no_applicable_workflow"
        );
        assert_eq!(AppError::StaleApproval(Uuid::nil()).code(), "stale_approval");
        assert_eq!(AppError::InvalidContext("x".into()).code(), "invalid_context");
        assert_eq!(AppError::NotFound("x".into()).code(), "not_found");
    }

    #[test]
    fn test_stale_approval_into_response() {
        let response = AppError::StaleApproval(Uuid::new_v4()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_routing_errors_into_response() {
        let response = AppError::NoApplicableWorkflow("offer".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = AppError::InvalidContext("salary".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_not_authorized_into_response() {
        let response = AppError::NotAuthorized("not assignee".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_database_error_from_sqlx() {
        let sqlx_err = sqlx::Error::Configuration("test".into());
        let app_err: AppError = sqlx_err.into();
        assert!(matches!(app_err, AppError::Database(_)));
        assert_eq!(
            app_err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
