//! Service-boundary error taxonomy and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::auth::{email::DeliveryError, extractors::SessionRejection};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("a user with this email already exists")]
    EmailTaken,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("unauthorized: {0}")]
    Unauthorized(#[from] SessionRejection),

    #[error("admin access required")]
    Forbidden,

    #[error("too many requests, try again later")]
    RateLimited,

    #[error("invalid or expired reset code")]
    ResetCodeNotFound,

    #[error("reset code has expired, request a new one")]
    ResetCodeExpired,

    #[error("user not found")]
    UserNotFound,

    #[error("could not deliver reset code: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Validation(_)
            | AuthError::ResetCodeNotFound
            | AuthError::ResetCodeExpired => StatusCode::BAD_REQUEST,
            AuthError::EmailTaken => StatusCode::CONFLICT,
            AuthError::InvalidCredentials | AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::Delivery(_) => StatusCode::BAD_GATEWAY,
            AuthError::Storage(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to the client.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::Unauthorized(_) => "invalid or expired token".to_string(),
            AuthError::Delivery(_) => "could not deliver reset code".to_string(),
            AuthError::Storage(_) | AuthError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            AuthError::Storage(e) => tracing::error!(error = %format!("{e:#}"), "storage failure"),
            AuthError::Internal(msg) => tracing::error!(error = %msg, "internal failure"),
            AuthError::Delivery(e) => tracing::error!(error = %e, "reset code delivery failed"),
            _ => {}
        }

        let body = Json(json!({ "error": self.public_message() }));
        (status, body).into_response()
    }
}
