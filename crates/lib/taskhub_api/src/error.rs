//! Application error types.
//!
//! Error bodies never include internal detail on their own. Server errors
//! attach an [`ErrorReport`] extension instead, and the router's
//! [`expose_error_detail`](crate::middleware::error_detail::expose_error_detail)
//! layer folds it into the body when the deployment allows.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use taskhub_core::auth::AuthError;
use taskhub_core::ownership::AccessDenied;
use taskhub_core::store::StoreError;
use thiserror::Error;
use tracing::{debug, error};

use crate::response::timestamp;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    /// An essential dependency (user or resource store) failed.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    message: &'a str,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

/// Public message and internal detail of a failed request.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub message: String,
    pub detail: String,
}

/// `{success: false, message, timestamp[, detail]}` with `status`.
pub(crate) fn error_response(status: StatusCode, message: &str, detail: Option<&str>) -> Response {
    let body = ErrorBody {
        success: false,
        message,
        timestamp: timestamp(),
        detail,
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, detail) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, m.as_str(), None),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.as_str(), None),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, m.as_str(), None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.as_str(), None),
            AppError::Conflict(m) => (StatusCode::BAD_REQUEST, m.as_str(), None),
            AppError::PayloadTooLarge(m) => (StatusCode::PAYLOAD_TOO_LARGE, m.as_str(), None),
            AppError::TooManyRequests(m) => (StatusCode::TOO_MANY_REQUESTS, m.as_str(), None),
            AppError::DependencyUnavailable(d) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Service temporarily unavailable",
                Some(d.as_str()),
            ),
            AppError::Internal(d) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                Some(d.as_str()),
            ),
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, detail = detail.unwrap_or(""), "request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "request rejected");
        }
        let mut response = error_response(status, message, None);
        if let Some(detail) = detail {
            response.extensions_mut().insert(ErrorReport {
                message: message.to_string(),
                detail: detail.to_string(),
            });
        }
        response
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingCredential
            | AuthError::InvalidCredential
            | AuthError::ExpiredCredential
            | AuthError::UnknownPrincipal
            | AuthError::InvalidRefreshToken
            | AuthError::InvalidLogin => AppError::Unauthorized(e.to_string()),
            AuthError::Dependency(e) => AppError::from(e),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<AccessDenied> for AppError {
    fn from(e: AccessDenied) -> Self {
        match e {
            AccessDenied::ResourceNotFound(kind) => {
                AppError::NotFound(format!("{} not found", capitalize(kind.as_str())))
            }
            AccessDenied::Forbidden => AppError::Forbidden(e.to_string()),
            AccessDenied::Lookup(e) => AppError::from(e),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => AppError::Conflict(msg),
            StoreError::Corrupt(msg) => AppError::Internal(msg),
            StoreError::Timeout(_) | StoreError::Db(_) => {
                AppError::DependencyUnavailable(e.to_string())
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return AppError::PayloadTooLarge("Request body too large".into());
        }
        AppError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskhub_core::models::resource::ResourceKind;

    #[test]
    fn auth_failures_are_401() {
        for e in [
            AuthError::MissingCredential,
            AuthError::ExpiredCredential,
            AuthError::InvalidRefreshToken,
        ] {
            let resp = AppError::from(e).into_response();
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn access_denied_maps_403_and_404() {
        let forbidden = AppError::from(AccessDenied::Forbidden).into_response();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

        let missing = AppError::from(AccessDenied::ResourceNotFound(ResourceKind::Project));
        assert!(matches!(&missing, AppError::NotFound(m) if m == "Project not found"));
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn store_failures_are_500() {
        let timeout = StoreError::Timeout(std::time::Duration::from_secs(1));
        let resp = AppError::from(AuthError::Dependency(timeout)).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn detail_travels_beside_the_body() {
        let resp = AppError::Internal("pool exhausted".into()).into_response();
        let report = resp.extensions().get::<ErrorReport>().cloned().unwrap();
        assert_eq!(report.message, "Internal server error");
        assert_eq!(report.detail, "pool exhausted");

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Internal server error");
        assert!(body.get("detail").is_none());
    }

    #[test]
    fn client_errors_carry_no_report() {
        let resp = AppError::Validation("title is required".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(resp.extensions().get::<ErrorReport>().is_none());
    }

    #[test]
    fn limit_errors_keep_their_status() {
        let large = AppError::PayloadTooLarge("Request body too large".into()).into_response();
        assert_eq!(large.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let many = AppError::TooManyRequests("Too many requests from this IP".into()).into_response();
        assert_eq!(many.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
