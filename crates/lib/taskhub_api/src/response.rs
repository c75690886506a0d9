//! Success envelopes and cached JSON responses.

use axum::Json;
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use taskhub_core::cache::CachedBody;

use crate::error::{AppError, AppResult};

/// Header reporting whether a GET was served from cache.
pub static X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// ISO-8601 UTC timestamp with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `{ success: true, data, timestamp[, message] }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            timestamp: timestamp(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }

    /// Serialize for caching.
    pub fn to_bytes(&self) -> AppResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| AppError::Internal(e.to_string()))
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// `201 Created` with the success envelope.
pub fn created<T: Serialize>(data: T, message: &'static str) -> (StatusCode, ApiResponse<T>) {
    (StatusCode::CREATED, ApiResponse::new(data).with_message(message))
}

/// Pre-serialized JSON body that came through the read-through cache.
pub struct CachedJson(pub CachedBody);

impl IntoResponse for CachedJson {
    fn into_response(self) -> Response {
        let status = if self.0.hit { "HIT" } else { "MISS" };
        (
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
                (X_CACHE.clone(), HeaderValue::from_static(status)),
            ],
            self.0.bytes,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let body = serde_json::to_value(ApiResponse::new(1).with_message("done")).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"], 1);
        assert_eq!(body["message"], "done");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));

        let bare = serde_json::to_value(ApiResponse::new("x")).unwrap();
        assert!(bare.get("message").is_none());
    }

    #[test]
    fn cached_json_sets_header() {
        let resp = CachedJson(CachedBody {
            bytes: b"{}".to_vec(),
            hit: true,
        })
        .into_response();
        assert_eq!(resp.headers()[&X_CACHE], "HIT");
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    }
}
