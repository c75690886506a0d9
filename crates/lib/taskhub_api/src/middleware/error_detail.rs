//! Folds internal error detail into error bodies when the deployment
//! allows it.

use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;
use crate::error::{ErrorReport, error_response};

/// Axum middleware: strips the [`ErrorReport`] extension from every
/// response and, outside production, re-renders the error body with its
/// `detail`.
pub async fn expose_error_detail(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let Some(report) = response.extensions_mut().remove::<ErrorReport>() else {
        return response;
    };
    if !state.config.expose_error_detail() {
        return response;
    }
    let (mut parts, _) = response.into_parts();
    let (_, body) = error_response(parts.status, &report.message, Some(&report.detail)).into_parts();
    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, body)
}
