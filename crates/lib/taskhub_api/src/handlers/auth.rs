//! Authentication request handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum_extra::extract::WithRejection;
use taskhub_core::models::auth::TokenPair;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{AuthResponse, LoginRequest, RefreshRequest, RegisterRequest};
use crate::response::{ApiResponse, created};
use crate::services::auth;

/// `POST /api/auth/register` — create a user and sign them in.
pub async fn register_handler(
    State(state): State<AppState>,
    WithRejection(Json(body), _): WithRejection<Json<RegisterRequest>, AppError>,
) -> AppResult<(StatusCode, ApiResponse<AuthResponse>)> {
    let resp = auth::register(&state, body).await?;
    Ok(created(resp, "User registered successfully"))
}

/// `POST /api/auth/login` — authenticate with email, password and tenant.
pub async fn login_handler(
    State(state): State<AppState>,
    WithRejection(Json(body), _): WithRejection<Json<LoginRequest>, AppError>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let resp = auth::login(&state, body).await?;
    Ok(ApiResponse::new(resp).with_message("Login successful"))
}

/// `POST /api/auth/refresh` — exchange a refresh token for a new pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    WithRejection(Json(body), _): WithRejection<Json<RefreshRequest>, AppError>,
) -> AppResult<ApiResponse<TokenPair>> {
    let tokens = auth::refresh(&state, body).await?;
    Ok(ApiResponse::new(tokens).with_message("Token refreshed successfully"))
}
