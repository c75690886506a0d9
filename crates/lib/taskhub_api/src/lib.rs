//! # taskhub_api
//!
//! HTTP API library for Taskhub.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod response;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use sqlx::PgPool;
use taskhub_core::auth::authenticator::Authenticator;
use taskhub_core::auth::jwt::{TokenConfig, TokenService};
use taskhub_core::auth::AuthError;
use taskhub_core::cache::{CacheBackend, CacheLayer};
use taskhub_core::events::{EventPublisher, MessageBroker, TopicRouter};
use taskhub_core::ownership::OwnershipGuard;
use taskhub_core::retry::RetryPolicy;
use taskhub_core::store::{ResourceStore, UserStore};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{auth, health, projects, tasks};
use crate::middleware::error_detail::expose_error_detail;
use crate::middleware::rate_limit::{RateLimiter, rate_limit};
use crate::middleware::security::SECURITY_HEADERS;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub users: Arc<dyn UserStore>,
    pub resources: Arc<dyn ResourceStore>,
    pub tokens: Arc<TokenService>,
    pub authenticator: Arc<Authenticator>,
    pub guard: Arc<OwnershipGuard>,
    pub cache: CacheLayer,
    pub events: EventPublisher,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Wire the pipeline components over the given stores and backends.
    ///
    /// Fails when the token secrets or lifetimes are unusable.
    pub fn new(
        config: ApiConfig,
        users: Arc<dyn UserStore>,
        resources: Arc<dyn ResourceStore>,
        cache_backend: Arc<dyn CacheBackend>,
        broker: Arc<dyn MessageBroker>,
    ) -> Result<Self, AuthError> {
        let tokens = Arc::new(TokenService::new(
            TokenConfig {
                access_secret: config.jwt_secret.clone(),
                refresh_secret: config.jwt_refresh_secret.clone(),
                access_ttl_secs: config.access_token_ttl_secs,
                refresh_ttl_secs: config.refresh_token_ttl_secs,
                store_timeout: config.store_timeout,
            },
            users.clone(),
        )?);
        let authenticator = Arc::new(Authenticator::new(
            tokens.clone(),
            users.clone(),
            config.store_timeout,
        ));
        let guard = Arc::new(OwnershipGuard::new(resources.clone(), config.store_timeout));
        let cache = CacheLayer::new(cache_backend, config.cache_timeout, config.cache_ttl);
        let events = EventPublisher::new(
            broker,
            TopicRouter::default(),
            RetryPolicy::default(),
            config.event_source.as_str(),
        );
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max,
            config.rate_limit_window,
        ));

        Ok(Self {
            config,
            users,
            resources,
            tokens,
            authenticator,
            guard,
            cache,
            events,
            rate_limiter,
        })
    }
}

/// Run embedded database migrations.
///
/// Delegates to `taskhub_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    taskhub_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
///
/// Outermost first: CORS, tracing, gzip compression, security headers,
/// per-IP rate limit, error detail exposure, body size limit.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route("/api", get(health::root))
        .route("/api/health", get(health::health))
        .route("/api/auth/register", post(auth::register_handler))
        .route("/api/auth/login", post(auth::login_handler))
        .route("/api/auth/refresh", post(auth::refresh_handler));

    // Protected routes (require auth)
    let protected = Router::new()
        .route(
            "/api/projects",
            get(projects::list_handler).post(projects::create_handler),
        )
        .route(
            "/api/projects/{id}",
            get(projects::get_handler)
                .put(projects::update_handler)
                .delete(projects::delete_handler),
        )
        .route("/api/tasks", post(tasks::create_handler))
        .route(
            "/api/tasks/project/{project_id}",
            get(tasks::list_for_project_handler),
        )
        .route(
            "/api/tasks/{id}",
            get(tasks::get_handler)
                .put(tasks::update_handler)
                .delete(tasks::delete_handler),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    let mut app = Router::new()
        .merge(public)
        .merge(protected)
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(state.config.body_limit_bytes))
        .layer(from_fn_with_state(state.clone(), expose_error_detail))
        .layer(from_fn_with_state(state.clone(), rate_limit));
    for (name, value) in SECURITY_HEADERS {
        app = app.layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static(*name),
            HeaderValue::from_static(*value),
        ));
    }
    app.layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
