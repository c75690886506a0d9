//! Per-client request limits over fixed windows.
//!
//! Clients are identified by peer address, so the server must be run with
//! `into_make_service_with_connect_info::<SocketAddr>()`. Requests without
//! connection info share one unspecified-address bucket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::AppState;
use crate::error::AppError;

/// Expired windows are swept once this many clients are tracked.
const SWEEP_THRESHOLD: usize = 10_000;

static LIMIT_HEADER: HeaderName = HeaderName::from_static("ratelimit-limit");
static REMAINING_HEADER: HeaderName = HeaderName::from_static("ratelimit-remaining");
static RESET_HEADER: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Result of counting one request against its client's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

impl Quota {
    /// Whole seconds until the window resets, rounded up.
    pub fn reset_secs(&self) -> u64 {
        self.reset_after.as_secs() + u64::from(self.reset_after.subsec_nanos() > 0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    hits: u32,
}

/// Fixed-window request counter keyed by client address.
#[derive(Debug)]
pub struct RateLimiter {
    max: u32,
    window: Duration,
    clients: DashMap<IpAddr, Window>,
}

impl RateLimiter {
    /// Allow `max` requests per client in each `window`. Zero disables the
    /// limit.
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            max,
            window,
            clients: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max > 0 && !self.window.is_zero()
    }

    /// Count one request from `client`.
    pub fn check(&self, client: IpAddr) -> Quota {
        let now = Instant::now();
        if self.clients.len() > SWEEP_THRESHOLD {
            self.sweep(now);
        }
        let mut window = self.clients.entry(client).or_insert(Window {
            started: now,
            hits: 0,
        });
        if now.duration_since(window.started) >= self.window {
            *window = Window {
                started: now,
                hits: 0,
            };
        }
        window.hits = window.hits.saturating_add(1);
        Quota {
            allowed: window.hits <= self.max,
            limit: self.max,
            remaining: self.max.saturating_sub(window.hits),
            reset_after: self
                .window
                .saturating_sub(now.duration_since(window.started)),
        }
    }

    fn sweep(&self, now: Instant) {
        self.clients
            .retain(|_, w| now.duration_since(w.started) < self.window);
    }
}

fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |ConnectInfo(addr)| {
            addr.ip()
        })
}

fn quota_headers(headers: &mut HeaderMap, quota: &Quota) {
    headers.insert(LIMIT_HEADER.clone(), HeaderValue::from(quota.limit));
    headers.insert(REMAINING_HEADER.clone(), HeaderValue::from(quota.remaining));
    headers.insert(RESET_HEADER.clone(), HeaderValue::from(quota.reset_secs()));
}

/// Axum middleware: rejects with 429 once the client's window is spent.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let limiter = &state.rate_limiter;
    if !limiter.is_enabled() {
        return next.run(request).await;
    }
    let client = client_ip(&request);
    let quota = limiter.check(client);
    let mut response = if quota.allowed {
        next.run(request).await
    } else {
        debug!(%client, limit = quota.limit, "rate limit exceeded");
        let mut response =
            AppError::TooManyRequests("Too many requests from this IP".into()).into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(quota.reset_secs()));
        response
    };
    quota_headers(response.headers_mut(), &quota);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[tokio::test(start_paused = true)]
    async fn window_allows_max_then_rejects_until_reset() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        for remaining in [2, 1, 0] {
            let quota = limiter.check(A);
            assert!(quota.allowed);
            assert_eq!(quota.remaining, remaining);
        }
        let rejected = limiter.check(A);
        assert!(!rejected.allowed);
        assert_eq!(rejected.reset_secs(), 60);

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(limiter.check(A).reset_secs(), 15);

        tokio::time::advance(Duration::from_secs(15)).await;
        let fresh = limiter.check(A);
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clients_are_counted_separately() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check(A).allowed);
        assert!(!limiter.check(A).allowed);
        assert!(limiter.check(B).allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_windows_are_swept() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1));
        for n in 0..=SWEEP_THRESHOLD as u32 {
            limiter.check(IpAddr::V4(Ipv4Addr::from(n)));
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        limiter.check(A);
        assert_eq!(limiter.clients.len(), 1);
    }

    #[test]
    fn zero_disables() {
        assert!(!RateLimiter::new(0, Duration::from_secs(60)).is_enabled());
        assert!(RateLimiter::new(100, Duration::from_secs(900)).is_enabled());
    }
}
