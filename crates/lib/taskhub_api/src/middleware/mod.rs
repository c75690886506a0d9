//! Request middleware.

pub mod auth;
pub mod error_detail;
pub mod rate_limit;
pub mod security;
