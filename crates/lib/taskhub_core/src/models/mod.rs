//! Domain models.
//!
//! These are internal domain types, distinct from the API request/response
//! bodies in `taskhub_api` (which carry `camelCase` renames and envelopes).

pub mod auth;
pub mod event;
pub mod resource;
