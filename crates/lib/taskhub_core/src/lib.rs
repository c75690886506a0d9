//! # taskhub_core
//!
//! The request pipeline shared by every Taskhub entry point: token issuance
//! and verification, tenant-scoped ownership checks, the read-through
//! response cache, and domain-event publication and consumption.

pub mod auth;
pub mod cache;
pub mod events;
pub mod migrate;
pub mod models;
pub mod ownership;
pub mod retry;
pub mod store;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
