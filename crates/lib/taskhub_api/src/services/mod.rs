//! Business operations behind the handlers.
//!
//! Mutations follow one order: store commit, cache invalidation, detached
//! event publish. The response is only built after invalidation returns.

pub mod auth;
pub mod projects;
pub mod tasks;

use std::future::Future;

use taskhub_core::store::{StoreError, bounded};

use crate::AppState;
use crate::error::AppResult;

/// Run a store call under the configured deadline.
pub(crate) async fn store<T, F>(state: &AppState, call: F) -> AppResult<T>
where
    F: Future<Output = Result<T, StoreError>>,
{
    Ok(bounded(state.config.store_timeout, call).await?)
}
