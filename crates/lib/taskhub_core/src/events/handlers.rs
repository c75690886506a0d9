//! Built-in handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::HandlerError;
use super::consumer::{EventConsumer, EventHandler};
use crate::models::event::DomainEvent;

/// Event types the logging handler understands.
pub const LOGGED_EVENT_TYPES: &[&str] = &[
    "user.created",
    "user.updated",
    "user.deleted",
    "project.created",
    "project.updated",
    "project.deleted",
    "task.created",
    "task.updated",
    "task.deleted",
];

/// Writes one audit line per lifecycle event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl LoggingHandler {
    /// Register this handler for every type in [`LOGGED_EVENT_TYPES`].
    pub fn register_all(consumer: &mut EventConsumer) {
        let handler: Arc<dyn EventHandler> = Arc::new(Self);
        for event_type in LOGGED_EVENT_TYPES {
            consumer.register(*event_type, handler.clone());
        }
    }
}

fn field<'a>(event: &'a DomainEvent, name: &str) -> &'a str {
    event.payload.get(name).and_then(Value::as_str).unwrap_or("-")
}

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        let tenant_id = event.tenant_id.as_deref().unwrap_or("-");
        let (resource, action) = event
            .event_type
            .split_once('.')
            .ok_or_else(|| HandlerError::new(format!("untyped event {}", event.event_type)))?;
        let subject = match resource {
            "user" => field(event, "email"),
            "project" => field(event, "name"),
            "task" => field(event, "title"),
            other => return Err(HandlerError::new(format!("no log format for {other} events"))),
        };
        info!(tenant_id, resource, action, subject, source = %event.source, "domain event");
        Ok(())
    }
}
