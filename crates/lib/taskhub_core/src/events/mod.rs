//! Domain-event publication and consumption over a partitioned broker.
//!
//! Events are routed to a topic by type prefix ([`TopicRouter`]), encoded as
//! gzip-compressed JSON envelopes ([`codec`]) and keyed by tenant so that
//! one tenant's events stay ordered within a partition.

pub mod broker;
pub mod codec;
pub mod consumer;
pub mod handlers;
pub mod memory;
pub mod publisher;
pub mod redis;
pub mod topic;

use std::time::Duration;

use thiserror::Error;

pub use broker::{Ack, AckLevel, Delivery, MessageBroker, Receipt, Subscription};
pub use consumer::{ConsumerConfig, ConsumerState, EventConsumer, EventHandler};
pub use publisher::EventPublisher;
pub use topic::TopicRouter;

use crate::retry::Retryable;

/// Broker transport errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Broker call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Broker rejected the request: {0}")]
    Rejected(String),

    #[error("Broker protocol error: {0}")]
    Protocol(String),
}

impl Retryable for BrokerError {
    fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Connection(_) | BrokerError::Timeout(_))
    }
}

/// Why an event could not be published.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] codec::CodecError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Failure reported by an [`EventHandler`]. Logged, never fatal to the consumer.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
