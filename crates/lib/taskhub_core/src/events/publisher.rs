//! Event publication: encode, route, key, send with retry.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::broker::{Ack, AckLevel, MessageBroker};
use super::topic::TopicRouter;
use super::{PublishError, codec};
use crate::models::event::DomainEvent;
use crate::retry::RetryPolicy;

/// Sends domain events to the broker.
///
/// Cheap to clone; clones share the broker connection. Callers that must not
/// wait on the broker use [`EventPublisher::spawn_publish`] or
/// [`EventPublisher::emit`]: the business mutation has already committed by
/// the time an event exists, so a publish failure is logged and dropped.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn MessageBroker>,
    router: Arc<TopicRouter>,
    retry: RetryPolicy,
    source: Arc<str>,
}

impl EventPublisher {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        router: TopicRouter,
        retry: RetryPolicy,
        source: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            broker,
            router: Arc::new(router),
            retry,
            source: source.into(),
        }
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Publish and wait for the broker's acknowledgment.
    ///
    /// Connection-class errors are retried per the configured policy; all
    /// other failures return immediately. Either way the failure is logged.
    pub async fn publish(&self, event: &DomainEvent) -> Result<Ack, PublishError> {
        let topic = self.router.topic_for(&event.event_type);
        let key = event.partition_key();
        let result = self.send(event, topic, key).await;
        match &result {
            Ok(ack) => debug!(
                event_type = %event.event_type,
                topic,
                key,
                partition = ack.partition,
                id = %ack.id,
                "event published"
            ),
            Err(e) => error!(
                event_type = %event.event_type,
                topic,
                key,
                error = %e,
                "event publish failed"
            ),
        }
        result
    }

    async fn send(&self, event: &DomainEvent, topic: &str, key: &str) -> Result<Ack, PublishError> {
        let payload = codec::encode(&event.to_envelope())?;
        let ack = self
            .retry
            .retry("event publish", || {
                self.broker.publish(topic, key, &payload, AckLevel::All)
            })
            .await?;
        Ok(ack)
    }

    /// Publish on a detached task. The handle resolves once the publish has
    /// succeeded or exhausted its retries.
    pub fn spawn_publish(&self, event: DomainEvent) -> JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            let _ = publisher.publish(&event).await;
        })
    }

    /// Build an event stamped with this publisher's source and spawn its
    /// publication.
    pub fn emit(
        &self,
        event_type: &str,
        tenant_id: Option<&str>,
        payload: Value,
    ) -> JoinHandle<()> {
        let event = DomainEvent::new(
            event_type,
            tenant_id.map(str::to_string),
            payload,
            self.source.as_ref(),
        );
        self.spawn_publish(event)
    }

    pub async fn shutdown(&self) {
        self.broker.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::memory::MemoryBroker;
    use crate::events::topic::{GENERAL_TOPIC, USER_TOPIC};
    use crate::events::{BrokerError, Subscription};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails with a connection error a fixed number of times, then delegates.
    struct Flaky {
        failures: AtomicU32,
        inner: MemoryBroker,
        error: fn() -> BrokerError,
    }

    #[async_trait]
    impl MessageBroker for Flaky {
        async fn publish(
            &self,
            topic: &str,
            key: &str,
            payload: &[u8],
            ack: AckLevel,
        ) -> Result<Ack, BrokerError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err((self.error)());
            }
            self.inner.publish(topic, key, payload, ack).await
        }

        async fn subscribe(
            &self,
            topics: &[String],
            group: &str,
            consumer: &str,
        ) -> Result<Box<dyn Subscription>, BrokerError> {
            self.inner.subscribe(topics, group, consumer).await
        }

        async fn shutdown(&self) {}
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2,
        }
    }

    #[tokio::test]
    async fn routes_keys_and_compresses() {
        let broker = MemoryBroker::new(3);
        let publisher = EventPublisher::new(
            Arc::new(broker.clone()),
            TopicRouter::default(),
            policy(),
            "test",
        );
        let event = DomainEvent::new("user.created", Some("t1".into()), json!({"email": "a@b"}), "test");
        let ack = publisher.publish(&event).await.unwrap();
        assert_eq!(ack.topic, USER_TOPIC);

        let published = broker.published(USER_TOPIC).await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "t1");
        let envelope = codec::decode(&published[0].1).unwrap();
        assert_eq!(envelope.event_type, "user.created");
        assert_eq!(envelope.data["tenantId"], "t1");
    }

    #[tokio::test]
    async fn tenantless_events_use_default_key() {
        let broker = MemoryBroker::new(1);
        let publisher =
            EventPublisher::new(Arc::new(broker.clone()), TopicRouter::default(), policy(), "test");
        publisher.emit("system.started", None, json!({})).await.unwrap();
        let published = broker.published(GENERAL_TOPIC).await;
        assert_eq!(published[0].0, "default");
    }

    #[tokio::test(start_paused = true)]
    async fn connection_errors_are_retried() {
        let broker = MemoryBroker::new(1);
        let flaky = Flaky {
            failures: AtomicU32::new(2),
            inner: broker.clone(),
            error: || BrokerError::Connection("reset".into()),
        };
        let publisher = EventPublisher::new(Arc::new(flaky), TopicRouter::default(), policy(), "test");
        let event = DomainEvent::new("task.created", Some("t1".into()), json!({}), "test");
        assert!(publisher.publish(&event).await.is_ok());
        assert_eq!(broker.published("task-events").await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_error() {
        let flaky = Flaky {
            failures: AtomicU32::new(10),
            inner: MemoryBroker::new(1),
            error: || BrokerError::Connection("refused".into()),
        };
        let publisher = EventPublisher::new(Arc::new(flaky), TopicRouter::default(), policy(), "test");
        let event = DomainEvent::new("task.created", None, json!({}), "test");
        let err = publisher.publish(&event).await.unwrap_err();
        assert!(matches!(err, PublishError::Broker(BrokerError::Connection(_))));
    }

    #[tokio::test]
    async fn rejections_are_not_retried() {
        let flaky = Flaky {
            failures: AtomicU32::new(1),
            inner: MemoryBroker::new(1),
            error: || BrokerError::Rejected("quorum".into()),
        };
        let flaky = Arc::new(flaky);
        let publisher =
            EventPublisher::new(flaky.clone(), TopicRouter::default(), policy(), "test");
        let event = DomainEvent::new("task.created", None, json!({}), "test");
        assert!(publisher.publish(&event).await.is_err());
        assert!(flaky.inner.published("task-events").await.is_empty());
    }

    #[tokio::test]
    async fn spawned_publish_failure_does_not_panic() {
        let broker = MemoryBroker::new(1);
        broker.shutdown().await;
        let publisher =
            EventPublisher::new(Arc::new(broker), TopicRouter::default(), RetryPolicy::none(), "test");
        let handle = publisher.emit("project.deleted", Some("t1"), json!({}));
        assert!(handle.await.is_ok());
    }
}
