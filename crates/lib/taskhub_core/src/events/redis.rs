//! Redis Streams broker.
//!
//! Each topic is split into `partitions` streams named `<topic>:<p>`; a key
//! always maps to the same stream, so one tenant's events keep their order.
//! Consumer groups give at-least-once delivery: entries stay in the group's
//! pending list until `XACK`, and a re-subscribing consumer reads its own
//! pending history before new entries. Entries another member has left idle
//! past the claim threshold are taken over with `XAUTOCLAIM` (Redis 6.2+) on
//! subscribe, so work stranded by an instance that never comes back is
//! still processed.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::Value;
use redis::streams::StreamReadReply;
use tracing::{debug, info};

use super::BrokerError;
use super::broker::{
    Ack, AckLevel, Delivery, MessageBroker, Receipt, Subscription, partition_for, partition_stream,
};
use crate::cache::redis::create_pool;
use crate::retry::RetryPolicy;

const KEY_FIELD: &str = "k";
const PAYLOAD_FIELD: &str = "d";
const CLAIM_BATCH: usize = 100;

/// Connection and durability settings.
#[derive(Debug, Clone)]
pub struct RedisBrokerConfig {
    pub url: String,
    pub partitions: u32,
    /// Replicas that must confirm a write for `AckLevel::All`. Zero skips `WAIT`.
    pub min_replicas: u32,
    pub pool_size: usize,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Idle time after which another member's pending entries are claimed.
    pub claim_idle: Duration,
}

/// Broker over a shared `deadpool-redis` pool.
#[derive(Clone)]
pub struct RedisStreamBroker {
    pool: Pool,
    partitions: u32,
    min_replicas: u32,
    request_timeout: Duration,
    claim_idle: Duration,
}

fn redis_error(e: redis::RedisError) -> BrokerError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
    {
        BrokerError::Connection(e.to_string())
    } else {
        BrokerError::Protocol(e.to_string())
    }
}

async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, BrokerError>
where
    F: Future<Output = Result<T, BrokerError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| BrokerError::Timeout(timeout))?
}

async fn checkout(pool: &Pool) -> Result<deadpool_redis::Connection, BrokerError> {
    pool.get()
        .await
        .map_err(|e| BrokerError::Connection(e.to_string()))
}

impl RedisStreamBroker {
    /// Build the pool and verify the server answers, retrying
    /// connection-class failures per `retry`.
    pub async fn connect(config: &RedisBrokerConfig, retry: &RetryPolicy) -> Result<Self, BrokerError> {
        let pool = create_pool(&config.url, config.pool_size, config.connect_timeout)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let broker = Self {
            pool,
            partitions: config.partitions.max(1),
            min_replicas: config.min_replicas,
            request_timeout: config.request_timeout,
            claim_idle: config.claim_idle,
        };
        retry.retry("redis broker connect", || broker.ping()).await?;
        info!(partitions = broker.partitions, "redis stream broker connected");
        Ok(broker)
    }

    async fn ping(&self) -> Result<(), BrokerError> {
        bounded(self.request_timeout, async {
            let mut conn = checkout(&self.pool).await?;
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(redis_error)?;
            Ok(())
        })
        .await
    }

    /// Move every entry of `stream` idle for `claim_idle` to `consumer`.
    async fn claim_stale(
        &self,
        conn: &mut deadpool_redis::Connection,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<usize, BrokerError> {
        let mut cursor = "0-0".to_string();
        let mut claimed = 0;
        loop {
            let reply: Value = redis::cmd("XAUTOCLAIM")
                .arg(stream)
                .arg(group)
                .arg(consumer)
                .arg(self.claim_idle.as_millis() as u64)
                .arg(&cursor)
                .arg("COUNT")
                .arg(CLAIM_BATCH)
                .arg("JUSTID")
                .query_async(conn)
                .await
                .map_err(redis_error)?;
            let (next, ids) = parse_autoclaim(&reply)?;
            claimed += ids;
            if next == "0-0" {
                return Ok(claimed);
            }
            cursor = next;
        }
    }
}

/// `XAUTOCLAIM ... JUSTID` reply: next cursor and the number of ids moved.
fn parse_autoclaim(reply: &Value) -> Result<(String, usize), BrokerError> {
    let Value::Array(items) = reply else {
        return Err(BrokerError::Protocol(format!("unexpected XAUTOCLAIM reply {reply:?}")));
    };
    let (Some(cursor), Some(ids)) = (items.first(), items.get(1)) else {
        return Err(BrokerError::Protocol("short XAUTOCLAIM reply".into()));
    };
    let cursor: String = redis::from_redis_value(cursor).map_err(redis_error)?;
    let ids: Vec<String> = redis::from_redis_value(ids).map_err(redis_error)?;
    Ok((cursor, ids.len()))
}

#[async_trait]
impl MessageBroker for RedisStreamBroker {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        ack: AckLevel,
    ) -> Result<Ack, BrokerError> {
        let partition = partition_for(key, self.partitions);
        let stream = partition_stream(topic, partition);
        bounded(self.request_timeout, async {
            let mut conn = checkout(&self.pool).await?;
            let id: String = redis::cmd("XADD")
                .arg(&stream)
                .arg("*")
                .arg(KEY_FIELD)
                .arg(key)
                .arg(PAYLOAD_FIELD)
                .arg(payload)
                .query_async(&mut conn)
                .await
                .map_err(redis_error)?;

            let replicas = if ack == AckLevel::All && self.min_replicas > 0 {
                let confirmed: u32 = redis::cmd("WAIT")
                    .arg(self.min_replicas)
                    .arg(self.request_timeout.as_millis() as u64)
                    .query_async(&mut conn)
                    .await
                    .map_err(redis_error)?;
                if confirmed < self.min_replicas {
                    return Err(BrokerError::Rejected(format!(
                        "{stream} {id}: {confirmed} of {} replicas acknowledged",
                        self.min_replicas
                    )));
                }
                Some(confirmed)
            } else {
                None
            };

            Ok(Ack {
                topic: topic.to_string(),
                partition,
                id,
                replicas,
            })
        })
        .await
    }

    async fn subscribe(
        &self,
        topics: &[String],
        group: &str,
        consumer: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let mut streams = Vec::new();
        bounded(self.request_timeout, async {
            let mut conn = checkout(&self.pool).await?;
            for topic in topics {
                for partition in 0..self.partitions {
                    let stream = partition_stream(topic, partition);
                    let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                        .arg("CREATE")
                        .arg(&stream)
                        .arg(group)
                        .arg("$")
                        .arg("MKSTREAM")
                        .query_async(&mut conn)
                        .await;
                    match created {
                        Ok(()) => debug!(stream, group, "consumer group created"),
                        Err(e) if e.code() == Some("BUSYGROUP") => {}
                        Err(e) => return Err(redis_error(e)),
                    }
                    let claimed = self.claim_stale(&mut conn, &stream, group, consumer).await?;
                    if claimed > 0 {
                        info!(stream, group, consumer, claimed, "claimed idle pending entries");
                    }
                    streams.push((topic.clone(), partition, stream));
                }
            }
            Ok(())
        })
        .await?;

        let replay_from = streams.iter().map(|(_, _, s)| (s.clone(), "0".to_string())).collect();
        Ok(Box::new(RedisSubscription {
            pool: self.pool.clone(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            streams,
            replay_from: Some(replay_from),
            request_timeout: self.request_timeout,
        }))
    }

    async fn shutdown(&self) {
        self.pool.close();
    }
}

struct RedisSubscription {
    pool: Pool,
    group: String,
    consumer: String,
    streams: Vec<(String, u32, String)>,
    /// While replaying this consumer's pending list: last id seen per stream.
    replay_from: Option<HashMap<String, String>>,
    request_timeout: Duration,
}

impl RedisSubscription {
    async fn read(
        &self,
        ids: Vec<String>,
        max: usize,
        block: Option<Duration>,
    ) -> Result<Vec<Delivery>, BrokerError> {
        let mut conn = checkout(&self.pool).await?;
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(max);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis().max(1) as u64);
        }
        cmd.arg("STREAMS");
        for (_, _, stream) in &self.streams {
            cmd.arg(stream);
        }
        for id in &ids {
            cmd.arg(id);
        }

        let reply: Option<StreamReadReply> = cmd.query_async(&mut conn).await.map_err(redis_error)?;
        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let locate: HashMap<&str, (&str, u32)> = self
            .streams
            .iter()
            .map(|(topic, partition, stream)| (stream.as_str(), (topic.as_str(), *partition)))
            .collect();
        let mut out = Vec::new();
        for stream_key in reply.keys {
            let Some(&(topic, partition)) = locate.get(stream_key.key.as_str()) else {
                continue;
            };
            for entry in stream_key.ids {
                // Trimmed entries come back with no fields; an empty payload
                // fails decoding and is committed like any malformed message.
                out.push(Delivery {
                    topic: topic.to_string(),
                    partition,
                    key: entry.get::<String>(KEY_FIELD),
                    payload: entry.get::<Vec<u8>>(PAYLOAD_FIELD).unwrap_or_default(),
                    id: entry.id,
                });
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn poll(&mut self, max: usize, block: Duration) -> Result<Vec<Delivery>, BrokerError> {
        let max = max.max(1);
        if let Some(replay_from) = &self.replay_from {
            let ids = self
                .streams
                .iter()
                .map(|(_, _, s)| replay_from.get(s).cloned().unwrap_or_else(|| "0".into()))
                .collect();
            let pending = bounded(self.request_timeout, self.read(ids, max, None)).await?;
            if pending.len() < max {
                debug!(replayed = pending.len(), "pending history drained");
                self.replay_from = None;
            } else if let Some(replay_from) = self.replay_from.as_mut() {
                for delivery in &pending {
                    replay_from.insert(
                        partition_stream(&delivery.topic, delivery.partition),
                        delivery.id.clone(),
                    );
                }
            }
            if !pending.is_empty() {
                return Ok(pending);
            }
        }

        let ids = vec![">".to_string(); self.streams.len()];
        bounded(block + self.request_timeout, self.read(ids, max, Some(block))).await
    }

    async fn commit(&mut self, receipts: &[Receipt]) -> Result<(), BrokerError> {
        if receipts.is_empty() {
            return Ok(());
        }
        let mut by_stream: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for receipt in receipts {
            by_stream
                .entry(partition_stream(&receipt.topic, receipt.partition))
                .or_default()
                .push(&receipt.id);
        }
        bounded(self.request_timeout, async {
            let mut conn = checkout(&self.pool).await?;
            for (stream, ids) in &by_stream {
                let acked: u64 = redis::cmd("XACK")
                    .arg(stream)
                    .arg(&self.group)
                    .arg(ids)
                    .query_async(&mut conn)
                    .await
                    .map_err(redis_error)?;
                debug!(stream, acked, "committed");
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn autoclaim_reply_yields_cursor_and_count() {
        let reply = Value::Array(vec![
            bulk("1700000000000-3"),
            Value::Array(vec![bulk("1700000000000-1"), bulk("1700000000000-2")]),
            Value::Array(vec![]),
        ]);
        let (cursor, claimed) = parse_autoclaim(&reply).unwrap();
        assert_eq!(cursor, "1700000000000-3");
        assert_eq!(claimed, 2);

        let done = Value::Array(vec![bulk("0-0"), Value::Array(vec![])]);
        assert_eq!(parse_autoclaim(&done).unwrap(), ("0-0".to_string(), 0));
    }

    #[test]
    fn malformed_autoclaim_reply_is_a_protocol_error() {
        assert!(matches!(parse_autoclaim(&Value::Nil), Err(BrokerError::Protocol(_))));
        assert!(matches!(
            parse_autoclaim(&Value::Array(vec![bulk("0-0")])),
            Err(BrokerError::Protocol(_))
        ));
    }
}
