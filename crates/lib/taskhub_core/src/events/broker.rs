//! The seam between event code and the message transport.

use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::BrokerError;

/// How long another member's delivery may sit unacknowledged before a
/// subscriber takes it over.
pub const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(60);

/// How much acknowledgment `publish` waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckLevel {
    /// The primary accepted the write.
    Leader,
    /// The primary and the configured replica quorum accepted the write.
    All,
}

/// Broker acknowledgment of a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub topic: String,
    pub partition: u32,
    pub id: String,
    /// Replicas that confirmed the write, when `AckLevel::All` was requested.
    pub replicas: Option<u32>,
}

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: u32,
    pub id: String,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn receipt(&self) -> Receipt {
        Receipt {
            topic: self.topic.clone(),
            partition: self.partition,
            id: self.id.clone(),
        }
    }
}

/// Proof of processing, handed back to `commit`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Receipt {
    pub topic: String,
    pub partition: u32,
    pub id: String,
}

/// A partitioned, at-least-once message transport.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Append `payload` to the partition of `topic` selected by `key`.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        ack: AckLevel,
    ) -> Result<Ack, BrokerError>;

    /// Join consumer `group` on every partition of `topics` as `consumer`.
    ///
    /// Pending entries owned by other members that have been idle for the
    /// broker's claim threshold are reassigned to `consumer`.
    async fn subscribe(
        &self,
        topics: &[String],
        group: &str,
        consumer: &str,
    ) -> Result<Box<dyn Subscription>, BrokerError>;

    /// Release connections. Later calls fail.
    async fn shutdown(&self);
}

/// A live group membership.
///
/// Messages delivered but never committed stay pending on the member that
/// received them and are replayed when that member subscribes again, or
/// once idle long enough, to whichever member subscribes next.
#[async_trait]
pub trait Subscription: Send {
    /// Wait up to `block` for at most `max` messages. An empty batch means the
    /// wait elapsed.
    async fn poll(&mut self, max: usize, block: Duration) -> Result<Vec<Delivery>, BrokerError>;

    async fn commit(&mut self, receipts: &[Receipt]) -> Result<(), BrokerError>;
}

/// Stable partition for `key`: the same key always lands on the same
/// partition, across processes and restarts.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % u64::from(partitions.max(1))) as u32
}

/// Stream name of one partition.
pub fn partition_stream(topic: &str, partition: u32) -> String {
    format!("{topic}:{partition}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_is_stable_and_in_range() {
        for key in ["t1", "t2", "default", ""] {
            let p = partition_for(key, 3);
            assert!(p < 3);
            assert_eq!(p, partition_for(key, 3));
        }
        assert_eq!(partition_for("anything", 0), 0);
    }

    #[test]
    fn keys_spread_over_partitions() {
        let used: std::collections::HashSet<u32> =
            (0..64).map(|i| partition_for(&format!("tenant-{i}"), 3)).collect();
        assert_eq!(used.len(), 3);
    }
}
