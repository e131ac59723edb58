//! Message broker administration.
//!
//! The coordinator only needs two things from the broker: make sure a topic
//! exists, and publish a record to it. [`LocalBroker`] keeps topics and
//! their partitions in memory for single-process deployments and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use denorm_state::fnv1a;

/// Result type alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("topic {0} already exists")]
    TopicExists(String),

    #[error("unknown topic {0}")]
    UnknownTopic(String),

    #[error("invalid topic {name}: {reason}")]
    InvalidTopic { name: String, reason: String },

    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// Shape of a topic to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u32,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>, partitions: u32, replication_factor: u32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
        }
    }
}

/// Where a published record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedRecord {
    pub partition: u32,
    pub offset: u64,
}

#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    /// Create a topic. Fails with `TopicExists` if the name is taken.
    async fn create_topic(&self, spec: &TopicSpec) -> BrokerResult<()>;

    /// Append one record. Keyed records always land on the same partition.
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> BrokerResult<PublishedRecord>;
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

struct Topic {
    spec: TopicSpec,
    partitions: Vec<Vec<Record>>,
    /// Round-robin cursor for unkeyed records.
    next_partition: u32,
}

/// In-memory [`BrokerAdmin`].
#[derive(Clone, Default)]
pub struct LocalBroker {
    topics: Arc<RwLock<HashMap<String, Topic>>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spec of an existing topic.
    pub async fn topic(&self, name: &str) -> Option<TopicSpec> {
        self.topics.read().await.get(name).map(|t| t.spec.clone())
    }

    /// All records of a topic, partition by partition.
    pub async fn records(&self, name: &str) -> BrokerResult<Vec<Record>> {
        let topics = self.topics.read().await;
        let topic = topics
            .get(name)
            .ok_or_else(|| BrokerError::UnknownTopic(name.to_string()))?;
        Ok(topic.partitions.iter().flatten().cloned().collect())
    }
}

#[async_trait]
impl BrokerAdmin for LocalBroker {
    async fn create_topic(&self, spec: &TopicSpec) -> BrokerResult<()> {
        let invalid = |reason: &str| BrokerError::InvalidTopic {
            name: spec.name.clone(),
            reason: reason.to_string(),
        };
        if spec.name.trim().is_empty() {
            return Err(invalid("empty name"));
        }
        if spec.partitions == 0 {
            return Err(invalid("partition count must be positive"));
        }
        if spec.replication_factor == 0 {
            return Err(invalid("replication factor must be positive"));
        }

        let mut topics = self.topics.write().await;
        if topics.contains_key(&spec.name) {
            return Err(BrokerError::TopicExists(spec.name.clone()));
        }
        topics.insert(
            spec.name.clone(),
            Topic {
                spec: spec.clone(),
                partitions: vec![Vec::new(); spec.partitions as usize],
                next_partition: 0,
            },
        );
        debug!(topic = %spec.name, partitions = spec.partitions, "topic created");
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> BrokerResult<PublishedRecord> {
        let mut topics = self.topics.write().await;
        let t = topics
            .get_mut(topic)
            .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;

        let count = t.spec.partitions;
        let partition = match key {
            Some(k) => (fnv1a(k) % u64::from(count)) as u32,
            None => {
                let p = t.next_partition;
                t.next_partition = (p + 1) % count;
                p
            }
        };
        let log = &mut t.partitions[partition as usize];
        log.push(Record {
            key: key.map(str::to_string),
            payload: payload.to_vec(),
        });
        let offset = (log.len() - 1) as u64;
        debug!(%topic, partition, offset, "record published");
        Ok(PublishedRecord { partition, offset })
    }
}
