//! Topic provisioning at coordinator startup.
//!
//! Ensures the bootstrap-notification topic (one partition per worker
//! partition) and the single-partition shutdown topic exist, then publishes
//! one [`GenerationMarker`] to the shutdown topic so workers can tell that a
//! new coordinator generation has started.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use denorm_core::{BrokerConfig, CoordinatorConfig};

use crate::broker::{BrokerAdmin, BrokerError, TopicSpec};
use crate::deadline::within;
use crate::error::{CoordinatorError, CoordinatorResult};

/// Retries after the first marker publish attempt.
const MAX_PUBLISH_RETRIES: u32 = 2;

/// Sentinel published once per coordinator generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMarker {
    pub generation: Uuid,
    /// Unix millis.
    pub issued_at: u64,
    pub issuer: String,
}

impl GenerationMarker {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            generation: Uuid::new_v4(),
            issued_at: epoch_millis(),
            issuer: issuer.into(),
        }
    }
}

pub struct TopicProvisioner {
    broker: Arc<dyn BrokerAdmin>,
    bootstrap: TopicSpec,
    shutdown: TopicSpec,
    operation_timeout: Duration,
    issuer: String,
}

impl TopicProvisioner {
    pub fn new(
        broker: Arc<dyn BrokerAdmin>,
        coordinator: &CoordinatorConfig,
        topics: &BrokerConfig,
    ) -> Self {
        Self {
            broker,
            bootstrap: TopicSpec::new(
                &topics.bootstrap_topic,
                coordinator.partition_count,
                coordinator.replication_factor,
            ),
            shutdown: TopicSpec::new(&topics.shutdown_topic, 1, coordinator.replication_factor),
            operation_timeout: coordinator.operation_timeout,
            issuer: "denorm-coordinator".to_string(),
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Ensure both topics exist and publish the generation marker.
    ///
    /// Any error is fatal to coordinator startup.
    pub async fn provision(&self) -> CoordinatorResult<GenerationMarker> {
        self.ensure_topic(&self.bootstrap).await?;
        self.ensure_topic(&self.shutdown).await?;

        let marker = GenerationMarker::new(&self.issuer);
        self.publish_marker(&marker).await?;
        info!(
            generation = %marker.generation,
            topic = %self.shutdown.name,
            "generation marker published"
        );
        Ok(marker)
    }

    /// Create `spec` unless it already exists. An existing topic is left
    /// untouched, even if its shape differs.
    pub async fn ensure_topic(&self, spec: &TopicSpec) -> CoordinatorResult<()> {
        let result = within(
            self.operation_timeout,
            self.broker.create_topic(spec),
            || timed_out("create_topic", self.operation_timeout),
        )
        .await;

        match result {
            Ok(()) => {
                info!(
                    topic = %spec.name,
                    partitions = spec.partitions,
                    replication_factor = spec.replication_factor,
                    "topic created"
                );
                Ok(())
            }
            Err(BrokerError::TopicExists(_)) => {
                info!(topic = %spec.name, "topic already exists, proceeding without creation");
                Ok(())
            }
            Err(source) => Err(CoordinatorError::Provisioning {
                topic: spec.name.clone(),
                source,
            }),
        }
    }

    async fn publish_marker(&self, marker: &GenerationMarker) -> CoordinatorResult<()> {
        let payload = serde_json::to_vec(marker)?;
        let attempts = MAX_PUBLISH_RETRIES + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = within(
                self.operation_timeout,
                self.broker.publish(&self.shutdown.name, None, &payload),
                || timed_out("publish", self.operation_timeout),
            )
            .await;

            match result {
                Ok(_) => return Ok(()),
                Err(source) if attempt >= attempts => {
                    return Err(CoordinatorError::MarkerPublish { attempts, source });
                }
                Err(e) => {
                    warn!(attempt, error = %e, "generation marker publish failed, retrying");
                }
            }
        }
    }
}

fn timed_out(op: &str, after: Duration) -> BrokerError {
    BrokerError::Unavailable(format!("{op} timed out after {after:?}"))
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
