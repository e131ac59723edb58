//! Rule lifecycle coordinator.
//!
//! ```text
//! PENDING ──(every partition acked)──▶ ACCEPTED ──(batch written)──▶ BOOTSTRAPPING
//! ```
//!
//! Workers acknowledge a rule by creating one child per partition under
//! `{rules_path}/{table}/denormalizer`. Once the child count equals the
//! configured partition count the rule is accepted. Accepted rules are then
//! handed to the backfill job as one batch written to
//! `{bootstrapper_path}/{jobId}`.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use denorm_core::CoordinatorConfig;
use denorm_metrics::Telemetry;
use denorm_state::{Rule, RuleRepository, RuleStatus, StateError};

use crate::deadline::within;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::namespace::{CoordinationNamespace, CreateMode, NamespaceError, make_path};

/// Namespace child under a rule's path that workers acknowledge into.
pub const ACK_NODE: &str = "denormalizer";

/// The parts of the coordinator config the lifecycle steps need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub partition_count: u32,
    pub rules_path: String,
    pub bootstrapper_path: String,
    pub operation_timeout: Duration,
}

impl From<&CoordinatorConfig> for LifecycleSettings {
    fn from(c: &CoordinatorConfig) -> Self {
        Self {
            partition_count: c.partition_count,
            rules_path: c.rules_path.clone(),
            bootstrapper_path: c.bootstrapper_path.clone(),
            operation_timeout: c.operation_timeout,
        }
    }
}

/// The record handed to the backfill job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapBatch {
    pub job_id: String,
    pub rules: Vec<Rule>,
    /// Unix millis.
    pub created_at: u64,
}

impl BootstrapBatch {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            job_id: format!("job-{}", Uuid::new_v4()),
            rules,
            created_at: epoch_millis(),
        }
    }
}

/// Outcome of step A.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AcceptReport {
    pub accepted: Vec<String>,
    /// Pending rules not yet fully acknowledged.
    pub waiting: Vec<String>,
}

/// Outcome of step B when there was something to bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub job_id: String,
    pub path: String,
    pub bootstrapped: Vec<String>,
    /// Rules in the batch whose status moved under us.
    pub conflicts: Vec<String>,
}

/// Outcome of one full cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleOutcome {
    pub accept: AcceptReport,
    pub bootstrap: Option<BootstrapReport>,
}

pub struct LifecycleCoordinator {
    repository: Arc<dyn RuleRepository>,
    namespace: Arc<dyn CoordinationNamespace>,
    settings: LifecycleSettings,
    telemetry: Option<Arc<Telemetry>>,
}

impl LifecycleCoordinator {
    pub fn new(
        repository: Arc<dyn RuleRepository>,
        namespace: Arc<dyn CoordinationNamespace>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            repository,
            namespace,
            settings,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Namespace path workers acknowledge `table` under.
    pub fn ack_path(&self, table: &str) -> String {
        make_path(&self.settings.rules_path, &[table, ACK_NODE])
    }

    /// Step A then step B.
    pub async fn run_cycle(&self) -> CoordinatorResult<CycleOutcome> {
        let accept = self.accept_acknowledged_rules().await?;
        let bootstrap = self.bootstrap_accepted_rules().await?;
        if let Some(t) = &self.telemetry {
            t.record_coordinator_cycle();
        }
        Ok(CycleOutcome { accept, bootstrap })
    }

    /// Step A: accept every pending rule the full fleet has acknowledged.
    ///
    /// Rules are checked in table order. A missing acknowledgment path means
    /// the rule is still waiting. Any other namespace failure, timeouts
    /// included, stops the walk and is returned as a fatal error; rules
    /// accepted before it stay accepted.
    pub async fn accept_acknowledged_rules(&self) -> CoordinatorResult<AcceptReport> {
        let mut report = AcceptReport::default();
        let result = self.accept_into(&mut report).await;
        if let Some(t) = &self.telemetry {
            t.record_accepted(report.accepted.len() as u64);
        }
        result.map(|()| report)
    }

    async fn accept_into(&self, report: &mut AcceptReport) -> CoordinatorResult<()> {
        let pending = self.repository.rules_with_status(RuleStatus::Pending)?;
        let expected = self.settings.partition_count as usize;

        for rule in pending {
            let path = self.ack_path(&rule.table);
            let acks = within(
                self.settings.operation_timeout,
                self.namespace.children(&path),
                || NamespaceError::Timeout {
                    op: "children",
                    path: path.clone(),
                    after: self.settings.operation_timeout,
                },
            )
            .await;

            let count = match acks {
                Ok(children) => children.len(),
                Err(NamespaceError::NoNode(_)) => {
                    info!(table = %rule.table, %path, "still waiting for rule to be acknowledged");
                    report.waiting.push(rule.table);
                    continue;
                }
                Err(source) => {
                    error!(table = %rule.table, %path, error = %source, "acknowledgment check failed");
                    return Err(CoordinatorError::Acknowledgment { path, source });
                }
            };

            if count != expected {
                if count > expected {
                    warn!(
                        table = %rule.table,
                        acks = count,
                        partitions = expected,
                        "more acknowledgments than partitions, not accepting"
                    );
                } else {
                    info!(
                        table = %rule.table,
                        acks = count,
                        partitions = expected,
                        "rule partially acknowledged"
                    );
                }
                report.waiting.push(rule.table);
                continue;
            }

            match self
                .repository
                .set_status(&rule.table, RuleStatus::Pending, RuleStatus::Accepted)
            {
                Ok(_) => {
                    info!(table = %rule.table, partitions = expected, "rule accepted");
                    report.accepted.push(rule.table);
                }
                Err(e @ StateError::StatusConflict { .. }) => {
                    warn!(table = %rule.table, error = %e, "rule changed status before acceptance");
                    if let Some(t) = &self.telemetry {
                        t.record_cas_conflicts(1);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Step B: write all accepted rules as one bootstrap batch, then move
    /// them to bootstrapping.
    ///
    /// Returns `Ok(None)` when nothing is accepted. If the batch write fails
    /// no status is touched, so the same rules are picked up next cycle.
    pub async fn bootstrap_accepted_rules(&self) -> CoordinatorResult<Option<BootstrapReport>> {
        let accepted = self.repository.rules_with_status(RuleStatus::Accepted)?;
        if accepted.is_empty() {
            debug!("no accepted rules to bootstrap");
            return Ok(None);
        }

        let batch = BootstrapBatch::new(accepted);
        let path = make_path(&self.settings.bootstrapper_path, &[&batch.job_id]);
        let payload = serde_json::to_vec(&batch)?;

        let written = within(
            self.settings.operation_timeout,
            self.namespace.create(&path, &payload, CreateMode::Persistent),
            || NamespaceError::Timeout {
                op: "create",
                path: path.clone(),
                after: self.settings.operation_timeout,
            },
        )
        .await;
        if let Err(source) = written {
            error!(job_id = %batch.job_id, %path, error = %source, "bootstrap batch write failed");
            if let Some(t) = &self.telemetry {
                t.record_batch_failure();
            }
            return Err(CoordinatorError::BatchWrite {
                job_id: batch.job_id,
                source,
            });
        }
        info!(job_id = %batch.job_id, %path, rules = batch.rules.len(), "bootstrap batch written");

        let mut bootstrapped = Vec::with_capacity(batch.rules.len());
        let mut conflicts = Vec::new();
        for rule in &batch.rules {
            match self.repository.set_status(
                &rule.table,
                RuleStatus::Accepted,
                RuleStatus::Bootstrapping,
            ) {
                Ok(_) => bootstrapped.push(rule.table.clone()),
                Err(e) => {
                    warn!(
                        table = %rule.table,
                        job_id = %batch.job_id,
                        error = %e,
                        "could not mark rule bootstrapping"
                    );
                    conflicts.push(rule.table.clone());
                }
            }
        }

        if let Some(t) = &self.telemetry {
            t.record_bootstrap_batch(bootstrapped.len() as u64);
            t.record_cas_conflicts(conflicts.len() as u64);
        }
        Ok(Some(BootstrapReport {
            job_id: batch.job_id,
            path,
            bootstrapped,
            conflicts,
        }))
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
