//! Determination engine — turns the priority distribution into rules.
//!
//! Each cycle re-scores every shape, derives a promotion threshold from the
//! whole population and walks the shapes from most to least valuable:
//!
//! - at or above threshold without a rule: synthesize one and submit it as
//!   `PENDING`, unless the outstanding-rule capacity is spent
//! - at or above threshold with a rule: leave it
//! - below threshold with a rule: record a `Revoke` decision (never applied)
//!
//! A failure on one shape is logged and skipped; the rest of the cycle
//! still runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use denorm_metrics::Telemetry;
use denorm_priority::{PriorityAggregator, ShapeSnapshot};
use denorm_state::{Rule, RuleRepository, StateError};

use crate::selection::{Transition, decide, promotion_threshold};
use crate::synthesis::synthesize;

/// Outcome of one determination cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// `None` when no shapes were tracked.
    pub threshold: Option<i64>,
    /// Tables of rules submitted this cycle.
    pub submitted: Vec<String>,
    /// Tables of repository rules a shape took ownership of.
    pub adopted: Vec<String>,
    /// Queries denied a rule because capacity was spent.
    pub refused: Vec<String>,
    /// Queries whose rule could not be synthesized or submitted.
    pub failed: Vec<String>,
    /// Tables whose shape fell below threshold.
    pub revocations: Vec<String>,
}

pub struct DeterminationEngine {
    aggregator: PriorityAggregator,
    repository: Arc<dyn RuleRepository>,
    max_rule_capacity: usize,
    telemetry: Option<Arc<Telemetry>>,
}

impl DeterminationEngine {
    pub fn new(
        aggregator: PriorityAggregator,
        repository: Arc<dyn RuleRepository>,
        max_rule_capacity: usize,
    ) -> Self {
        Self {
            aggregator,
            repository,
            max_rule_capacity,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Run one full determination cycle.
    ///
    /// Only a failure to read the repository at the start of the cycle is
    /// returned as an error; per-shape failures are reported in the
    /// [`CycleReport`].
    pub async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        self.aggregator.rescore_all().await;
        let mut shapes = self.aggregator.snapshot().await;

        let threshold = promotion_threshold(shapes.iter().map(|s| s.priority));
        let mut report = CycleReport {
            threshold,
            ..Default::default()
        };
        let Some(threshold) = threshold else {
            debug!("no query shapes tracked, nothing to determine");
            self.record(&report);
            return Ok(report);
        };

        let mut known: HashMap<String, Rule> = self
            .repository
            .list_rules()?
            .into_iter()
            .map(|r| (r.table.clone(), r))
            .collect();
        let mut outstanding = known.len();

        shapes.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.normalized_query.cmp(&b.normalized_query))
        });

        for shape in &shapes {
            match decide(shape.priority, threshold, shape.rule.is_some()) {
                Transition::Promote => {
                    self.promote(shape, &mut known, &mut outstanding, &mut report)
                        .await;
                }
                Transition::Revoke => {
                    if let Some(rule) = &shape.rule {
                        info!(
                            table = %rule.table,
                            priority = shape.priority,
                            threshold,
                            "shape fell below threshold, rule kept"
                        );
                        report.revocations.push(rule.table.clone());
                    }
                }
                Transition::Keep | Transition::Ignore => {}
            }
        }

        info!(
            threshold,
            shapes = shapes.len(),
            submitted = report.submitted.len(),
            adopted = report.adopted.len(),
            refused = report.refused.len(),
            failed = report.failed.len(),
            "determination cycle complete"
        );
        self.record(&report);
        Ok(report)
    }

    async fn promote(
        &self,
        shape: &ShapeSnapshot,
        known: &mut HashMap<String, Rule>,
        outstanding: &mut usize,
        report: &mut CycleReport,
    ) {
        let query = &shape.normalized_query;
        let rule = match synthesize(query) {
            Ok(rule) => rule,
            Err(e) => {
                warn!(%query, error = %e, "cannot synthesize rule for shape");
                report.failed.push(query.clone());
                return;
            }
        };

        if let Some(existing) = known.get(&rule.table) {
            self.adopt(query, existing.clone(), report).await;
            return;
        }

        if *outstanding >= self.max_rule_capacity {
            info!(
                %query,
                table = %rule.table,
                capacity = self.max_rule_capacity,
                "rule capacity reached, promotion refused"
            );
            report.refused.push(query.clone());
            return;
        }

        match self.repository.submit_rule(&rule) {
            Ok(()) => {
                info!(table = %rule.table, priority = shape.priority, "rule submitted");
                *outstanding += 1;
                known.insert(rule.table.clone(), rule.clone());
                report.submitted.push(rule.table.clone());
                self.aggregator.attach_rule(query, rule).await;
            }
            // Another writer got there since the cycle started.
            Err(StateError::AlreadyExists(table)) => match self.repository.get_rule(&table) {
                Ok(Some(existing)) => {
                    known.insert(table, existing.clone());
                    self.adopt(query, existing, report).await;
                }
                Ok(None) => {
                    warn!(%query, %table, "rule vanished during submission");
                    report.failed.push(query.clone());
                }
                Err(e) => {
                    warn!(%query, %table, error = %e, "failed to read existing rule");
                    report.failed.push(query.clone());
                }
            },
            Err(e) => {
                warn!(%query, table = %rule.table, error = %e, "rule submission failed");
                report.failed.push(query.clone());
            }
        }
    }

    async fn adopt(&self, query: &str, rule: Rule, report: &mut CycleReport) {
        debug!(%query, table = %rule.table, status = %rule.status, "adopting existing rule");
        report.adopted.push(rule.table.clone());
        self.aggregator.attach_rule(query, rule).await;
    }

    fn record(&self, report: &CycleReport) {
        let Some(t) = &self.telemetry else { return };
        t.record_determination_cycle(report.threshold);
        t.record_submitted(report.submitted.len() as u64);
        t.record_adopted(report.adopted.len() as u64);
        t.record_refused(report.refused.len() as u64);
        t.record_submission_failures(report.failed.len() as u64);
        t.record_revocations(report.revocations.len() as u64);
    }

    /// Run cycles every `interval` until `shutdown` fires.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            capacity = self.max_rule_capacity,
            "determination engine started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.run_cycle().await {
                        tracing::error!(error = %e, "determination cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("determination engine shutting down");
                    break;
                }
            }
        }
    }
}
