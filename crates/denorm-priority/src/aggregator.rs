//! Priority aggregator — one reservoir per normalized query shape.
//!
//! The shape map is guarded by an `RwLock` that is only write-locked to
//! insert a new shape. Each shape's state sits behind its own `Mutex`, so
//! ingest workers touching different shapes never contend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace};

use denorm_state::Rule;

use crate::reservoir::UniformReservoir;
use crate::score::score_snapshot;

/// Mutable per-shape state.
#[derive(Debug)]
pub struct QueryPriorityState {
    pub reservoir: UniformReservoir,
    /// Priority as of the last scoring pass (first sample until then).
    pub priority: i64,
    /// Unix millis of the last scoring pass.
    pub last_updated: u64,
    /// The rule this shape was promoted to, if any.
    pub rule: Option<Rule>,
}

impl QueryPriorityState {
    fn new(capacity: usize, first_sample: i64) -> Self {
        let mut reservoir = UniformReservoir::new(capacity);
        reservoir.update(first_sample);
        Self {
            reservoir,
            priority: first_sample,
            last_updated: epoch_millis(),
            rule: None,
        }
    }
}

/// A point-in-time copy of one shape's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeSnapshot {
    pub normalized_query: String,
    pub priority: i64,
    pub last_updated: u64,
    pub rule: Option<Rule>,
    /// Values offered to the reservoir so far.
    pub samples: u64,
}

/// Concurrent map of query shape → priority state.
#[derive(Clone)]
pub struct PriorityAggregator {
    shapes: Arc<RwLock<HashMap<String, Arc<Mutex<QueryPriorityState>>>>>,
    reservoir_capacity: usize,
}

impl PriorityAggregator {
    pub fn new(reservoir_capacity: usize) -> Self {
        Self {
            shapes: Arc::new(RwLock::new(HashMap::new())),
            reservoir_capacity: reservoir_capacity.max(1),
        }
    }

    /// Add one cost sample for a shape, creating the shape on first sight.
    pub async fn record(&self, normalized_query: &str, cost_metric: i64) {
        let existing = self.shapes.read().await.get(normalized_query).cloned();
        if let Some(state) = existing {
            state.lock().await.reservoir.update(cost_metric);
            return;
        }

        let mut shapes = self.shapes.write().await;
        match shapes.get(normalized_query) {
            // Another worker inserted it between our read and write lock.
            Some(state) => {
                let state = state.clone();
                drop(shapes);
                state.lock().await.reservoir.update(cost_metric);
            }
            None => {
                shapes.insert(
                    normalized_query.to_string(),
                    Arc::new(Mutex::new(QueryPriorityState::new(
                        self.reservoir_capacity,
                        cost_metric,
                    ))),
                );
                debug!(query = %normalized_query, cost_metric, "tracking new query shape");
            }
        }
    }

    /// Recompute a shape's priority from its current reservoir.
    ///
    /// Returns `None` for a shape that has never been recorded.
    pub async fn score(&self, normalized_query: &str) -> Option<i64> {
        let state = self.shapes.read().await.get(normalized_query).cloned()?;
        let mut state = state.lock().await;
        Some(rescore(normalized_query, &mut state))
    }

    /// Re-score every tracked shape. Returns the number of shapes scored.
    pub async fn rescore_all(&self) -> usize {
        let entries: Vec<(String, Arc<Mutex<QueryPriorityState>>)> = self
            .shapes
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (query, state) in &entries {
            let mut state = state.lock().await;
            rescore(query, &mut state);
        }
        entries.len()
    }

    /// Copy out every shape's state, ordered by query text.
    pub async fn snapshot(&self) -> Vec<ShapeSnapshot> {
        let entries: Vec<(String, Arc<Mutex<QueryPriorityState>>)> = self
            .shapes
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut out = Vec::with_capacity(entries.len());
        for (query, state) in entries {
            let state = state.lock().await;
            out.push(ShapeSnapshot {
                normalized_query: query,
                priority: state.priority,
                last_updated: state.last_updated,
                rule: state.rule.clone(),
                samples: state.reservoir.count(),
            });
        }
        out.sort_by(|a, b| a.normalized_query.cmp(&b.normalized_query));
        out
    }

    /// Record that a shape now owns `rule`. Returns false for unknown shapes.
    pub async fn attach_rule(&self, normalized_query: &str, rule: Rule) -> bool {
        let Some(state) = self.shapes.read().await.get(normalized_query).cloned() else {
            return false;
        };
        state.lock().await.rule = Some(rule);
        true
    }

    pub async fn len(&self) -> usize {
        self.shapes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shapes.read().await.is_empty()
    }
}

fn rescore(query: &str, state: &mut QueryPriorityState) -> i64 {
    if let Some(b) = score_snapshot(&state.reservoir.snapshot()) {
        state.priority = b.priority;
        trace!(
            %query,
            mean = b.mean,
            median = b.median,
            deviation = b.deviation,
            priority = b.priority,
            "shape scored"
        );
    }
    state.last_updated = epoch_millis();
    state.priority
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
