//! End-to-end pipeline tests.
//!
//! Drives query events through ingestion, the priority aggregator and the
//! determination engine, then rolls the resulting rules out through the
//! lifecycle coordinator against on-disk stores.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;

use denorm_coordinator::*;
use denorm_core::{BrokerConfig, CoordinatorConfig};
use denorm_metrics::Telemetry;
use denorm_priority::{PriorityAggregator, read_events, spawn_ingest_workers};
use denorm_rules::DeterminationEngine;
use denorm_state::*;

const PARTITIONS: u32 = 3;

const SHAPE_A: &str = r#"{"table":"orders"}"#;
const SHAPE_B: &str =
    r#"{"table":"orders","join":{"table":"customers","outerAttribute":"customer_id","innerAttribute":"id"}}"#;

fn event_line(query: &str, cost: i64) -> String {
    serde_json::json!({ "normalizedQuery": query, "costMetric": cost }).to_string()
}

/// A: 1000 samples within 2ms of 100. B: 1000 samples spread evenly from
/// 100 up to 5000, so B's median sits in the middle of its range.
fn spread_workload() -> String {
    let mut lines = Vec::with_capacity(2000);
    for i in 0..1000i64 {
        lines.push(event_line(SHAPE_A, 98 + i % 5));
        lines.push(event_line(SHAPE_B, 100 + (i % 50) * 100));
    }
    lines.join("\n")
}

/// A as above. B: the same tight cluster around 100, except that one
/// sample in a hundred takes 5000ms.
fn heavy_tail_workload() -> String {
    let mut lines = Vec::with_capacity(2000);
    for i in 0..1000i64 {
        lines.push(event_line(SHAPE_A, 98 + i % 5));
        let cost = if i % 100 == 0 { 5000 } else { 98 + i % 5 };
        lines.push(event_line(SHAPE_B, cost));
    }
    lines.join("\n")
}

async fn ingest(aggregator: &PriorityAggregator, input: &str) -> u64 {
    let (router, workers) = spawn_ingest_workers(aggregator.clone(), 4, 64);
    let (_stop, shutdown) = watch::channel(false);
    let routed = read_events(input.as_bytes(), &router, shutdown).await.unwrap();
    drop(router);
    for worker in workers {
        worker.await.unwrap();
    }
    routed
}

fn settings() -> LifecycleSettings {
    LifecycleSettings {
        partition_count: PARTITIONS,
        rules_path: "/rules".to_string(),
        bootstrapper_path: "/bootstrapper".to_string(),
        operation_timeout: Duration::from_millis(500),
    }
}

async fn ack_all(ns: &NamespaceStore, table: &str) {
    for p in 0..PARTITIONS {
        ns.create(
            &format!("/rules/{table}/denormalizer/{p}"),
            b"",
            CreateMode::Persistent,
        )
        .await
        .unwrap();
    }
}

fn status(repo: &RuleStore, table: &str) -> Option<RuleStatus> {
    repo.get_rule(table).unwrap().map(|r| r.status)
}

// ── Determination ──────────────────────────────────────────────────

#[tokio::test]
async fn spread_shape_is_promoted_tight_shape_is_not() {
    let aggregator = PriorityAggregator::new(1028);
    let repo = RuleStore::open_in_memory().unwrap();

    let routed = ingest(&aggregator, &spread_workload()).await;
    assert_eq!(routed, 2000);

    let engine = DeterminationEngine::new(aggregator.clone(), Arc::new(repo.clone()), 1);
    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.submitted, vec!["orders_customers".to_string()]);
    assert_eq!(status(&repo, "orders_customers"), Some(RuleStatus::Pending));
    assert_eq!(status(&repo, "orders_materialized"), None);

    let a = aggregator.score(SHAPE_A).await.unwrap();
    let b = aggregator.score(SHAPE_B).await.unwrap();
    assert!(b > a, "spread shape {b} should outrank tight shape {a}");
    assert_eq!(report.threshold, Some(b));
}

#[tokio::test]
async fn heavy_tail_sinks_below_the_tight_shape() {
    let aggregator = PriorityAggregator::new(1028);
    let repo = RuleStore::open_in_memory().unwrap();
    ingest(&aggregator, &heavy_tail_workload()).await;

    let engine = DeterminationEngine::new(aggregator.clone(), Arc::new(repo.clone()), 1);
    let report = engine.run_cycle().await.unwrap();

    // A: mean = median = 100, deviation = 1200 / 100 = 12.
    assert_eq!(aggregator.score(SHAPE_A).await, Some(88));
    // B: median 100 <= mean 149, deviation = 50180 / 149 = 336.
    assert_eq!(aggregator.score(SHAPE_B).await, Some(-236));

    assert_eq!(report.threshold, Some(88));
    assert_eq!(report.submitted, vec!["orders_materialized".to_string()]);
    assert_eq!(status(&repo, "orders_customers"), None);
}

#[tokio::test]
async fn malformed_events_are_skipped() {
    let aggregator = PriorityAggregator::new(64);
    let input = [
        event_line(SHAPE_A, 100),
        "not json".to_string(),
        String::new(),
        r#"{"normalizedQuery":"","costMetric":5}"#.to_string(),
        event_line(SHAPE_A, 110),
    ]
    .join("\n");

    assert_eq!(ingest(&aggregator, &input).await, 2);
    let shapes = aggregator.snapshot().await;
    assert_eq!(shapes.len(), 1);
    assert_eq!(shapes[0].samples, 2);
}

// ── Rollout ────────────────────────────────────────────────────────

#[tokio::test]
async fn promoted_rule_rolls_out_and_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let rules_path = dir.path().join("rules.redb");
    let ns_path = dir.path().join("namespace.redb");

    {
        let repo = RuleStore::open(&rules_path).unwrap();
        let ns = NamespaceStore::open(&ns_path).unwrap();
        let aggregator = PriorityAggregator::new(1028);
        ingest(&aggregator, &spread_workload()).await;

        DeterminationEngine::new(aggregator, Arc::new(repo.clone()), 5)
            .run_cycle()
            .await
            .unwrap();

        let coordinator =
            LifecycleCoordinator::new(Arc::new(repo.clone()), Arc::new(ns.clone()), settings());

        // No acknowledgments yet.
        let outcome = coordinator.run_cycle().await.unwrap();
        assert_eq!(outcome.accept.waiting, vec!["orders_customers".to_string()]);
        assert!(outcome.bootstrap.is_none());

        ack_all(&ns, "orders_customers").await;
        let outcome = coordinator.run_cycle().await.unwrap();
        assert_eq!(outcome.accept.accepted, vec!["orders_customers".to_string()]);
        let batch_report = outcome.bootstrap.unwrap();
        assert_eq!(batch_report.bootstrapped, vec!["orders_customers".to_string()]);

        let batch: BootstrapBatch =
            serde_json::from_slice(&ns.get_data(&batch_report.path).await.unwrap()).unwrap();
        assert_eq!(batch.rules.len(), 1);
        assert_eq!(batch.rules[0].query, QueryShape::parse(SHAPE_B).unwrap());

        // Idempotent: nothing left to accept or bootstrap.
        assert_eq!(coordinator.run_cycle().await.unwrap(), CycleOutcome::default());
    }

    let repo = RuleStore::open(&rules_path).unwrap();
    let ns = NamespaceStore::open(&ns_path).unwrap();
    assert_eq!(status(&repo, "orders_customers"), Some(RuleStatus::Bootstrapping));
    assert_eq!(ns.children("/bootstrapper").await.unwrap().len(), 1);
}

#[tokio::test]
async fn ephemeral_acknowledgments_vanish_with_their_session() {
    let repo = RuleStore::open_in_memory().unwrap();
    let ns = NamespaceStore::open_in_memory().unwrap();
    let rule = Rule::pending(QueryShape::parse(SHAPE_B).unwrap());
    repo.submit_rule(&rule).unwrap();

    let sessions: Vec<SessionId> = (0..PARTITIONS).map(|_| ns.new_session()).collect();
    for (p, session) in sessions.iter().enumerate() {
        ns.create(
            &format!("/rules/{}/denormalizer/{p}", rule.table),
            b"",
            CreateMode::Ephemeral(*session),
        )
        .await
        .unwrap();
    }
    // One worker goes away before the coordinator looks.
    assert_eq!(ns.close_session(sessions[0]).await.unwrap(), 1);

    let coordinator =
        LifecycleCoordinator::new(Arc::new(repo.clone()), Arc::new(ns.clone()), settings());
    let report = coordinator.accept_acknowledged_rules().await.unwrap();

    assert_eq!(report.waiting, vec![rule.table.clone()]);
    assert_eq!(status(&repo, &rule.table), Some(RuleStatus::Pending));
}

// ── Failure semantics ──────────────────────────────────────────────

/// Namespace that loses its connection when listing one path.
struct PartitionedNamespace {
    inner: NamespaceStore,
    unreachable: String,
}

#[async_trait]
impl CoordinationNamespace for PartitionedNamespace {
    async fn children(&self, path: &str) -> NamespaceResult<Vec<String>> {
        if path == self.unreachable {
            return Err(NamespaceError::Backend("session expired".to_string()));
        }
        self.inner.children(path).await
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> NamespaceResult<()> {
        self.inner.create(path, data, mode).await
    }

    async fn get_data(&self, path: &str) -> NamespaceResult<Vec<u8>> {
        self.inner.get_data(path).await
    }

    async fn delete(&self, path: &str) -> NamespaceResult<()> {
        self.inner.delete(path).await
    }

    async fn close_session(&self, session: SessionId) -> NamespaceResult<usize> {
        self.inner.close_session(session).await
    }
}

fn submit(repo: &RuleStore, table: &str) -> String {
    let rule = Rule::pending(QueryShape::parse(&format!(r#"{{"table":"{table}"}}"#)).unwrap());
    repo.submit_rule(&rule).unwrap();
    rule.table
}

#[tokio::test]
async fn namespace_failure_aborts_the_cycle() {
    let repo = RuleStore::open_in_memory().unwrap();
    let store = NamespaceStore::open_in_memory().unwrap();
    let first = submit(&repo, "a");
    let broken = submit(&repo, "b");
    let later = submit(&repo, "c");
    ack_all(&store, &first).await;
    ack_all(&store, &later).await;

    let ns = PartitionedNamespace {
        inner: store.clone(),
        unreachable: format!("/rules/{broken}/denormalizer"),
    };
    let coordinator = LifecycleCoordinator::new(Arc::new(repo.clone()), Arc::new(ns), settings());

    let err = coordinator.run_cycle().await.unwrap_err();
    assert!(err.is_fatal());

    assert_eq!(status(&repo, &first), Some(RuleStatus::Accepted));
    assert_eq!(status(&repo, &later), Some(RuleStatus::Pending));
    // Step B never ran.
    assert!(store.children("/bootstrapper").await.is_err());
}

#[tokio::test]
async fn service_fails_and_reports_it() {
    let repo = RuleStore::open_in_memory().unwrap();
    let table = submit(&repo, "orders");
    let ns = PartitionedNamespace {
        inner: NamespaceStore::open_in_memory().unwrap(),
        unreachable: format!("/rules/{table}/denormalizer"),
    };
    let config = CoordinatorConfig {
        partition_count: PARTITIONS,
        initial_delay: Duration::ZERO,
        cycle_interval: Duration::from_millis(20),
        operation_timeout: Duration::from_millis(500),
        shutdown_grace: Duration::from_secs(2),
        ..Default::default()
    };
    let telemetry = Arc::new(Telemetry::new());

    let coordinator =
        LifecycleCoordinator::new(Arc::new(repo.clone()), Arc::new(ns), (&config).into());
    let provisioner =
        TopicProvisioner::new(Arc::new(LocalBroker::new()), &config, &BrokerConfig::default());
    let handle = CoordinatorService::new(coordinator, provisioner, &config)
        .with_telemetry(telemetry.clone())
        .start()
        .await
        .unwrap();

    let mut state = handle.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == CoordinatorState::Failed),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(handle.shutdown().await.is_err());
    assert_eq!(telemetry.snapshot().coordinator_failures, 1);
    assert_eq!(status(&repo, &table), Some(RuleStatus::Pending));
}

// ── Full service ───────────────────────────────────────────────────

#[tokio::test]
async fn service_rolls_out_engine_rules() {
    let dir = tempfile::tempdir().unwrap();
    let repo = RuleStore::open(&dir.path().join("rules.redb")).unwrap();
    let ns = NamespaceStore::open(&dir.path().join("namespace.redb")).unwrap();
    let broker = LocalBroker::new();
    let telemetry = Arc::new(Telemetry::new());
    let config = CoordinatorConfig {
        partition_count: PARTITIONS,
        initial_delay: Duration::from_millis(10),
        cycle_interval: Duration::from_millis(20),
        operation_timeout: Duration::from_millis(500),
        shutdown_grace: Duration::from_secs(2),
        ..Default::default()
    };

    let coordinator =
        LifecycleCoordinator::new(Arc::new(repo.clone()), Arc::new(ns.clone()), (&config).into());
    let provisioner =
        TopicProvisioner::new(Arc::new(broker.clone()), &config, &BrokerConfig::default());
    let handle = CoordinatorService::new(coordinator, provisioner, &config)
        .with_telemetry(telemetry.clone())
        .start()
        .await
        .unwrap();
    assert_eq!(broker.topic("bootstrap").await.unwrap().partitions, PARTITIONS);
    assert_eq!(broker.records("shutdown").await.unwrap().len(), 1);

    let aggregator = PriorityAggregator::new(1028);
    ingest(&aggregator, &spread_workload()).await;
    DeterminationEngine::new(aggregator, Arc::new(repo.clone()), 5)
        .with_telemetry(telemetry.clone())
        .run_cycle()
        .await
        .unwrap();
    ack_all(&ns, "orders_customers").await;

    let deadline = Instant::now() + Duration::from_secs(5);
    while status(&repo, "orders_customers") != Some(RuleStatus::Bootstrapping) {
        assert!(Instant::now() < deadline, "rule was never bootstrapped");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(handle.state(), CoordinatorState::Running);
    handle.shutdown().await.unwrap();

    let snap = telemetry.snapshot();
    assert_eq!(snap.rules_submitted, 1);
    assert_eq!(snap.rules_bootstrapped, 1);
    assert_eq!(snap.bootstrap_batches, 1);
}
