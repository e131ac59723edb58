//! Query-event ingestion.
//!
//! Events arrive as JSON lines. Each event is routed to one of N ingest
//! workers by the hash of its normalized query, so every sample of a shape
//! is handled by the same worker in arrival order.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use denorm_state::fnv1a;

use crate::aggregator::PriorityAggregator;

/// One executed query, reduced to its shape and cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEvent {
    pub normalized_query: String,
    /// Response time in milliseconds.
    pub cost_metric: i64,
    /// Derived from `normalized_query` when absent on the wire.
    #[serde(default)]
    pub partition_key: String,
}

impl QueryEvent {
    pub fn new(normalized_query: impl Into<String>, cost_metric: i64) -> Self {
        let normalized_query = normalized_query.into();
        Self {
            partition_key: partition_key(&normalized_query),
            normalized_query,
            cost_metric,
        }
    }

    /// Parse one JSON line. Blank lines yield `Ok(None)`.
    pub fn parse_line(line: &str) -> anyhow::Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let mut event: QueryEvent = serde_json::from_str(line)?;
        if event.normalized_query.is_empty() {
            anyhow::bail!("event has an empty normalizedQuery");
        }
        if event.partition_key.is_empty() {
            event.partition_key = partition_key(&event.normalized_query);
        }
        Ok(Some(event))
    }
}

/// FNV-1a 64-bit hash of the normalized query, as 16 hex digits.
pub fn partition_key(normalized_query: &str) -> String {
    format!("{:016x}", fnv1a(normalized_query))
}

/// Map a partition key onto `0..partitions`.
pub fn partition_for(partition_key: &str, partitions: usize) -> usize {
    let partitions = partitions.max(1);
    let hash = u64::from_str_radix(partition_key, 16).unwrap_or_else(|_| fnv1a(partition_key));
    (hash % partitions as u64) as usize
}

// ── Routing ───────────────────────────────────────────────────────

/// Fans events out to ingest workers by partition.
#[derive(Clone)]
pub struct IngestRouter {
    senders: Vec<mpsc::Sender<QueryEvent>>,
}

impl IngestRouter {
    /// Send an event to the worker owning its partition.
    pub async fn route(&self, event: QueryEvent) -> anyhow::Result<()> {
        let idx = partition_for(&event.partition_key, self.senders.len());
        self.senders[idx]
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("ingest worker {idx} has stopped"))
    }

    pub fn workers(&self) -> usize {
        self.senders.len()
    }
}

/// Spawn `workers` ingest tasks feeding `aggregator`.
///
/// Each task exits once every router clone is dropped and its queue is
/// drained, returning the number of events it recorded.
pub fn spawn_ingest_workers(
    aggregator: PriorityAggregator,
    workers: usize,
    channel_capacity: usize,
) -> (IngestRouter, Vec<JoinHandle<u64>>) {
    let workers = workers.max(1);
    let mut senders = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);

    for worker in 0..workers {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        senders.push(tx);
        handles.push(tokio::spawn(run_ingest_worker(
            worker,
            aggregator.clone(),
            rx,
        )));
    }

    (IngestRouter { senders }, handles)
}

async fn run_ingest_worker(
    worker: usize,
    aggregator: PriorityAggregator,
    mut rx: mpsc::Receiver<QueryEvent>,
) -> u64 {
    let mut recorded = 0u64;
    while let Some(event) = rx.recv().await {
        aggregator
            .record(&event.normalized_query, event.cost_metric)
            .await;
        recorded += 1;
    }
    debug!(worker, recorded, "ingest worker drained");
    recorded
}

// ── Sources ───────────────────────────────────────────────────────

/// Read JSON-line events from `reader` until EOF or shutdown.
///
/// Malformed lines are logged and skipped. Returns the number of events
/// routed.
pub async fn read_events<R>(
    reader: R,
    router: &IngestRouter,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut routed = 0u64;
    let mut line_no = 0u64;

    loop {
        tokio::select! {
            next = lines.next_line() => {
                let Some(line) = next? else {
                    info!(routed, "event source exhausted");
                    break;
                };
                line_no += 1;
                match QueryEvent::parse_line(&line) {
                    Ok(Some(event)) => {
                        router.route(event).await?;
                        routed += 1;
                    }
                    Ok(None) => {}
                    Err(e) => warn!(line = line_no, error = %e, "skipping malformed event"),
                }
            }
            _ = shutdown.changed() => {
                info!(routed, "event reader shutting down");
                break;
            }
        }
    }
    Ok(routed)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Partitioning ───────────────────────────────────────────────

    #[test]
    fn partition_key_is_stable_hex() {
        let a = partition_key(r#"{"table":"orders"}"#);
        assert_eq!(a, partition_key(r#"{"table":"orders"}"#));
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, partition_key(r#"{"table":"users"}"#));
    }

    #[test]
    fn fnv1a_known_vectors() {
        assert_eq!(partition_key(""), "cbf29ce484222325");
        assert_eq!(partition_key("a"), "af63dc4c8601ec8c");
    }

    #[test]
    fn non_hex_keys_fall_back_to_fnv1a() {
        for key in ["orders", "not-hex", "zz"] {
            assert_eq!(partition_for(key, 7), (fnv1a(key) % 7) as usize, "key {key}");
        }
        assert_eq!(partition_for("ff", 7), 0xff % 7);
    }

    #[test]
    fn partition_for_stays_in_range() {
        for q in ["a", "b", "c", "orders", "users"] {
            let key = partition_key(q);
            assert!(partition_for(&key, 4) < 4);
            assert_eq!(partition_for(&key, 1), 0);
            assert_eq!(partition_for(&key, 0), 0);
        }
    }

    // ── Parsing ────────────────────────────────────────────────────

    #[test]
    fn parse_line_derives_partition_key() {
        let event = QueryEvent::parse_line(r#"{"normalizedQuery":"q","costMetric":12}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event, QueryEvent::new("q", 12));
    }

    #[test]
    fn parse_line_keeps_supplied_key() {
        let event = QueryEvent::parse_line(
            r#"{"normalizedQuery":"q","costMetric":1,"partitionKey":"00000000000000ff"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(event.partition_key, "00000000000000ff");
    }

    #[test]
    fn parse_line_rejects_garbage() {
        assert!(QueryEvent::parse_line("   ").unwrap().is_none());
        assert!(QueryEvent::parse_line("not json").is_err());
        assert!(QueryEvent::parse_line(r#"{"normalizedQuery":"","costMetric":1}"#).is_err());
        assert!(QueryEvent::parse_line(r#"{"normalizedQuery":"q"}"#).is_err());
    }

    // ── Pipeline ───────────────────────────────────────────────────

    #[tokio::test]
    async fn reads_routes_and_records() {
        let aggregator = PriorityAggregator::new(64);
        let (router, handles) = spawn_ingest_workers(aggregator.clone(), 3, 8);
        let (_tx, rx) = watch::channel(false);

        let input = concat!(
            "{\"normalizedQuery\":\"a\",\"costMetric\":10}\n",
            "garbage\n",
            "\n",
            "{\"normalizedQuery\":\"b\",\"costMetric\":20}\n",
            "{\"normalizedQuery\":\"a\",\"costMetric\":30}\n",
        );
        let routed = read_events(input.as_bytes(), &router, rx).await.unwrap();
        assert_eq!(routed, 3);

        drop(router);
        let mut recorded = 0;
        for h in handles {
            recorded += h.await.unwrap();
        }
        assert_eq!(recorded, 3);

        let snap = aggregator.snapshot().await;
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].normalized_query, "a");
        assert_eq!(snap[0].samples, 2);
    }

    #[tokio::test]
    async fn reader_stops_on_shutdown() {
        let aggregator = PriorityAggregator::new(8);
        let (router, _handles) = spawn_ingest_workers(aggregator, 1, 8);
        let (tx, rx) = watch::channel(false);

        // A duplex stream that never yields a line.
        let (client, _server) = tokio::io::duplex(64);
        let reader = tokio::io::BufReader::new(client);
        let task = tokio::spawn(async move { read_events(reader, &router, rx).await });

        tx.send(true).unwrap();
        let routed = task.await.unwrap().unwrap();
        assert_eq!(routed, 0);
    }
}
