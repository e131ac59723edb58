//! denorm-priority — turns raw query timings into comparable priorities.
//!
//! # Architecture
//!
//! ```text
//! ingest (JSON lines → QueryEvent)
//!   └── route by hash(normalized_query) → ingest worker
//!         └── PriorityAggregator::record()     O(1), one reservoir per shape
//!
//! DeterminationEngine (periodic)
//!   ├── PriorityAggregator::rescore_all()      snapshot → priority
//!   └── PriorityAggregator::snapshot()         consistent per-shape view
//! ```
//!
//! # Scoring
//!
//! ```text
//! mean, median  = reservoir snapshot, truncated to integer cost units
//! deviation     = Σ |v - median| / mean
//! priority      = median - deviation   if median <= mean
//!                 median + deviation   otherwise
//! mean == 0     → priority = median
//! ```

pub mod aggregator;
pub mod ingest;
pub mod reservoir;
pub mod score;

pub use aggregator::{PriorityAggregator, QueryPriorityState, ShapeSnapshot};
pub use ingest::{
    IngestRouter, QueryEvent, partition_for, partition_key, read_events, spawn_ingest_workers,
};
pub use reservoir::{Snapshot, UniformReservoir};
pub use score::{PriorityBreakdown, score_snapshot};
