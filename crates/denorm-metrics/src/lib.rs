//! denorm-metrics — observability for the denormalization control plane.
//!
//! Counts what the determination engine and the lifecycle coordinator do
//! each cycle and renders those counters, together with per-shape priority
//! gauges, in the Prometheus text exposition format.
//!
//! # Architecture
//!
//! ```text
//! Telemetry (shared Arc, lock-free atomics)
//!   ├── determination_*()  ← DeterminationEngine::run_cycle
//!   ├── coordinator_*()    ← LifecycleCoordinator::run_cycle
//!   └── snapshot() → TelemetrySnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod prometheus;
pub mod telemetry;

pub use prometheus::{PriorityGauge, render_prometheus};
pub use telemetry::{Telemetry, TelemetrySnapshot};
