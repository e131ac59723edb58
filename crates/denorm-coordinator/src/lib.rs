//! denorm-coordinator — rolls selected rules out across the worker fleet.
//!
//! # Architecture
//!
//! ```text
//! CoordinatorService::start()
//!   ├── TopicProvisioner::provision()        bootstrap + shutdown topics,
//!   │                                        one generation marker
//!   └── control loop (initial delay, then fixed interval)
//!         └── LifecycleCoordinator::run_cycle()
//!               ├── A: accept_acknowledged_rules()
//!               │     PENDING → ACCEPTED once every partition has
//!               │     acknowledged under {rules_path}/{table}/denormalizer
//!               └── B: bootstrap_accepted_rules()
//!                     one batch at {bootstrapper_path}/{jobId},
//!                     then ACCEPTED → BOOTSTRAPPING
//! ```
//!
//! The namespace and the broker sit behind the [`CoordinationNamespace`]
//! and [`BrokerAdmin`] traits. [`NamespaceStore`] (redb) and
//! [`LocalBroker`] (in memory) are the in-process implementations.

pub mod broker;
pub mod error;
pub mod lifecycle;
pub mod namespace;
pub mod provisioner;
pub mod service;

mod deadline;
#[cfg(test)]
mod testing;

pub use broker::{
    BrokerAdmin, BrokerError, BrokerResult, LocalBroker, PublishedRecord, Record, TopicSpec,
};
pub use error::{CoordinatorError, CoordinatorResult};
pub use lifecycle::{
    AcceptReport, BootstrapBatch, BootstrapReport, CycleOutcome, LifecycleCoordinator,
    LifecycleSettings,
};
pub use namespace::{
    CoordinationNamespace, CreateMode, NamespaceError, NamespaceResult, NamespaceStore, SessionId,
    make_path,
};
pub use provisioner::{GenerationMarker, TopicProvisioner};
pub use service::{CoordinatorHandle, CoordinatorService, CoordinatorState};
