//! denorm-state — the rule repository for the denorm control plane.
//!
//! Backed by [redb](https://docs.rs/redb). Rules are JSON-serialized into a
//! single table keyed by their target table name, so "one active rule per
//! table" is enforced by the key itself.
//!
//! Status changes go through [`RuleRepository::set_status`], a
//! compare-and-set executed inside one write transaction: the update is
//! rejected when the stored status no longer matches the caller's
//! expectation or when the requested status is not the next forward step.
//!
//! `RuleStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`) and
//! can be shared across async tasks.

pub mod error;
pub mod hash;
pub mod repository;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use hash::fnv1a;
pub use repository::RuleRepository;
pub use store::RuleStore;
pub use types::*;
