//! denorm-rules — decides which query shapes deserve a rule.
//!
//! # Architecture
//!
//! ```text
//! DeterminationEngine::run_cycle()
//!   ├── PriorityAggregator::rescore_all()
//!   ├── promotion_threshold()          75th percentile of all priorities
//!   ├── decide() per shape             Promote | Keep | Revoke | Ignore
//!   └── synthesize() + submit_rule()   new rules enter as PENDING
//! ```
//!
//! Candidates are visited in descending priority so that the outstanding
//! rule capacity goes to the most valuable shapes first.

pub mod engine;
pub mod selection;
pub mod synthesis;

pub use engine::{CycleReport, DeterminationEngine};
pub use selection::{Transition, decide, promotion_threshold};
pub use synthesis::synthesize;
