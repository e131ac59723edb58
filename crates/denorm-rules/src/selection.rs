//! Threshold computation and per-shape promotion decisions.

use denorm_priority::UniformReservoir;
use denorm_state::RuleStatus;
use serde::Serialize;

/// 75th percentile of `priorities`, truncated. `None` when empty.
///
/// The priorities are fed through a fresh uniform reservoir, so a very
/// large population is sampled rather than sorted in full.
pub fn promotion_threshold<I>(priorities: I) -> Option<i64>
where
    I: IntoIterator<Item = i64>,
{
    let mut reservoir = UniformReservoir::new(UniformReservoir::DEFAULT_CAPACITY);
    for p in priorities {
        reservoir.update(p);
    }
    if reservoir.is_empty() {
        return None;
    }
    Some(reservoir.snapshot().percentile_75() as i64)
}

/// What the engine does with one shape this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Transition {
    /// At or above threshold with no rule: synthesize and submit one.
    Promote,
    /// At or above threshold and already ruled.
    Keep,
    /// Below threshold but still holding a rule.
    Revoke,
    /// Below threshold, no rule.
    Ignore,
}

impl Transition {
    /// Status the shape's rule is moved to, if any.
    ///
    /// `Revoke` has no target: rules are never withdrawn once submitted.
    pub fn target_status(self) -> Option<RuleStatus> {
        match self {
            Transition::Promote => Some(RuleStatus::Pending),
            Transition::Keep | Transition::Revoke | Transition::Ignore => None,
        }
    }
}

pub fn decide(priority: i64, threshold: i64, has_rule: bool) -> Transition {
    match (priority >= threshold, has_rule) {
        (true, false) => Transition::Promote,
        (true, true) => Transition::Keep,
        (false, true) => Transition::Revoke,
        (false, false) => Transition::Ignore,
    }
}
