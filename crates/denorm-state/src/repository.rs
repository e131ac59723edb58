//! The rule repository interface consumed by the engine and coordinator.

use crate::error::StateResult;
use crate::types::{Rule, RuleStatus};

/// A persisted set of rules with compare-and-set status transitions.
///
/// Implementations must make `set_status` atomic: the status check and the
/// write happen as one step, so two writers racing on the same rule cannot
/// both succeed.
pub trait RuleRepository: Send + Sync {
    /// Insert a new rule. Fails with `AlreadyExists` if its table is taken.
    fn submit_rule(&self, rule: &Rule) -> StateResult<()>;

    /// Look up a rule by target table.
    fn get_rule(&self, table: &str) -> StateResult<Option<Rule>>;

    /// All rules, in table order.
    fn list_rules(&self) -> StateResult<Vec<Rule>>;

    /// Rules currently in `status`, in table order.
    fn rules_with_status(&self, status: RuleStatus) -> StateResult<Vec<Rule>> {
        Ok(self
            .list_rules()?
            .into_iter()
            .filter(|rule| rule.status == status)
            .collect())
    }

    /// Move `table` from `expected` to `next`, returning the updated rule.
    fn set_status(&self, table: &str, expected: RuleStatus, next: RuleStatus)
    -> StateResult<Rule>;
}
