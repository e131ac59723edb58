//! Rule synthesis from a normalized query shape.

use denorm_state::{QueryShape, Rule, StateResult};

/// Build a `Pending` rule for a normalized query.
///
/// The rule's table is derived from the shape, so two queries with the
/// same shape always synthesize the same rule identity.
pub fn synthesize(normalized_query: &str) -> StateResult<Rule> {
    let shape = QueryShape::parse(normalized_query)?;
    Ok(Rule::pending(shape))
}
