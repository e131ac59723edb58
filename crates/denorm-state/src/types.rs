//! Domain types for the rule repository.
//!
//! A [`Rule`] declares that a target table should be kept denormalized
//! according to a [`QueryShape`]. Rules only ever move forward through
//! [`RuleStatus`]: `Pending → Accepted → Bootstrapping`.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

// ── Status ────────────────────────────────────────────────────────

/// Lifecycle status of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleStatus {
    /// Submitted; waiting for every worker partition to acknowledge.
    Pending,
    /// Acknowledged by the full worker fleet; waiting for bootstrap.
    Accepted,
    /// Included in a bootstrap batch.
    Bootstrapping,
}

impl RuleStatus {
    /// The only status this one may advance to.
    pub fn next(self) -> Option<RuleStatus> {
        match self {
            RuleStatus::Pending => Some(RuleStatus::Accepted),
            RuleStatus::Accepted => Some(RuleStatus::Bootstrapping),
            RuleStatus::Bootstrapping => None,
        }
    }

    /// Whether `self → to` is a legal forward step.
    pub fn can_advance_to(self, to: RuleStatus) -> bool {
        self.next() == Some(to)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuleStatus::Pending => "PENDING",
            RuleStatus::Accepted => "ACCEPTED",
            RuleStatus::Bootstrapping => "BOOTSTRAPPING",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Query shape ───────────────────────────────────────────────────

/// A normalized query: literal values stripped, structure kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryShape {
    /// The outer (driving) table.
    pub table: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinShape>,
}

/// A filter predicate without its literal operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterShape {
    pub attribute: String,
    pub op: String,
}

/// A single equi-join against an inner table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinShape {
    pub table: String,
    pub outer_attribute: String,
    pub inner_attribute: String,
}

impl QueryShape {
    /// Parse a normalized query string.
    pub fn parse(normalized_query: &str) -> StateResult<Self> {
        let shape: QueryShape = serde_json::from_str(normalized_query)
            .map_err(|e| StateError::Deserialize(e.to_string()))?;
        if shape.table.trim().is_empty() {
            return Err(StateError::Deserialize(
                "query shape has an empty table".to_string(),
            ));
        }
        if let Some(join) = &shape.join
            && join.table.trim().is_empty()
        {
            return Err(StateError::Deserialize(
                "query shape joins an empty table".to_string(),
            ));
        }
        Ok(shape)
    }

    /// Name of the table the materialization is written to.
    pub fn target_table(&self) -> String {
        match &self.join {
            Some(join) => format!("{}_{}", self.table, join.table),
            None => format!("{}_materialized", self.table),
        }
    }
}

// ── Rule ──────────────────────────────────────────────────────────

/// A durable declaration that `table` is maintained per `query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Target table; the rule's identity.
    pub table: String,
    pub query: QueryShape,
    pub status: RuleStatus,
    /// Unix timestamp (millis) when the rule was submitted.
    pub created_at: u64,
    /// Unix timestamp (millis) of the last status change.
    pub updated_at: u64,
}

impl Rule {
    /// Synthesize a new `Pending` rule for a query shape.
    pub fn pending(query: QueryShape) -> Self {
        let now = epoch_millis();
        Self {
            table: query.target_table(),
            query,
            status: RuleStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

pub(crate) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
