//! RuleStore — redb-backed rule repository.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::repository::RuleRepository;
use crate::tables::RULES;
use crate::types::{Rule, RuleStatus, epoch_millis};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe rule store backed by redb.
#[derive(Clone)]
pub struct RuleStore {
    db: Arc<Database>,
}

impl RuleStore {
    /// Open (or create) a persistent rule store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "rule store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory rule store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory rule store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(RULES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Count rules per status.
    pub fn status_counts(&self) -> StateResult<[(RuleStatus, usize); 3]> {
        let rules = self.list_rules()?;
        let count = |s: RuleStatus| rules.iter().filter(|r| r.status == s).count();
        Ok([
            (RuleStatus::Pending, count(RuleStatus::Pending)),
            (RuleStatus::Accepted, count(RuleStatus::Accepted)),
            (RuleStatus::Bootstrapping, count(RuleStatus::Bootstrapping)),
        ])
    }
}

impl RuleRepository for RuleStore {
    fn submit_rule(&self, rule: &Rule) -> StateResult<()> {
        let value = serde_json::to_vec(rule).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RULES).map_err(map_err!(Table))?;
            if table.get(rule.table.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(rule.table.clone()));
            }
            table
                .insert(rule.table.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = %rule.table, status = %rule.status, "rule submitted");
        Ok(())
    }

    fn get_rule(&self, table_name: &str) -> StateResult<Option<Rule>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RULES).map_err(map_err!(Table))?;
        match table.get(table_name).map_err(map_err!(Read))? {
            Some(guard) => {
                let rule: Rule =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(rule))
            }
            None => Ok(None),
        }
    }

    fn list_rules(&self) -> StateResult<Vec<Rule>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RULES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let rule: Rule =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(rule);
        }
        Ok(results)
    }

    fn set_status(
        &self,
        table_name: &str,
        expected: RuleStatus,
        next: RuleStatus,
    ) -> StateResult<Rule> {
        if !expected.can_advance_to(next) {
            return Err(StateError::IllegalTransition {
                table: table_name.to_string(),
                from: expected,
                to: next,
            });
        }

        // Check-and-write inside one write transaction; redb serializes writers.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(RULES).map_err(map_err!(Table))?;
            let mut rule: Rule = match table.get(table_name).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(table_name.to_string())),
            };
            if rule.status != expected {
                return Err(StateError::StatusConflict {
                    table: table_name.to_string(),
                    expected,
                    actual: rule.status,
                });
            }
            rule.status = next;
            rule.updated_at = epoch_millis();
            let value = serde_json::to_vec(&rule).map_err(map_err!(Serialize))?;
            table
                .insert(table_name, value.as_slice())
                .map_err(map_err!(Write))?;
            rule
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = %table_name, from = %expected, to = %next, "rule status updated");
        Ok(updated)
    }
}
