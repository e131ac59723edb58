//! redb table definitions for the rule repository.

use redb::TableDefinition;

/// Rules keyed by their target table name.
pub const RULES: TableDefinition<&str, &[u8]> = TableDefinition::new("rules");
