//! redb table definitions for the BurstGrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Jobs keyed by job id.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Requested/applied capacity keyed by pool id.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// Workflow execution checkpoints keyed by execution id.
pub const EXECUTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("executions");
