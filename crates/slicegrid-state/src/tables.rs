//! redb table definitions for the slicegrid record store.
//!
//! Keys are `&str`, values are JSON-serialized `Versioned<T>` documents.

use redb::TableDefinition;

/// Table definition shape shared by every record table.
pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Workloads keyed by `{namespace}/{name}`.
pub const WORKLOADS: RecordTable = TableDefinition::new("workloads");

/// Node inventories keyed by `{node}`.
pub const INVENTORIES: RecordTable = TableDefinition::new("inventories");
