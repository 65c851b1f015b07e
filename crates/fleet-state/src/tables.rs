//! redb table definitions for the fleet state store.

use redb::TableDefinition;

/// State records keyed by append sequence number. Insert-only.
pub const RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("records");

/// Component name → sequence number of its most recent record.
pub const LATEST: TableDefinition<&str, u64> = TableDefinition::new("latest");

/// Service name → replica count last applied for it. Overwritten in place;
/// not part of the record log.
pub const REPLICAS: TableDefinition<&str, u32> = TableDefinition::new("replicas");

/// Store bookkeeping (`cycle_start`).
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// `META` key holding the sequence number of the current cycle marker.
pub const CYCLE_START_KEY: &str = "cycle_start";
