//! redb table definitions for the perf store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! record types). Jobs and samples use `{run_id}:{suffix}` composite
//! keys so one run's rows sit under a common prefix.

use redb::TableDefinition;

/// Run records keyed by `{run_id}`.
pub const RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("runs");

/// Per-job outcomes keyed by `{run_id}:{job_id}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Per-window samples keyed by `{run_id}:{seq:010}`.
pub const SAMPLES: TableDefinition<&str, &[u8]> = TableDefinition::new("samples");
