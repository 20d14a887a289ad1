//! Process-wide engine settings.
//!
//! Defaults for pool sizing, timeouts and batching, overridable per attach
//! via the option map. Host engines expose these through their own settings
//! surface and call [`EngineSettings::set_global`].

use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// What to do when a CTAS or INSERT targets a Fabric endpoint that rejects
/// `INSERT BULK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FabricBulkPolicy {
    /// Silently downgrade to batched INSERT statements.
    #[default]
    Fallback,
    /// Fail fast with a clear message.
    Error,
}

/// Process-wide tunables.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Pool connection cap per attached context.
    pub pool_limit: u32,
    /// Pool connection floor.
    pub pool_min: u32,
    /// Idle eviction timeout.
    pub idle_timeout: Duration,
    /// Acquire wait budget.
    pub acquire_timeout: Duration,
    /// Dial + authenticate budget.
    pub connection_timeout: Duration,
    /// Wall clock from batch send to final DONE; zero means unbounded.
    pub query_timeout: Duration,
    /// Rows per generated INSERT statement.
    pub insert_batch_rows: usize,
    /// Byte cap per generated INSERT statement.
    pub insert_batch_bytes: usize,
    /// Parameter cap per rowid UPDATE/DELETE batch.
    pub dml_max_params: usize,
    /// Target rows per streamed result chunk.
    pub chunk_rows: usize,
    /// Rows per bulk-load flush.
    pub bulk_flush_rows: usize,
    /// Fabric endpoints and INSERT BULK.
    pub fabric_bulk_policy: FabricBulkPolicy,
    /// Metadata cache TTL; zero means never expire.
    pub catalog_cache_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pool_limit: 8,
            pool_min: 0,
            idle_timeout: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(30),
            query_timeout: Duration::ZERO,
            insert_batch_rows: 1000,
            insert_batch_bytes: 8 * 1024 * 1024,
            dml_max_params: 2000,
            chunk_rows: 2048,
            bulk_flush_rows: 100_000,
            fabric_bulk_policy: FabricBulkPolicy::Fallback,
            catalog_cache_ttl: Duration::ZERO,
        }
    }
}

static GLOBAL: Lazy<RwLock<EngineSettings>> = Lazy::new(|| RwLock::new(EngineSettings::default()));

impl EngineSettings {
    /// Snapshot of the current process-wide settings.
    #[must_use]
    pub fn global() -> Self {
        GLOBAL.read().clone()
    }

    /// Replace the process-wide settings.
    pub fn set_global(settings: Self) {
        *GLOBAL.write() = settings;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = EngineSettings::default();
        assert_eq!(s.insert_batch_rows, 1000);
        assert_eq!(s.insert_batch_bytes, 8 * 1024 * 1024);
        assert_eq!(s.dml_max_params, 2000);
        assert_eq!(s.chunk_rows, 2048);
        assert_eq!(s.bulk_flush_rows, 100_000);
        assert_eq!(s.fabric_bulk_policy, FabricBulkPolicy::Fallback);
        assert_eq!(s.catalog_cache_ttl, Duration::ZERO);
    }
}
