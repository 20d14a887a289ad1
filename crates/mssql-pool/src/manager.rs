//! Registry of pools, one per attached context.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::conn::ManagedConnection;
use crate::error::PoolError;
use crate::pool::Pool;

/// Maps attached context names to their pools.
///
/// The attach layer holds one process-wide instance; attach registers a
/// pool, detach removes and shuts it down.
pub struct PoolManager<C: ManagedConnection> {
    pools: Mutex<HashMap<String, Arc<Pool<C>>>>,
}

impl<C: ManagedConnection> Default for PoolManager<C> {
    fn default() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
        }
    }
}

impl<C: ManagedConnection> PoolManager<C> {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool under a context name.
    pub fn register(&self, name: &str, pool: Arc<Pool<C>>) -> Result<(), PoolError> {
        let mut pools = self.pools.lock();
        if pools.contains_key(name) {
            return Err(PoolError::Registry(format!(
                "context {name:?} is already attached"
            )));
        }
        pools.insert(name.to_string(), pool);
        Ok(())
    }

    /// Look up the pool for a context.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Pool<C>>> {
        self.pools.lock().get(name).cloned()
    }

    /// Remove a context's pool, returning it for shutdown.
    pub fn remove(&self, name: &str) -> Result<Arc<Pool<C>>, PoolError> {
        self.pools
            .lock()
            .remove(name)
            .ok_or_else(|| PoolError::Registry(format!("context {name:?} is not attached")))
    }

    /// Names of all registered contexts.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.pools.lock().keys().cloned().collect()
    }
}

impl<C: ManagedConnection> std::fmt::Debug for PoolManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("contexts", &self.names())
            .finish()
    }
}
