//! Process-wide federated token cache.
//!
//! Keyed by `(secret_id, tenant_override)`. A hit requires more than five
//! minutes of remaining validity; entries past that margin are dropped on
//! read. Writes are idempotent. On a token-expired login failure the
//! connection factory invalidates the entry, re-acquires once, and only then
//! surfaces the error.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::token::FedAuthToken;

/// Cache key: which secret produced the token, and for which tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenCacheKey {
    /// Secret identifier from the attach configuration.
    pub secret_id: String,
    /// Optional tenant override.
    pub tenant: Option<String>,
}

impl TokenCacheKey {
    /// Create a cache key.
    #[must_use]
    pub fn new(secret_id: impl Into<String>, tenant: Option<String>) -> Self {
        Self {
            secret_id: secret_id.into(),
            tenant,
        }
    }
}

/// Token cache shared by every pool in the process.
#[derive(Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<TokenCacheKey, FedAuthToken>>,
}

static GLOBAL: Lazy<TokenCache> = Lazy::new(TokenCache::default);

impl TokenCache {
    /// The process-wide cache instance.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Look up a token; only returns entries with margin to spare.
    #[must_use]
    pub fn get(&self, key: &TokenCacheKey) -> Option<FedAuthToken> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(token) if token.is_cache_fresh() => Some(token.clone()),
            Some(_) => {
                tracing::debug!(secret_id = %key.secret_id, "evicting stale cached token");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a token.
    pub fn insert(&self, key: TokenCacheKey, token: FedAuthToken) {
        self.entries.lock().insert(key, token);
    }

    /// Drop a cached token.
    pub fn invalidate(&self, key: &TokenCacheKey) {
        if self.entries.lock().remove(key).is_some() {
            tracing::debug!(secret_id = %key.secret_id, "invalidated cached token");
        }
    }

    /// Number of cached entries (fresh or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn hit_requires_margin() {
        let cache = TokenCache::default();
        let key = TokenCacheKey::new("secret", None);

        cache.insert(
            key.clone(),
            FedAuthToken::expiring_in("fresh".into(), Duration::from_secs(3600)),
        );
        assert!(cache.get(&key).is_some());

        cache.insert(
            key.clone(),
            FedAuthToken::expiring_in("stale".into(), Duration::from_secs(200)),
        );
        assert!(cache.get(&key).is_none());
        // Stale entry was evicted on read.
        assert!(cache.is_empty());
    }

    #[test]
    fn tenant_override_separates_entries() {
        let cache = TokenCache::default();
        let base = TokenCacheKey::new("secret", None);
        let tenant = TokenCacheKey::new("secret", Some("contoso".into()));

        cache.insert(
            base.clone(),
            FedAuthToken::expiring_in("a".into(), Duration::from_secs(3600)),
        );
        assert!(cache.get(&tenant).is_none());
        assert!(cache.get(&base).is_some());
    }

    #[test]
    fn invalidate_removes() {
        let cache = TokenCache::default();
        let key = TokenCacheKey::new("secret", None);
        cache.insert(
            key.clone(),
            FedAuthToken::expiring_in("t".into(), Duration::from_secs(3600)),
        );
        cache.invalidate(&key);
        assert!(cache.get(&key).is_none());
    }
}
