//! Shared redacted-documents cache.
//!
//! Full field filtering is cheap per document but runs on every search
//! result. A document that is *fully* invisible to a user stays invisible
//! until the document or the user's credentials change, so that negative
//! outcome is worth remembering. This cache maps username to a per-user
//! sub-cache of visibility-key to outcome; only `false` is ever stored,
//! because a visible document may still need partial redaction and must be
//! re-filtered on every call.
//!
//! ## Correctness model
//!
//! Each per-user sub-cache is tagged with the attribute set active when it
//! was created, and every access revalidates that tag against the calling
//! context under a per-cache lock. A mismatch (credential change) evicts
//! and rebuilds the sub-cache inside the same critical section, so a
//! lookup never returns an outcome computed for stale attributes. Entry
//! expiry and the size bounds are resource management only and are never
//! relied on for correctness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::config::SecurityCacheConfig;
use crate::context::SecureSearchContext;
use crate::error::SecurityResult;

// =============================================================================
// Visibility Key
// =============================================================================

/// Fixed-length key identifying one document visibility outcome.
///
/// Hashes the document id, version, and the context's active type-filter
/// spec, so the same document can carry different cached outcomes under
/// different type-filter settings.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisibilityKey([u8; 32]);

impl VisibilityKey {
    /// Compute the key for a document under a type-filter setting.
    #[must_use]
    pub fn compute(id: &str, version: &str, type_filter_spec: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
        hasher.update(version.as_bytes());
        hasher.update([0u8]);
        hasher.update(type_filter_spec.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Hex rendering of the key.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for VisibilityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VisibilityKey({})", self.to_hex())
    }
}

// =============================================================================
// Per-User Sub-Cache
// =============================================================================

struct VisibilityEntry {
    visible: bool,
    /// Milliseconds since the cache epoch of the last read or write.
    last_access: AtomicU64,
}

struct UserVisibilityCache {
    /// The attribute set active when this sub-cache was created.
    attributes: crate::attributes::AttributeSet,
    entries: DashMap<VisibilityKey, VisibilityEntry>,
    last_access: AtomicU64,
}

impl UserVisibilityCache {
    fn new(attributes: crate::attributes::AttributeSet, now: u64) -> Self {
        Self {
            attributes,
            entries: DashMap::new(),
            last_access: AtomicU64::new(now),
        }
    }
}

// =============================================================================
// Redacted Documents Cache
// =============================================================================

/// Bounded, expiring, concurrent cache of fully-redacted outcomes.
///
/// Shared across concurrently running requests; safe for concurrent reads
/// and writes. The per-user get-or-create-or-invalidate sequence is
/// serialized by a coarse per-cache lock (attribute changes are rare
/// relative to lookups).
pub struct RedactedDocumentsCache {
    config: SecurityCacheConfig,
    users: DashMap<String, Arc<UserVisibilityCache>>,
    /// Serializes sub-cache creation and attribute-change invalidation.
    gate: Mutex<()>,
    epoch: Instant,
}

impl RedactedDocumentsCache {
    /// Create a cache with the given bounds and expiry.
    ///
    /// # Errors
    ///
    /// Fails fast with [`crate::error::SecurityError::InvalidCacheConfig`]
    /// when the configuration is unusable.
    pub fn new(config: SecurityCacheConfig) -> SecurityResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            users: DashMap::new(),
            gate: Mutex::new(()),
            epoch: Instant::now(),
        })
    }

    /// Operational escape hatch: build the cache, or log and disable
    /// caching when the configuration is invalid.
    #[must_use]
    pub fn try_new(config: SecurityCacheConfig) -> Option<Arc<Self>> {
        match Self::new(config) {
            Ok(cache) => Some(Arc::new(cache)),
            Err(error) => {
                tracing::warn!(error = %error, "Redacted documents cache disabled");
                None
            }
        }
    }

    /// The visibility key for a document under the context's active
    /// type-filter setting.
    #[must_use]
    pub fn key(&self, context: &SecureSearchContext, id: &str, version: &str) -> VisibilityKey {
        VisibilityKey::compute(id, version, context.type_filter_spec())
    }

    /// Cached visibility for a document, or `None` when unknown.
    ///
    /// Expired entries read as unknown and are dropped on the way out.
    #[must_use]
    pub fn is_visible(
        &self,
        context: &SecureSearchContext,
        id: &str,
        version: &str,
    ) -> Option<bool> {
        let user = self.user_cache(context);
        let key = self.key(context, id, version);
        let now = self.now_millis();
        user.last_access.store(now, Ordering::Relaxed);

        let entry = user.entries.get(&key)?;
        if self.expired(&entry.last_access, now) {
            drop(entry);
            user.entries.remove(&key);
            return None;
        }
        entry.last_access.store(now, Ordering::Relaxed);
        Some(entry.visible)
    }

    /// Record a visibility outcome for a document.
    ///
    /// Callers are only ever expected to store `false`: a visible document
    /// must be re-filtered on every call because visibility does not imply
    /// full visibility.
    pub fn set_visible(
        &self,
        context: &SecureSearchContext,
        id: &str,
        version: &str,
        visible: bool,
    ) {
        let user = self.user_cache(context);
        let key = self.key(context, id, version);
        let now = self.now_millis();
        user.last_access.store(now, Ordering::Relaxed);

        if user.entries.len() >= self.config.max_documents_per_user
            && !user.entries.contains_key(&key)
        {
            self.evict_documents(&user, now);
        }

        user.entries.insert(
            key,
            VisibilityEntry {
                visible,
                last_access: AtomicU64::new(now),
            },
        );
    }

    /// Drop every cached outcome for every user.
    pub fn invalidate(&self) {
        let _guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let users = self.users.len();
        self.users.clear();
        tracing::debug!(users, "Redacted documents cache invalidated");
    }

    /// Current cache occupancy.
    #[must_use]
    pub fn stats(&self) -> RedactedDocumentsCacheStats {
        let documents = self.users.iter().map(|user| user.entries.len()).sum();
        RedactedDocumentsCacheStats {
            users: self.users.len(),
            documents,
            max_users: self.config.max_users,
            max_documents_per_user: self.config.max_documents_per_user,
        }
    }

    // -------------------------------------------------------------------------
    // Per-user sub-cache management
    // -------------------------------------------------------------------------

    /// Fetch the sub-cache for the context's user, creating it on first
    /// use and invalidating it when the user's attributes have changed
    /// since it was tagged.
    ///
    /// The whole read-tag / compare / evict / recreate sequence runs under
    /// the cache lock as one atomic unit, so the returned sub-cache is
    /// always tagged with the caller's current attribute set.
    fn user_cache(&self, context: &SecureSearchContext) -> Arc<UserVisibilityCache> {
        let _guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let username = context.username();

        if let Some(existing) = self.users.get(username) {
            if existing.attributes == *context.attributes() {
                return Arc::clone(&existing);
            }
            drop(existing);
            self.users.remove(username);
            tracing::debug!(
                user = username,
                "Attribute set changed, invalidating user visibility cache"
            );
        }

        if self.users.len() >= self.config.max_users {
            self.evict_users();
        }

        let fresh = Arc::new(UserVisibilityCache::new(
            context.attributes().clone(),
            self.now_millis(),
        ));
        self.users.insert(username.to_string(), Arc::clone(&fresh));
        fresh
    }

    /// Make room in the user table: drop idle-expired sub-caches first,
    /// then the least recently used until under the bound.
    fn evict_users(&self) {
        let now = self.now_millis();
        self.users
            .retain(|_, user| !self.expired(&user.last_access, now));

        while self.users.len() >= self.config.max_users {
            let oldest = self
                .users
                .iter()
                .min_by_key(|user| user.last_access.load(Ordering::Relaxed))
                .map(|user| user.key().clone());
            match oldest {
                Some(username) => {
                    self.users.remove(&username);
                    tracing::debug!(user = username.as_str(), "Evicted user visibility cache");
                }
                None => break,
            }
        }
    }

    /// Make room in a user's entry table, same policy as [`evict_users`].
    fn evict_documents(&self, user: &UserVisibilityCache, now: u64) {
        user.entries
            .retain(|_, entry| !self.expired(&entry.last_access, now));

        while user.entries.len() >= self.config.max_documents_per_user {
            let oldest = user
                .entries
                .iter()
                .min_by_key(|entry| entry.last_access.load(Ordering::Relaxed))
                .map(|entry| *entry.key());
            match oldest {
                Some(key) => {
                    user.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    fn now_millis(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn expired(&self, last_access: &AtomicU64, now: u64) -> bool {
        let idle = now.saturating_sub(last_access.load(Ordering::Relaxed));
        u128::from(idle) > self.config.idle_expiry.as_millis()
    }
}

impl std::fmt::Debug for RedactedDocumentsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedactedDocumentsCache")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Occupancy snapshot of the redacted-documents cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactedDocumentsCacheStats {
    /// Users with a live sub-cache.
    pub users: usize,
    /// Cached document outcomes across all users.
    pub documents: usize,
    /// Configured user bound.
    pub max_users: usize,
    /// Configured per-user document bound.
    pub max_documents_per_user: usize,
}

// =============================================================================
// Tests
// =============================================================================
