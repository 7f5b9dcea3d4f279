//! TTL cache in front of a `GrantStore`.
//!
//! Entries live at most `ttl` (never more than [`MAX_CACHE_STALENESS`]). When
//! wired to a store's change feed, pending changes are applied before every
//! read, so writes made through that store are visible immediately; the TTL
//! bounds staleness for writers the cache cannot observe. Errors are never
//! cached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use accord_auth::{
    ConditionRecord, DelegationRecord, GrantRef, GrantStore, OrgMembership, PermissionKey,
    RoleAssignment, RoleKey, ScopeRecord, StoreError,
};
use accord_core::{OrgId, UserId};

use crate::config::ConfigError;
use crate::feed::Subscription;
use crate::grant_store::GrantChange;

/// Upper bound on how long a revoked grant can keep being honoured through
/// the cache.
pub const MAX_CACHE_STALENESS: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(2),
            max_entries: 10_000,
            enabled: true,
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl > MAX_CACHE_STALENESS {
            return Err(ConfigError::StalenessTooLarge(self.ttl));
        }
        if self.enabled && self.max_entries == 0 {
            return Err(ConfigError::Invalid {
                key: "cache.max_entries",
                reason: "must be positive when the cache is enabled".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    /// Entries dropped for capacity or age.
    pub evictions: u64,
    /// Entries dropped because of a write.
    pub invalidations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Roles(UserId),
    RolePermissions(RoleKey),
    Scopes(UserId, PermissionKey),
    Delegations(UserId, PermissionKey),
    Membership(OrgId, UserId),
    OrgPermissions(OrgId, UserId, PermissionKey),
    Conditions(GrantRef),
}

impl CacheKey {
    fn user(&self) -> Option<UserId> {
        match self {
            CacheKey::Roles(u)
            | CacheKey::Scopes(u, _)
            | CacheKey::Delegations(u, _)
            | CacheKey::Membership(_, u)
            | CacheKey::OrgPermissions(_, u, _) => Some(*u),
            CacheKey::RolePermissions(_) | CacheKey::Conditions(_) => None,
        }
    }

    fn org(&self) -> Option<OrgId> {
        match self {
            CacheKey::Membership(o, _) | CacheKey::OrgPermissions(o, _, _) => Some(*o),
            _ => None,
        }
    }

    fn touches(&self, change: &GrantChange) -> bool {
        match change {
            GrantChange::User(user) => self.user() == Some(*user),
            GrantChange::Role(role) => match self {
                CacheKey::RolePermissions(r) => r == role,
                CacheKey::Conditions(GrantRef::Role(r)) => r == role,
                _ => false,
            },
            GrantChange::Org(org) => {
                self.org() == Some(*org)
                    || matches!(self, CacheKey::Conditions(GrantRef::Organization { org_id, .. }) if org_id == org)
            }
            GrantChange::Grant(grant) => matches!(self, CacheKey::Conditions(g) if g == grant),
            GrantChange::All => true,
        }
    }
}

#[derive(Debug, Clone)]
enum CachedValue {
    Roles(Vec<RoleAssignment>),
    Permissions(Vec<PermissionKey>),
    Scopes(Vec<ScopeRecord>),
    Delegations(Vec<DelegationRecord>),
    Membership(Option<OrgMembership>),
    Conditions(Vec<ConditionRecord>),
}

#[derive(Debug)]
struct CacheEntry {
    value: CachedValue,
    created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() >= ttl
    }
}

/// Caching `GrantStore` decorator.
pub struct CachedGrantStore<S> {
    inner: S,
    config: CacheConfig,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    changes: Option<Mutex<Subscription<GrantChange>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl<S: GrantStore> CachedGrantStore<S> {
    /// Wrap `inner`. A TTL above [`MAX_CACHE_STALENESS`] is clamped.
    pub fn new(inner: S, mut config: CacheConfig) -> Self {
        if config.ttl > MAX_CACHE_STALENESS {
            tracing::warn!(
                requested_ms = config.ttl.as_millis() as u64,
                max_ms = MAX_CACHE_STALENESS.as_millis() as u64,
                "cache ttl clamped to staleness bound"
            );
            config.ttl = MAX_CACHE_STALENESS;
        }
        Self {
            inner,
            config,
            entries: RwLock::new(HashMap::new()),
            changes: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Apply changes from `subscription` before every read.
    pub fn with_change_feed(mut self, subscription: Subscription<GrantChange>) -> Self {
        self.changes = Some(Mutex::new(subscription));
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn invalidate(&self, change: &GrantChange) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        let before = entries.len();
        entries.retain(|key, _| !key.touches(change));
        let removed = before - entries.len();
        if removed > 0 {
            self.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
        }
    }

    pub fn invalidate_user(&self, user_id: UserId) {
        self.invalidate(&GrantChange::User(user_id));
    }

    pub fn invalidate_role(&self, role: &RoleKey) {
        self.invalidate(&GrantChange::Role(role.clone()));
    }

    pub fn invalidate_org(&self, org_id: OrgId) {
        self.invalidate(&GrantChange::Org(org_id));
    }

    pub fn invalidate_all(&self) {
        self.invalidate(&GrantChange::All);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.read().map(|e| e.len()).unwrap_or(0),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    fn apply_changes(&self) {
        let Some(changes) = &self.changes else {
            return;
        };
        let pending = match changes.lock() {
            Ok(subscription) => subscription.drain(),
            Err(_) => {
                // Without the feed we cannot know what changed.
                vec![GrantChange::All]
            }
        };
        for change in pending {
            self.invalidate(&change);
        }
    }

    fn cached<T>(
        &self,
        key: CacheKey,
        load: impl FnOnce(&S) -> Result<T, StoreError>,
        wrap: fn(T) -> CachedValue,
        unwrap: fn(&CachedValue) -> Option<T>,
    ) -> Result<T, StoreError>
    where
        T: Clone,
    {
        if !self.config.enabled {
            return load(&self.inner);
        }

        self.apply_changes();

        if let Ok(entries) = self.entries.read() {
            if let Some(entry) = entries.get(&key) {
                if !entry.is_expired(self.config.ttl) {
                    if let Some(value) = unwrap(&entry.value) {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(value);
                    }
                }
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let value = load(&self.inner)?;
        self.insert(key, wrap(value.clone()));
        Ok(value)
    }

    fn insert(&self, key: CacheKey, value: CachedValue) {
        let Ok(mut entries) = self.entries.write() else {
            return;
        };

        if entries.len() >= self.config.max_entries {
            let ttl = self.config.ttl;
            let before = entries.len();
            entries.retain(|_, v| !v.is_expired(ttl));
            self.evictions
                .fetch_add((before - entries.len()) as u64, Ordering::Relaxed);
        }

        while entries.len() >= self.config.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, v)| v.created_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
    }
}

impl<S: GrantStore> GrantStore for CachedGrantStore<S> {
    fn load_roles_for_user(&self, user_id: UserId) -> Result<Vec<RoleAssignment>, StoreError> {
        self.cached(
            CacheKey::Roles(user_id),
            |s| s.load_roles_for_user(user_id),
            CachedValue::Roles,
            |v| match v {
                CachedValue::Roles(r) => Some(r.clone()),
                _ => None,
            },
        )
    }

    fn load_role_permissions(&self, role: &RoleKey) -> Result<Vec<PermissionKey>, StoreError> {
        self.cached(
            CacheKey::RolePermissions(role.clone()),
            |s| s.load_role_permissions(role),
            CachedValue::Permissions,
            |v| match v {
                CachedValue::Permissions(p) => Some(p.clone()),
                _ => None,
            },
        )
    }

    fn load_active_scopes(
        &self,
        user_id: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<ScopeRecord>, StoreError> {
        self.cached(
            CacheKey::Scopes(user_id, permission.clone()),
            |s| s.load_active_scopes(user_id, permission),
            CachedValue::Scopes,
            |v| match v {
                CachedValue::Scopes(s) => Some(s.clone()),
                _ => None,
            },
        )
    }

    fn load_active_delegations(
        &self,
        delegatee: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<DelegationRecord>, StoreError> {
        self.cached(
            CacheKey::Delegations(delegatee, permission.clone()),
            |s| s.load_active_delegations(delegatee, permission),
            CachedValue::Delegations,
            |v| match v {
                CachedValue::Delegations(d) => Some(d.clone()),
                _ => None,
            },
        )
    }

    fn load_org_membership(
        &self,
        org_id: OrgId,
        user_id: UserId,
    ) -> Result<Option<OrgMembership>, StoreError> {
        self.cached(
            CacheKey::Membership(org_id, user_id),
            |s| s.load_org_membership(org_id, user_id),
            CachedValue::Membership,
            |v| match v {
                CachedValue::Membership(m) => Some(m.clone()),
                _ => None,
            },
        )
    }

    fn load_org_permissions(
        &self,
        org_id: OrgId,
        user_id: UserId,
        permission: &PermissionKey,
    ) -> Result<Vec<ScopeRecord>, StoreError> {
        self.cached(
            CacheKey::OrgPermissions(org_id, user_id, permission.clone()),
            |s| s.load_org_permissions(org_id, user_id, permission),
            CachedValue::Scopes,
            |v| match v {
                CachedValue::Scopes(s) => Some(s.clone()),
                _ => None,
            },
        )
    }

    fn load_conditions(&self, grant: &GrantRef) -> Result<Vec<ConditionRecord>, StoreError> {
        self.cached(
            CacheKey::Conditions(grant.clone()),
            |s| s.load_conditions(grant),
            CachedValue::Conditions,
            |v| match v {
                CachedValue::Conditions(c) => Some(c.clone()),
                _ => None,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use accord_auth::{PermissionDefinition, RoleDefinition};
    use chrono::Utc;

    use crate::grant_store::{GrantAdmin, InMemoryGrantStore};

    fn store_with_editor(user: UserId) -> Arc<InMemoryGrantStore> {
        let store = Arc::new(InMemoryGrantStore::new());
        store
            .define_permission(PermissionDefinition::new("orders:view"))
            .unwrap();
        store
            .define_role(RoleDefinition::new("editor", 1).with_permission("orders:view"))
            .unwrap();
        store.assign_role(user, "editor", Utc::now()).unwrap();
        store
    }

    #[test]
    fn second_read_is_a_hit() {
        let user = UserId::new();
        let cache = CachedGrantStore::new(store_with_editor(user), CacheConfig::default());

        assert_eq!(cache.load_roles_for_user(user).unwrap().len(), 1);
        assert_eq!(cache.load_roles_for_user(user).unwrap().len(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[test]
    fn disabled_cache_always_reads_through() {
        let user = UserId::new();
        let cache = CachedGrantStore::new(store_with_editor(user), CacheConfig::disabled());

        cache.load_roles_for_user(user).unwrap();
        cache.load_roles_for_user(user).unwrap();

        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn errors_are_not_cached() {
        let user = UserId::new();
        let store = store_with_editor(user);
        let cache = CachedGrantStore::new(store.clone(), CacheConfig::default());

        store.set_available(false);
        assert!(cache.load_roles_for_user(user).is_err());
        store.set_available(true);

        assert_eq!(cache.load_roles_for_user(user).unwrap().len(), 1);
        assert_eq!(cache.stats().hits, 0);
    }

    #[test]
    fn unobserved_writes_are_visible_after_ttl() {
        let user = UserId::new();
        let store = store_with_editor(user);
        let ttl = Duration::from_millis(200);
        let cache = CachedGrantStore::new(store.clone(), CacheConfig::default().with_ttl(ttl));

        assert_eq!(cache.load_roles_for_user(user).unwrap().len(), 1);
        store.unassign_role(user, &RoleKey::new("editor")).unwrap();

        // Within the TTL the stale answer may be served.
        assert_eq!(cache.load_roles_for_user(user).unwrap().len(), 1);

        thread::sleep(ttl + Duration::from_millis(50));
        assert!(cache.load_roles_for_user(user).unwrap().is_empty());
    }

    #[test]
    fn change_feed_invalidates_immediately() {
        let user = UserId::new();
        let store = store_with_editor(user);
        let cache = CachedGrantStore::new(store.clone(), CacheConfig::default())
            .with_change_feed(store.subscribe_changes());

        assert_eq!(cache.load_roles_for_user(user).unwrap().len(), 1);
        store.unassign_role(user, &RoleKey::new("editor")).unwrap();

        assert!(cache.load_roles_for_user(user).unwrap().is_empty());
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn role_changes_only_drop_that_role() {
        let user = UserId::new();
        let store = store_with_editor(user);
        let cache = CachedGrantStore::new(store.clone(), CacheConfig::default())
            .with_change_feed(store.subscribe_changes());

        cache.load_roles_for_user(user).unwrap();
        cache.load_role_permissions(&RoleKey::new("editor")).unwrap();
        store.deactivate_role(&RoleKey::new("editor")).unwrap();

        assert_eq!(
            cache.load_role_permissions(&RoleKey::new("editor")),
            Err(StoreError::UnknownRole(RoleKey::new("editor")))
        );
        // Role list for the user is still cached.
        cache.load_roles_for_user(user).unwrap();
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn manual_invalidation_by_user() {
        let user = UserId::new();
        let store = store_with_editor(user);
        let cache = CachedGrantStore::new(store.clone(), CacheConfig::default());

        cache.load_roles_for_user(user).unwrap();
        store
            .insert_scope(accord_auth::ScopeRecord::new(user, "orders:view", Utc::now()))
            .unwrap();
        cache.invalidate_user(user);

        assert_eq!(cache.stats().size, 0);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let store = Arc::new(InMemoryGrantStore::new());
        let cache = CachedGrantStore::new(store, CacheConfig::default().with_max_entries(2));

        for _ in 0..3 {
            cache.load_roles_for_user(UserId::new()).unwrap();
        }

        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.evictions, 1);
    }

    #[test]
    fn ttl_is_bounded() {
        let too_long = CacheConfig::default().with_ttl(MAX_CACHE_STALENESS + Duration::from_millis(1));
        assert_eq!(
            too_long.validate(),
            Err(ConfigError::StalenessTooLarge(MAX_CACHE_STALENESS + Duration::from_millis(1)))
        );
        assert!(CacheConfig::default().validate().is_ok());
        assert!(CacheConfig::default().ttl <= MAX_CACHE_STALENESS);

        let cache = CachedGrantStore::new(InMemoryGrantStore::new(), too_long);
        assert_eq!(cache.config().ttl, MAX_CACHE_STALENESS);
    }
}
