//! Slug lookup cache with explicit invalidation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tenant::{Tenant, TenantId, TenantSlug, TenantStatus};

/// Configuration for the tenant cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether lookups are cached at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How long an entry is served before it is looked up again.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Upper bound on cached tenants. Expired entries are evicted first.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_true() -> bool {
    true
}

fn default_ttl_ms() -> u64 {
    60_000
}

fn default_max_entries() -> usize {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: default_ttl_ms(),
            max_entries: default_max_entries(),
        }
    }
}

/// Lifecycle events that invalidate cached tenants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantEvent {
    /// The tenant was suspended.
    Suspended(TenantId),
    /// The tenant was deleted.
    Deleted(TenantId),
    /// A suspended tenant was reactivated.
    Reactivated(TenantId),
}

impl TenantEvent {
    /// The event a status change to `status` publishes.
    pub fn status_changed(tenant_id: TenantId, status: TenantStatus) -> Self {
        match status {
            TenantStatus::Active => TenantEvent::Reactivated(tenant_id),
            TenantStatus::Suspended => TenantEvent::Suspended(tenant_id),
        }
    }

    /// Returns the tenant the event refers to.
    pub fn tenant_id(&self) -> &TenantId {
        match self {
            TenantEvent::Suspended(id) | TenantEvent::Deleted(id) | TenantEvent::Reactivated(id) => {
                id
            }
        }
    }
}

#[derive(Debug)]
struct Entry {
    tenant: Tenant,
    inserted_at: Instant,
}

/// A TTL cache of active tenants keyed by slug.
///
/// Only active tenants are stored. Suspension and deletion events remove
/// the tenant immediately; the TTL bounds staleness when an event is missed.
#[derive(Debug)]
pub struct TenantCache {
    config: CacheConfig,
    entries: RwLock<HashMap<TenantSlug, Entry>>,
}

impl TenantCache {
    /// Creates an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_millis(self.config.ttl_ms)
    }

    /// Returns a cached, unexpired tenant.
    pub fn get(&self, slug: &TenantSlug) -> Option<Tenant> {
        if !self.config.enabled {
            return None;
        }
        let entries = self.entries.read();
        entries
            .get(slug)
            .filter(|entry| entry.inserted_at.elapsed() < self.ttl())
            .map(|entry| entry.tenant.clone())
    }

    /// Caches an active tenant. Inactive tenants are ignored.
    pub fn insert(&self, tenant: &Tenant) {
        if !self.config.enabled || !tenant.is_active() {
            return;
        }
        let mut entries = self.entries.write();
        if entries.len() >= self.config.max_entries && !entries.contains_key(&tenant.slug) {
            let ttl = self.ttl();
            entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
            if entries.len() >= self.config.max_entries {
                return;
            }
        }
        entries.insert(
            tenant.slug.clone(),
            Entry {
                tenant: tenant.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Applies a lifecycle event.
    pub fn apply(&self, event: &TenantEvent) {
        let id = event.tenant_id();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| &entry.tenant.id != id);
        debug!(
            tenant_id = %id,
            event = ?event,
            removed = before - entries.len(),
            "tenant cache invalidated"
        );
    }

    /// Removes the entry for `slug`.
    pub fn invalidate_slug(&self, slug: &TenantSlug) {
        self.entries.write().remove(slug);
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Returns the number of cached tenants, including expired ones.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
