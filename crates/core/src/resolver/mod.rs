//! Maps inbound tenant signals to a canonical tenant.
//!
//! Resolution consults the header, the path prefix and the session, in that
//! order. Any two present signals that disagree are a fatal mismatch. The
//! agreed slug is then looked up through a [`TenantDirectory`], with a
//! [`TenantCache`] in front of it.

mod source;

use std::sync::Arc;

use tracing::{debug, warn};

pub use source::{TenantSignals, TenantSource};

use crate::directory::{CacheConfig, TenantCache, TenantDirectory, TenantEvent};
use crate::error::{TenancyResult, TenantError};
use crate::tenant::{Tenant, TenantSlug};

/// Result of resolving a tenant from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTenant {
    /// The resolved, active tenant.
    pub tenant: Tenant,
    /// The highest-priority source that carried the slug.
    pub source: TenantSource,
}

/// Resolves tenants from request signals.
pub struct TenantResolver {
    directory: Arc<dyn TenantDirectory>,
    cache: TenantCache,
}

impl std::fmt::Debug for TenantResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantResolver")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl TenantResolver {
    /// Creates a resolver over `directory`.
    pub fn new(directory: Arc<dyn TenantDirectory>, cache: CacheConfig) -> Self {
        Self {
            directory,
            cache: TenantCache::new(cache),
        }
    }

    /// Returns the lookup cache.
    pub fn cache(&self) -> &TenantCache {
        &self.cache
    }

    /// Applies a tenant lifecycle event to the cache.
    pub fn on_event(&self, event: &TenantEvent) {
        self.cache.apply(event);
    }

    /// Checks that all present signals agree and returns the primary one.
    ///
    /// This runs before any lookup so a conflicting request is rejected
    /// without touching storage.
    pub fn agreed_slug(signals: &TenantSignals) -> Result<(TenantSource, String), TenantError> {
        let present = signals.present();
        let Some((primary_source, primary_slug)) = present.first().copied() else {
            return Err(TenantError::Unidentified);
        };

        if let Some((conflicting_source, conflicting_slug)) = present
            .iter()
            .skip(1)
            .find(|(_, slug)| *slug != primary_slug)
        {
            warn!(
                primary_source = %primary_source,
                primary_slug = %primary_slug,
                conflicting_source = %conflicting_source,
                conflicting_slug = %conflicting_slug,
                "tenant signals disagree"
            );
            return Err(TenantError::Mismatch {
                primary_slug: primary_slug.to_string(),
                primary_source,
                conflicting_slug: conflicting_slug.to_string(),
                conflicting_source: *conflicting_source,
            });
        }

        Ok((primary_source, primary_slug.to_string()))
    }

    /// Resolves the tenant for a request.
    ///
    /// Unknown, malformed and suspended slugs all yield
    /// [`TenantError::NotFound`] with the same message.
    pub async fn resolve(&self, signals: &TenantSignals) -> TenancyResult<ResolvedTenant> {
        let (source, raw) = Self::agreed_slug(signals)?;

        let Ok(slug) = TenantSlug::parse(raw.as_str()) else {
            debug!(slug = %raw, source = %source, "malformed tenant slug");
            return Err(TenantError::NotFound { slug: raw }.into());
        };

        let tenant = self.lookup(&slug).await?;
        Ok(ResolvedTenant { tenant, source })
    }

    async fn lookup(&self, slug: &TenantSlug) -> TenancyResult<Tenant> {
        if let Some(tenant) = self.cache.get(slug) {
            return Ok(tenant);
        }

        let not_found = || TenantError::NotFound {
            slug: slug.to_string(),
        };

        let tenant = self
            .directory
            .find_by_slug(slug)
            .await?
            .ok_or_else(not_found)?;

        if !tenant.is_active() {
            debug!(tenant_id = %tenant.id, slug = %slug, "tenant is suspended");
            return Err(not_found().into());
        }

        self.cache.insert(&tenant);
        Ok(tenant)
    }
}
