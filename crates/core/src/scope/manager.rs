//! The scoped context manager.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{Instrument, debug, debug_span, error, info, warn};

use super::config::ScopeConfig;
use super::handle::{ScopeGuard, ScopedHandle};
use crate::backend::{IsolationBackend, PoolStatus};
use crate::error::{BackendError, ScopeError, TenancyError};
use crate::isolation::IsolationKey;
use crate::tenant::{RequestContext, TenantId};

/// The future type scoped work returns.
///
/// Work closures are written as `|scope| Box::pin(async move { ... })`; the
/// `'c` lifetime ties the future to the borrowed [`ScopedHandle`].
pub type ScopeFuture<'c, T> = Pin<Box<dyn Future<Output = T> + Send + 'c>>;

tokio::task_local! {
    static ACTIVE_SCOPE: TenantId;
}

/// Returns the tenant of the scope the current task is running inside, if any.
pub fn active_scope_tenant() -> Option<TenantId> {
    ACTIVE_SCOPE.try_with(|tenant| tenant.clone()).ok()
}

#[derive(Debug, Default)]
struct Lifecycle {
    active: AtomicUsize,
    closing: AtomicBool,
    drained: Notify,
}

struct ActiveScope<'a>(&'a Lifecycle);

impl Lifecycle {
    fn enter(&self) -> Result<ActiveScope<'_>, ScopeError> {
        if self.closing.load(Ordering::Acquire) {
            return Err(ScopeError::ShuttingDown);
        }
        self.active.fetch_add(1, Ordering::AcqRel);
        let scope = ActiveScope(self);
        if self.closing.load(Ordering::Acquire) {
            return Err(ScopeError::ShuttingDown);
        }
        Ok(scope)
    }
}

impl Drop for ActiveScope<'_> {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

/// Runs caller work on a pooled connection bound to exactly one tenant.
///
/// Every scope follows the same protocol:
///
/// 1. Borrow a connection, waiting at most `pool_timeout_ms`.
/// 2. Set the isolation variable before any other statement.
/// 3. Run the work with a [`ScopedHandle`], bounded by `work_timeout_ms`.
///    Work that overruns the deadline fails with [`ScopeError::WorkTimeout`]
///    even if it eventually returns.
/// 4. Clear the variable and verify it is gone.
/// 5. Return the connection to the pool, or discard it if any step failed,
///    timed out or was cancelled.
///
/// # Example
///
/// ```no_run
/// # use tenantscope_core::backends::sqlite::SqliteBackend;
/// # use tenantscope_core::scope::{ScopeConfig, ScopedContextManager};
/// # use tenantscope_core::isolation::{IsolationConfig, IsolationKey};
/// # use tenantscope_core::tenant::TenantId;
/// # use tenantscope_core::TenancyError;
/// # use std::sync::Arc;
/// # async fn example() -> Result<(), TenancyError> {
/// let backend = Arc::new(SqliteBackend::open("app.db")?);
/// let key = IsolationKey::new(&IsolationConfig::default())?;
/// let manager = ScopedContextManager::new(backend, key, ScopeConfig::default());
///
/// let count: i64 = manager
///     .with_tenant_scope(&TenantId::new("t-1"), |scope| {
///         Box::pin(async move {
///             let n = scope
///                 .client()
///                 .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
///             Ok::<_, TenancyError>(n)
///         })
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ScopedContextManager<B: IsolationBackend> {
    backend: Arc<B>,
    key: Arc<IsolationKey>,
    config: ScopeConfig,
    lifecycle: Lifecycle,
    next_scope_id: AtomicU64,
}

impl<B: IsolationBackend> ScopedContextManager<B> {
    /// Creates a manager over `backend`.
    pub fn new(backend: Arc<B>, key: IsolationKey, config: ScopeConfig) -> Self {
        Self {
            backend,
            key: Arc::new(key),
            config,
            lifecycle: Lifecycle::default(),
            next_scope_id: AtomicU64::new(1),
        }
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the isolation key applied to every scope.
    pub fn key(&self) -> &IsolationKey {
        &self.key
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ScopeConfig {
        &self.config
    }

    /// Runs `work` inside a scope for the request's tenant.
    pub async fn with_request_scope<T, E, F>(&self, ctx: &RequestContext, work: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut ScopedHandle<B>) -> ScopeFuture<'c, Result<T, E>>,
        E: From<TenancyError>,
    {
        let span = debug_span!("request_scope", request_id = %ctx.request_id());
        self.with_tenant_scope(ctx.tenant_id(), work)
            .instrument(span)
            .await
    }

    /// Runs `work` inside a scope for `tenant_id`.
    ///
    /// Opening a scope for a different tenant from inside an active scope
    /// fails with [`ScopeError::NestedScopeViolation`]. A nested scope for the
    /// same tenant borrows a connection of its own.
    pub async fn with_tenant_scope<T, E, F>(&self, tenant_id: &TenantId, work: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut ScopedHandle<B>) -> ScopeFuture<'c, Result<T, E>>,
        E: From<TenancyError>,
    {
        if let Some(active) = active_scope_tenant() {
            if &active != tenant_id {
                error!(
                    alert = true,
                    active_tenant = %active,
                    requested_tenant = %tenant_id,
                    "nested scope for a different tenant"
                );
                return Err(scope_error(ScopeError::NestedScopeViolation {
                    active,
                    requested: tenant_id.clone(),
                }));
            }
        }

        let value = self.key.render(tenant_id).map_err(|e| {
            error!(tenant_id = %tenant_id, error = %e, "rejected tenant id before opening scope");
            scope_error::<E>(e)
        })?;

        let _active = self.lifecycle.enter().map_err(scope_error::<E>)?;
        let scope_id = self.next_scope_id.fetch_add(1, Ordering::Relaxed);
        let span = debug_span!("tenant_scope", scope_id, tenant_id = %tenant_id);

        self.run_scope(tenant_id, &value, scope_id, work)
            .instrument(span)
            .await
    }

    async fn run_scope<T, E, F>(
        &self,
        tenant_id: &TenantId,
        value: &str,
        scope_id: u64,
        work: F,
    ) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut ScopedHandle<B>) -> ScopeFuture<'c, Result<T, E>>,
        E: From<TenancyError>,
    {
        let started = Instant::now();
        let conn = self.borrow().await.map_err(TenancyError::from)?;
        let mut guard = ScopeGuard::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.key),
            conn,
            tenant_id.clone(),
            scope_id,
        );

        if let Err(message) = self.apply(&mut guard, value).await {
            error!(error = %message, "failed to set isolation context; discarding connection");
            guard.discard();
            return Err(scope_error(ScopeError::ContextSetFailure {
                tenant_id: tenant_id.to_string(),
                message,
            }));
        }

        let deadline = Instant::now() + self.config.work_timeout();
        let outcome = {
            let handle = guard.handle().map_err(TenancyError::from)?;
            self.backend
                .set_statement_deadline(&mut handle.conn, Some(deadline));
            let fut = ACTIVE_SCOPE.scope(tenant_id.clone(), work(handle));
            tokio::time::timeout(self.config.work_timeout(), fut).await
        };

        // Work that blocked past the deadline inside a synchronous statement
        // only returns once the backend aborts it, so the clock is checked too.
        let result = match outcome {
            Ok(result) if Instant::now() < deadline => result,
            _ => {
                warn!(
                    timeout_ms = self.config.work_timeout_ms,
                    "scoped work exceeded its deadline; discarding connection"
                );
                guard.discard();
                return Err(scope_error(ScopeError::WorkTimeout {
                    tenant_id: tenant_id.clone(),
                    timeout_ms: self.config.work_timeout_ms,
                }));
            }
        };

        let handle = guard.handle().map_err(TenancyError::from)?;
        self.backend.set_statement_deadline(&mut handle.conn, None);
        guard.close(self.config.verify_isolation).await;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "scope closed"
        );
        result
    }

    async fn borrow(&self) -> Result<B::Connection, ScopeError> {
        match tokio::time::timeout(self.config.pool_timeout(), self.backend.acquire()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(BackendError::PoolExhausted { .. })) | Err(_) => {
                warn!(
                    timeout_ms = self.config.pool_timeout_ms,
                    "timed out waiting for a pooled connection"
                );
                Err(ScopeError::PoolTimeout {
                    timeout_ms: self.config.pool_timeout_ms,
                })
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to borrow a connection");
                Err(ScopeError::PoolTimeout {
                    timeout_ms: self.config.pool_timeout_ms,
                })
            }
        }
    }

    async fn apply(&self, guard: &mut ScopeGuard<B>, value: &str) -> Result<(), String> {
        let handle = guard.handle().map_err(|e| e.to_string())?;

        self.backend
            .apply_isolation(&mut handle.conn, &self.key, value)
            .await
            .map_err(|e| e.to_string())?;

        if self.config.verify_isolation {
            let observed = self
                .backend
                .current_isolation(&mut handle.conn, &self.key)
                .await
                .map_err(|e| e.to_string())?;
            if observed.as_deref() != Some(value) {
                return Err(format!(
                    "isolation variable reads back as {:?} after set",
                    observed
                ));
            }
        }
        Ok(())
    }

    /// Returns the number of scopes currently open.
    pub fn active_scopes(&self) -> usize {
        self.lifecycle.active.load(Ordering::Acquire)
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.lifecycle.closing.load(Ordering::Acquire)
    }

    /// Refuses new scopes and waits up to `grace` for open scopes to finish.
    ///
    /// Returns `true` if every scope finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.lifecycle.closing.store(true, Ordering::Release);
        let deadline = tokio::time::Instant::now() + grace;

        loop {
            let notified = self.lifecycle.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let remaining = self.active_scopes();
            if remaining == 0 {
                info!("scope manager drained");
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(
                    remaining = self.active_scopes(),
                    "shutdown grace period elapsed with scopes still open"
                );
                return false;
            }
        }
    }

    /// Checks the backend and returns the pool occupancy.
    pub async fn health_check(&self) -> Result<PoolStatus, BackendError> {
        self.backend.health_check().await?;
        Ok(self.backend.pool_status())
    }
}

fn scope_error<E: From<TenancyError>>(err: ScopeError) -> E {
    E::from(TenancyError::Scope(err))
}
