//! The handle passed to scoped work, and the guard that owns it.

use std::sync::Arc;

use tracing::warn;

use crate::audit::AuditLogEntry;
use crate::backend::IsolationBackend;
use crate::error::BackendError;
use crate::isolation::IsolationKey;
use crate::tenant::TenantId;

/// A pooled connection whose isolation variable is set to one tenant.
///
/// Work receives `&mut ScopedHandle` for the duration of one scope and
/// cannot keep it afterwards; the borrow ends when the work future completes.
pub struct ScopedHandle<B: IsolationBackend> {
    backend: Arc<B>,
    key: Arc<IsolationKey>,
    pub(super) conn: B::Connection,
    tenant_id: TenantId,
    scope_id: u64,
}

impl<B: IsolationBackend> ScopedHandle<B> {
    /// Returns the tenant this scope is bound to.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns the process-unique scope number used in logs.
    pub fn scope_id(&self) -> u64 {
        self.scope_id
    }

    /// Returns the driver client. Every statement issued through it is
    /// filtered by the tenant's isolation variable.
    pub fn client(&mut self) -> &mut B::Client {
        B::client(&mut self.conn)
    }

    /// Reads the isolation variable as the storage engine currently sees it.
    pub async fn isolation_value(&mut self) -> Result<Option<String>, BackendError> {
        self.backend.current_isolation(&mut self.conn, &self.key).await
    }

    /// Appends an audit row on this scope's connection.
    ///
    /// The row is written by the same connection as the caller's other
    /// statements, so it joins any transaction the caller has open.
    pub async fn append_audit(&mut self, entry: &AuditLogEntry) -> Result<(), BackendError> {
        if entry.tenant_id != self.tenant_id {
            return Err(BackendError::QueryError {
                message: format!(
                    "audit entry for tenant {} written in scope for tenant {}",
                    entry.tenant_id, self.tenant_id
                ),
            });
        }
        self.backend.append_audit(&mut self.conn, entry).await
    }
}

/// Owns a scoped connection until it is explicitly released or discarded.
///
/// Dropping the guard without calling either (cancellation, panic, early
/// return) discards the connection.
pub(crate) struct ScopeGuard<B: IsolationBackend> {
    handle: Option<ScopedHandle<B>>,
}

impl<B: IsolationBackend> ScopeGuard<B> {
    pub(crate) fn new(
        backend: Arc<B>,
        key: Arc<IsolationKey>,
        conn: B::Connection,
        tenant_id: TenantId,
        scope_id: u64,
    ) -> Self {
        Self {
            handle: Some(ScopedHandle {
                backend,
                key,
                conn,
                tenant_id,
                scope_id,
            }),
        }
    }

    pub(crate) fn handle(&mut self) -> Result<&mut ScopedHandle<B>, BackendError> {
        self.handle.as_mut().ok_or_else(|| BackendError::Internal {
            backend_name: "scope".to_string(),
            message: "scope guard used after release".to_string(),
            source: None,
        })
    }

    /// Clears the variable and hands the connection back to the pool, or
    /// discards it if the clear cannot be confirmed.
    pub(crate) async fn close(mut self, verify: bool) {
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        let backend = Arc::clone(&handle.backend);
        let key = Arc::clone(&handle.key);

        let clean = match backend.clear_isolation(&mut handle.conn, &key).await {
            Ok(()) if verify => match backend.current_isolation(&mut handle.conn, &key).await {
                Ok(None) => true,
                Ok(Some(_)) => {
                    warn!(
                        scope_id = handle.scope_id,
                        tenant_id = %handle.tenant_id,
                        "isolation variable survived clear; discarding connection"
                    );
                    false
                }
                Err(e) => {
                    warn!(scope_id = handle.scope_id, error = %e, "could not verify clear; discarding connection");
                    false
                }
            },
            Ok(()) => true,
            Err(e) => {
                warn!(scope_id = handle.scope_id, error = %e, "failed to clear isolation variable; discarding connection");
                false
            }
        };

        if clean {
            self.release();
        } else {
            self.discard();
        }
    }

    pub(crate) fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.backend.release(handle.conn);
        }
    }

    pub(crate) fn discard(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.backend.discard(handle.conn);
        }
    }
}

impl<B: IsolationBackend> Drop for ScopeGuard<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            warn!(
                scope_id = handle.scope_id,
                tenant_id = %handle.tenant_id,
                "scope abandoned before release; discarding connection"
            );
            handle.backend.discard(handle.conn);
        }
    }
}
