//! Tenant-scoped audit trail.
//!
//! Every mutating request appends one [`AuditLogEntry`]. The entry is written
//! inside a tenant scope, so the audit table's row-level policy tags and
//! filters it exactly like business data.
//!
//! Audit writes are soft: a failure never rolls back or fails the primary
//! action. Failures are logged at error level and counted, see
//! [`AuditRecorder::failures`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::backend::{BackendKind, IsolationBackend};
use crate::error::{BackendError, TenancyError};
use crate::isolation::{IsolationKey, TenantTableBuilder};
use crate::scope::{ScopedContextManager, ScopedHandle};
use crate::tenant::{PrincipalId, RequestContext, TenantId};

/// Name of the audit table.
pub const AUDIT_TABLE: &str = "audit_log";

/// The record a mutation is audited against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTarget {
    /// Table the mutation touched.
    pub table: String,
    /// Primary key of the touched row.
    pub id: String,
}

impl AuditTarget {
    /// Creates a target.
    pub fn new(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
        }
    }
}

/// An immutable, append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    /// Unique entry id.
    pub id: Uuid,
    /// Tenant the mutation belongs to.
    pub tenant_id: TenantId,
    /// Principal that performed the mutation.
    pub actor_id: PrincipalId,
    /// Action name, e.g. `items:create`.
    pub action: String,
    /// Table the mutation touched.
    pub target_table: String,
    /// Primary key of the touched row.
    pub target_id: String,
    /// Opaque JSON describing the change.
    pub payload: serde_json::Value,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Creates an entry stamped with a fresh id and the current time.
    pub fn new(
        tenant_id: TenantId,
        actor_id: PrincipalId,
        action: impl Into<String>,
        target: AuditTarget,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            actor_id,
            action: action.into(),
            target_table: target.table,
            target_id: target.id,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Returns the DDL builder for the audit table on the given backend.
pub fn audit_table(key: &IsolationKey, kind: BackendKind) -> TenantTableBuilder {
    let (json, timestamp) = match kind {
        BackendKind::Postgres => ("JSONB", "TIMESTAMPTZ"),
        _ => ("TEXT", "TEXT"),
    };
    TenantTableBuilder::new(AUDIT_TABLE, key)
        .column("actor_id", "TEXT", false)
        .column("action", "TEXT", false)
        .column("target_table", "TEXT", false)
        .column("target_id", "TEXT", false)
        .column("payload", json, false)
        .column("created_at", timestamp, false)
        .index("idx_audit_log_created_at", vec!["created_at"], false)
        .append_only()
}

/// Appends audit entries through tenant scopes.
#[derive(Debug)]
pub struct AuditRecorder<B: IsolationBackend> {
    manager: Arc<ScopedContextManager<B>>,
    failures: AtomicU64,
}

impl<B: IsolationBackend> AuditRecorder<B> {
    /// Creates a recorder that writes through `manager`.
    pub fn new(manager: Arc<ScopedContextManager<B>>) -> Self {
        Self {
            manager,
            failures: AtomicU64::new(0),
        }
    }

    /// Records a mutation in its own tenant scope.
    ///
    /// Never fails. A write failure is logged and counted.
    pub async fn record(
        &self,
        tenant_id: &TenantId,
        actor_id: &PrincipalId,
        action: &str,
        target: AuditTarget,
        payload: serde_json::Value,
    ) {
        let entry = AuditLogEntry::new(
            tenant_id.clone(),
            actor_id.clone(),
            action,
            target,
            payload,
        );
        let entry_id = entry.id;

        let result: Result<(), TenancyError> = self
            .manager
            .with_tenant_scope(tenant_id, move |scope| {
                Box::pin(async move { scope.append_audit(&entry).await.map_err(TenancyError::from) })
            })
            .await;

        match result {
            Ok(()) => debug!(tenant_id = %tenant_id, action, %entry_id, "audit record written"),
            Err(e) => {
                let total = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    tenant_id = %tenant_id,
                    actor_id = %actor_id,
                    action,
                    %entry_id,
                    failures = total,
                    error = %e,
                    "failed to write audit record"
                );
            }
        }
    }

    /// Records a mutation on behalf of the request's principal.
    pub async fn record_for(
        &self,
        ctx: &RequestContext,
        action: &str,
        target: AuditTarget,
        payload: serde_json::Value,
    ) {
        self.record(ctx.tenant_id(), ctx.principal_id(), action, target, payload)
            .await
    }

    /// Records a mutation on an already open scope.
    ///
    /// The entry commits or rolls back with the caller's transaction, and the
    /// error is returned so the caller can choose to abort.
    pub async fn record_in(
        scope: &mut ScopedHandle<B>,
        actor_id: &PrincipalId,
        action: &str,
        target: AuditTarget,
        payload: serde_json::Value,
    ) -> Result<(), BackendError> {
        let entry = AuditLogEntry::new(
            scope.tenant_id().clone(),
            actor_id.clone(),
            action,
            target,
            payload,
        );
        scope.append_audit(&entry).await
    }

    /// Returns how many audit writes have failed since startup.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::IsolationConfig;

    #[test]
    fn test_entry_serializes_in_wire_shape() {
        let entry = AuditLogEntry::new(
            TenantId::new("t-1"),
            PrincipalId::new("user-1"),
            "items:create",
            AuditTarget::new("items", "42"),
            serde_json::json!({"name": "Gel polish"}),
        );
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["tenantId"], "t-1");
        assert_eq!(json["actorId"], "user-1");
        assert_eq!(json["targetTable"], "items");
        assert_eq!(json["targetId"], "42");
        assert_eq!(json["payload"]["name"], "Gel polish");
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn test_audit_table_types_per_backend() {
        let key = IsolationKey::new(&IsolationConfig::default()).unwrap();
        let pg = audit_table(&key, BackendKind::Postgres).to_postgres_ddl().unwrap();
        assert!(pg.contains("payload JSONB NOT NULL"));
        assert!(pg.contains("FOR INSERT"));

        let lite = audit_table(&key, BackendKind::Sqlite).to_sqlite_ddl().unwrap();
        assert!(lite.contains("payload TEXT NOT NULL"));
        assert!(lite.contains("append-only"));
    }
}
