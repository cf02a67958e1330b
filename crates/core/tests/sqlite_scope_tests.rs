//! Scope manager integration tests on the SQLite backend.
//!
//! These tests exercise the isolation contract end to end: connections are
//! drawn from a small file-backed pool and reused across tenants, and every
//! assertion is made against rows actually read back from SQLite.

#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use tenantscope_core::audit::{AuditRecorder, AuditTarget};
use tenantscope_core::backends::sqlite::{SqliteBackend, SqliteBackendConfig};
use tenantscope_core::error::{ScopeError, TenancyError};
use tenantscope_core::isolation::{IsolationConfig, IsolationKey, TenantTableBuilder};
use tenantscope_core::scope::{ScopeConfig, ScopedContextManager, active_scope_tenant};
use tenantscope_core::tenant::{PrincipalId, TenantId};
use tenantscope_core::{BackendError, IsolationBackend};

struct Fixture {
    backend: Arc<SqliteBackend>,
    manager: Arc<ScopedContextManager<SqliteBackend>>,
    _dir: TempDir,
}

async fn fixture(max_connections: u32, scope: ScopeConfig) -> Fixture {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = SqliteBackendConfig {
        max_connections,
        min_connections: 1,
        connection_timeout_ms: 5000,
        ..Default::default()
    };
    let backend = Arc::new(
        SqliteBackend::with_config(dir.path().join("tenants.db"), config)
            .expect("Failed to create SQLite backend"),
    );

    let key = IsolationKey::new(&IsolationConfig::default()).expect("Invalid isolation key");
    backend.init_schema(&key).await.expect("Failed to initialize schema");
    backend
        .install_table(&TenantTableBuilder::new("items", &key).column("name", "TEXT", false))
        .await
        .expect("Failed to install items table");

    let manager = Arc::new(ScopedContextManager::new(backend.clone(), key, scope));
    Fixture {
        backend,
        manager,
        _dir: dir,
    }
}

async fn assert_pool_is_clean(backend: &SqliteBackend) {
    let key = IsolationKey::new(&IsolationConfig::default()).unwrap();
    let mut conn = backend.acquire().await.expect("Failed to borrow connection");
    let value = backend.current_isolation(&mut conn, &key).await.unwrap();
    backend.release(conn);
    assert_eq!(value, None, "pooled connection leaked an isolation value");
}

async fn count_items(manager: &ScopedContextManager<SqliteBackend>, tenant: &TenantId) -> i64 {
    manager
        .with_tenant_scope(tenant, |scope| {
            Box::pin(async move {
                let n = scope
                    .client()
                    .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
                Ok::<_, TenancyError>(n)
            })
        })
        .await
        .unwrap()
}

// ============================================================================
// Isolation Invariant
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_interleaved_scopes_observe_only_own_rows() {
    let fx = fixture(2, ScopeConfig::default()).await;
    let actor = PrincipalId::new("stylist-1");

    let mut handles = Vec::new();
    for i in 0..50 {
        let manager = fx.manager.clone();
        let actor = actor.clone();
        let tenant = TenantId::new(if i % 2 == 0 { "t-1" } else { "t-2" });

        handles.push(tokio::spawn(async move {
            manager
                .with_tenant_scope(&tenant, move |scope| {
                    Box::pin(async move {
                        let id = format!("item-{i}");
                        let owner = scope.tenant_id().to_string();
                        scope.client().execute(
                            "INSERT INTO items (id, name) VALUES (?1, ?2)",
                            rusqlite::params![id, owner],
                        )?;
                        AuditRecorder::record_in(
                            scope,
                            &actor,
                            "items:create",
                            AuditTarget::new("items", id.clone()),
                            json!({ "name": owner }),
                        )
                        .await?;

                        tokio::task::yield_now().await;

                        let mut stmt = scope.client().prepare("SELECT name FROM items")?;
                        let names = stmt
                            .query_map([], |row| row.get::<_, String>(0))?
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok::<_, TenancyError>((owner, names))
                    })
                })
                .await
        }));
    }

    for handle in handles {
        let (owner, names) = handle.await.expect("task panicked").expect("scope failed");
        assert!(!names.is_empty());
        assert!(
            names.iter().all(|name| *name == owner),
            "tenant {owner} observed foreign rows: {names:?}"
        );
    }

    for tenant in ["t-1", "t-2"] {
        let tenant = TenantId::new(tenant);
        assert_eq!(count_items(&fx.manager, &tenant).await, 25);

        let audit: Vec<(String, String)> = fx
            .manager
            .with_tenant_scope(&tenant, |scope| {
                Box::pin(async move {
                    let mut stmt = scope
                        .client()
                        .prepare("SELECT tenant_id, action FROM audit_log")?;
                    let rows = stmt
                        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok::<_, TenancyError>(rows)
                })
            })
            .await
            .unwrap();
        assert_eq!(audit.len(), 25);
        assert!(audit.iter().all(|(t, action)| t == tenant.as_str() && action == "items:create"));
    }

    assert_eq!(fx.manager.active_scopes(), 0);
    assert_pool_is_clean(&fx.backend).await;
}

#[tokio::test]
async fn test_scope_sets_variable_and_task_local() {
    let fx = fixture(1, ScopeConfig::default()).await;
    let tenant = TenantId::new("t-1");

    let (value, active) = fx
        .manager
        .with_tenant_scope(&tenant, |scope| {
            Box::pin(async move {
                let value = scope.isolation_value().await?;
                Ok::<_, TenancyError>((value, active_scope_tenant()))
            })
        })
        .await
        .unwrap();

    assert_eq!(value.as_deref(), Some("t-1"));
    assert_eq!(active, Some(tenant));
    assert_eq!(active_scope_tenant(), None);
}

// ============================================================================
// Failure Paths
// ============================================================================

#[tokio::test]
async fn test_failing_work_does_not_leak_isolation() {
    let fx = fixture(1, ScopeConfig::default()).await;

    let result: Result<(), TenancyError> = fx
        .manager
        .with_tenant_scope(&TenantId::new("t-1"), |scope| {
            Box::pin(async move {
                scope
                    .client()
                    .execute("INSERT INTO items (id, name) VALUES ('a', 'x')", [])?;
                Err::<(), _>(TenancyError::from(BackendError::QueryError {
                    message: "business rule failed".to_string(),
                }))
            })
        })
        .await;
    assert!(result.is_err());

    assert_pool_is_clean(&fx.backend).await;
    assert_eq!(count_items(&fx.manager, &TenantId::new("t-2")).await, 0);
}

#[tokio::test]
async fn test_malformed_tenant_id_fails_before_borrowing() {
    let fx = fixture(1, ScopeConfig::default()).await;
    let before = fx.backend.pool_status();

    let err = fx
        .manager
        .with_tenant_scope(&TenantId::new("t-1' OR '1'='1"), |_scope| {
            Box::pin(async move { Ok::<_, TenancyError>(()) })
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TenancyError::Scope(ScopeError::ContextSetFailure { .. })
    ));
    assert!(err.is_isolation_violation());
    assert_eq!(fx.backend.pool_status(), before);
}

#[tokio::test]
async fn test_panicking_work_discards_connection() {
    let fx = fixture(1, ScopeConfig::default()).await;
    let manager = fx.manager.clone();

    let joined = tokio::spawn(async move {
        manager
            .with_tenant_scope(&TenantId::new("t-1"), |_scope| {
                Box::pin(async move {
                    if true {
                        panic!("handler bug");
                    }
                    Ok::<_, TenancyError>(())
                })
            })
            .await
    })
    .await;
    assert!(joined.is_err());

    assert_eq!(fx.manager.active_scopes(), 0);
    assert_pool_is_clean(&fx.backend).await;
}

#[tokio::test]
async fn test_cancelled_scope_discards_connection() {
    let fx = fixture(1, ScopeConfig::default()).await;
    let manager = fx.manager.clone();

    let task = tokio::spawn(async move {
        manager
            .with_tenant_scope(&TenantId::new("t-1"), |_scope| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, TenancyError>(())
                })
            })
            .await
    });

    while fx.manager.active_scopes() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(fx.manager.active_scopes(), 0);
    assert_pool_is_clean(&fx.backend).await;
}

#[tokio::test]
async fn test_work_timeout_tears_down_scope() {
    let fx = fixture(
        1,
        ScopeConfig {
            work_timeout_ms: 50,
            ..Default::default()
        },
    )
    .await;

    let err = fx
        .manager
        .with_tenant_scope(&TenantId::new("t-1"), |_scope| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, TenancyError>(())
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TenancyError::Scope(ScopeError::WorkTimeout { timeout_ms: 50, .. })
    ));
    assert_pool_is_clean(&fx.backend).await;
}

#[tokio::test]
async fn test_work_timeout_interrupts_blocking_statement() {
    let fx = fixture(
        1,
        ScopeConfig {
            work_timeout_ms: 50,
            ..Default::default()
        },
    )
    .await;

    let started = std::time::Instant::now();
    let err = fx
        .manager
        .with_tenant_scope(&TenantId::new("t-1"), |scope| {
            Box::pin(async move {
                // Runs on the polling thread without yielding to the runtime
                let n: i64 = scope.client().query_row(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 20000000) \
                     SELECT COUNT(*) FROM c",
                    [],
                    |row| row.get(0),
                )?;
                Ok::<_, TenancyError>(n)
            })
        })
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            TenancyError::Scope(ScopeError::WorkTimeout { timeout_ms: 50, .. })
        ),
        "unexpected error: {err:?}"
    );
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "statement ran for {:?}",
        started.elapsed()
    );
    assert_pool_is_clean(&fx.backend).await;

    // The replacement connection carries no deadline from the aborted scope
    assert_eq!(count_items(&fx.manager, &TenantId::new("t-1")).await, 0);
}

#[tokio::test]
async fn test_pool_timeout() {
    let fx = fixture(
        1,
        ScopeConfig {
            pool_timeout_ms: 50,
            ..Default::default()
        },
    )
    .await;

    let held = fx.backend.acquire().await.unwrap();
    let err = fx
        .manager
        .with_tenant_scope(&TenantId::new("t-1"), |_scope| {
            Box::pin(async move { Ok::<_, TenancyError>(()) })
        })
        .await
        .unwrap_err();
    fx.backend.release(held);

    assert!(matches!(
        err,
        TenancyError::Scope(ScopeError::PoolTimeout { .. })
    ));
    assert!(err.is_retryable());
}

// ============================================================================
// Nested Scopes
// ============================================================================

#[tokio::test]
async fn test_nested_scope_for_other_tenant_is_rejected() {
    let fx = fixture(2, ScopeConfig::default()).await;
    let manager = fx.manager.clone();

    let nested = fx
        .manager
        .with_tenant_scope(&TenantId::new("t-1"), move |_scope| {
            Box::pin(async move {
                let inner = manager
                    .with_tenant_scope(&TenantId::new("t-2"), |_scope| {
                        Box::pin(async move { Ok::<_, TenancyError>(()) })
                    })
                    .await;
                Ok::<_, TenancyError>(inner)
            })
        })
        .await
        .unwrap();

    match nested {
        Err(TenancyError::Scope(ScopeError::NestedScopeViolation { active, requested })) => {
            assert_eq!(active, TenantId::new("t-1"));
            assert_eq!(requested, TenantId::new("t-2"));
        }
        other => panic!("expected nested scope violation, got {other:?}"),
    }
    assert_pool_is_clean(&fx.backend).await;
}

#[tokio::test]
async fn test_nested_scope_for_same_tenant_uses_own_connection() {
    let fx = fixture(2, ScopeConfig::default()).await;
    let manager = fx.manager.clone();

    let inner_value = fx
        .manager
        .with_tenant_scope(&TenantId::new("t-1"), move |_scope| {
            Box::pin(async move {
                manager
                    .with_tenant_scope(&TenantId::new("t-1"), |inner| {
                        Box::pin(async move {
                            let value = inner.isolation_value().await?;
                            Ok::<_, TenancyError>(value)
                        })
                    })
                    .await
            })
        })
        .await
        .unwrap();

    assert_eq!(inner_value.as_deref(), Some("t-1"));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_shutdown_drains_in_flight_scopes() {
    let fx = fixture(1, ScopeConfig::default()).await;
    let manager = fx.manager.clone();

    let task = tokio::spawn(async move {
        manager
            .with_tenant_scope(&TenantId::new("t-1"), |_scope| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, TenancyError>(())
                })
            })
            .await
    });

    while fx.manager.active_scopes() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(fx.manager.shutdown(Duration::from_secs(5)).await);
    assert!(fx.manager.is_shutting_down());
    assert!(task.await.unwrap().is_ok());

    let err = fx
        .manager
        .with_tenant_scope(&TenantId::new("t-1"), |_scope| {
            Box::pin(async move { Ok::<_, TenancyError>(()) })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TenancyError::Scope(ScopeError::ShuttingDown)));
}

#[tokio::test]
async fn test_shutdown_gives_up_after_grace() {
    let fx = fixture(1, ScopeConfig::default()).await;
    let manager = fx.manager.clone();

    let task = tokio::spawn(async move {
        manager
            .with_tenant_scope(&TenantId::new("t-1"), |_scope| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Ok::<_, TenancyError>(())
                })
            })
            .await
    });

    while fx.manager.active_scopes() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(!fx.manager.shutdown(Duration::from_millis(20)).await);
    task.abort();
}

#[tokio::test]
async fn test_health_check_reports_pool() {
    let fx = fixture(2, ScopeConfig::default()).await;
    let status = fx.manager.health_check().await.unwrap();
    assert_eq!(status.max_size, 2);
    assert!(status.size >= 1);
}

// ============================================================================
// Audit
// ============================================================================

#[tokio::test]
async fn test_audit_record_is_tenant_scoped() {
    let fx = fixture(1, ScopeConfig::default()).await;
    let recorder = AuditRecorder::new(fx.manager.clone());
    let actor = PrincipalId::new("owner-1");

    recorder
        .record(
            &TenantId::new("t-1"),
            &actor,
            "appointments:cancel",
            AuditTarget::new("appointments", "a-1"),
            json!({ "reason": "sick" }),
        )
        .await;
    assert_eq!(recorder.failures(), 0);

    let count_for = |tenant: &'static str| {
        let manager = fx.manager.clone();
        async move {
            manager
                .with_tenant_scope(&TenantId::new(tenant), |scope| {
                    Box::pin(async move {
                        let n: i64 = scope
                            .client()
                            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))?;
                        Ok::<_, TenancyError>(n)
                    })
                })
                .await
                .unwrap()
        }
    };
    assert_eq!(count_for("t-1").await, 1);
    assert_eq!(count_for("t-2").await, 0);
}

#[tokio::test]
async fn test_audit_log_is_append_only() {
    let fx = fixture(1, ScopeConfig::default()).await;
    let actor = PrincipalId::new("owner-1");

    let result = fx
        .manager
        .with_tenant_scope(&TenantId::new("t-1"), move |scope| {
            Box::pin(async move {
                AuditRecorder::record_in(
                    scope,
                    &actor,
                    "items:create",
                    AuditTarget::new("items", "1"),
                    json!({}),
                )
                .await?;
                scope.client().execute("DELETE FROM audit_log", [])?;
                Ok::<_, TenancyError>(())
            })
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_audit_failure_is_soft_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(SqliteBackend::open(dir.path().join("bare.db")).unwrap());
    let key = IsolationKey::new(&IsolationConfig::default()).unwrap();
    // No schema: the audit table does not exist.
    let manager = Arc::new(ScopedContextManager::new(
        backend.clone(),
        key,
        ScopeConfig::default(),
    ));
    let recorder = AuditRecorder::new(manager);

    recorder
        .record(
            &TenantId::new("t-1"),
            &PrincipalId::new("owner-1"),
            "items:create",
            AuditTarget::new("items", "1"),
            json!({}),
        )
        .await;

    assert_eq!(recorder.failures(), 1);
    assert_pool_is_clean(&backend).await;
}
