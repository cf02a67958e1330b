//! Pooled SQLite connections carrying a session settings table.
//!
//! SQLite has no session variables, so every connection gets two functions
//! backed by a private map:
//!
//! - `set_config(name, value, is_local)` stores or (for NULL/empty values)
//!   removes a setting. It is direct-only: views and triggers cannot call it.
//! - `current_setting(name [, missing_ok])` returns the setting or NULL.
//!
//! The map belongs to one connection, so a setting is never visible to any
//! other connection in the pool.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use r2d2::ManageConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;

type Settings = Arc<Mutex<HashMap<String, String>>>;

fn user_error(message: &str) -> rusqlite::Error {
    rusqlite::Error::UserFunctionError(message.into())
}

/// A SQLite connection with session settings.
pub struct IsolatedConnection {
    conn: Connection,
    settings: Settings,
    broken: bool,
}

impl IsolatedConnection {
    /// Returns `true` if any session setting is present.
    pub fn has_settings(&self) -> bool {
        !self.settings.lock().is_empty()
    }

    /// Marks the connection so the pool closes it instead of reusing it.
    pub(super) fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Deref for IsolatedConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for IsolatedConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

fn register_functions(conn: &Connection, settings: &Settings) -> rusqlite::Result<()> {
    let state = Arc::clone(settings);
    conn.create_scalar_function(
        "set_config",
        3,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DIRECTONLY,
        move |ctx| {
            let name: String = ctx.get(0)?;
            let value: Option<String> = ctx.get(1)?;
            let is_local: bool = ctx.get(2)?;
            if is_local {
                return Err(user_error("transaction-local settings are not supported"));
            }

            let mut settings = state.lock();
            match value.filter(|v| !v.is_empty()) {
                Some(value) => {
                    settings.insert(name, value.clone());
                    Ok(Some(value))
                }
                None => {
                    settings.remove(&name);
                    Ok(None)
                }
            }
        },
    )?;

    for n_arg in [1, 2] {
        let state = Arc::clone(settings);
        conn.create_scalar_function(
            "current_setting",
            n_arg,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_INNOCUOUS,
            move |ctx| {
                let name: String = ctx.get(0)?;
                Ok(state.lock().get(&name).cloned())
            },
        )?;
    }

    Ok(())
}

/// r2d2 manager that opens [`IsolatedConnection`]s.
///
/// A connection that still carries a setting fails the checkout test, and a
/// connection marked broken is closed when it is returned.
pub struct IsolatedSqliteManager {
    inner: SqliteConnectionManager,
    busy_timeout: Duration,
    enable_wal: bool,
}

impl std::fmt::Debug for IsolatedSqliteManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolatedSqliteManager")
            .field("busy_timeout", &self.busy_timeout)
            .field("enable_wal", &self.enable_wal)
            .finish_non_exhaustive()
    }
}

impl IsolatedSqliteManager {
    pub(super) fn new(
        inner: SqliteConnectionManager,
        busy_timeout: Duration,
        enable_wal: bool,
    ) -> Self {
        Self {
            inner,
            busy_timeout,
            enable_wal,
        }
    }
}

impl ManageConnection for IsolatedSqliteManager {
    type Connection = IsolatedConnection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<IsolatedConnection, rusqlite::Error> {
        let conn = self.inner.connect()?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        if self.enable_wal {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }

        let settings = Settings::default();
        register_functions(&conn, &settings)?;

        Ok(IsolatedConnection {
            conn,
            settings,
            broken: false,
        })
    }

    fn is_valid(&self, conn: &mut IsolatedConnection) -> Result<(), rusqlite::Error> {
        if conn.has_settings() {
            return Err(user_error("connection carries a stale session setting"));
        }
        conn.conn.execute_batch("")
    }

    fn has_broken(&self, conn: &mut IsolatedConnection) -> bool {
        conn.broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect() -> IsolatedConnection {
        IsolatedSqliteManager::new(
            SqliteConnectionManager::memory(),
            Duration::from_millis(100),
            false,
        )
        .connect()
        .unwrap()
    }

    fn current(conn: &IsolatedConnection) -> Option<String> {
        conn.query_row("SELECT current_setting('app.current_tenant', true)", [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn test_set_and_clear() {
        let conn = connect();
        assert_eq!(current(&conn), None);

        let echoed: String = conn
            .query_row("SELECT set_config('app.current_tenant', 't-1', false)", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(echoed, "t-1");
        assert_eq!(current(&conn), Some("t-1".to_string()));
        assert!(conn.has_settings());

        conn.query_row("SELECT set_config('app.current_tenant', NULL, false)", [], |_| Ok(()))
            .unwrap();
        assert_eq!(current(&conn), None);
        assert!(!conn.has_settings());
    }

    #[test]
    fn test_settings_are_per_connection() {
        let a = connect();
        let b = connect();
        a.query_row("SELECT set_config('app.current_tenant', 't-1', false)", [], |_| Ok(()))
            .unwrap();
        assert_eq!(current(&b), None);
    }

    #[test]
    fn test_local_settings_are_rejected() {
        let conn = connect();
        let result = conn.query_row(
            "SELECT set_config('app.current_tenant', 't-1', true)",
            [],
            |_| Ok(()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_set_config_cannot_run_from_triggers() {
        let conn = connect();
        conn.execute_batch(
            "CREATE TABLE t (x TEXT);
             CREATE TRIGGER t_hijack AFTER INSERT ON t
             BEGIN SELECT set_config('app.current_tenant', NEW.x, false); END;",
        )
        .unwrap();
        assert!(conn.execute("INSERT INTO t (x) VALUES ('t-2')", []).is_err());
        assert_eq!(current(&conn), None);
    }

    #[test]
    fn test_checkout_rejects_stale_settings() {
        let manager = IsolatedSqliteManager::new(
            SqliteConnectionManager::memory(),
            Duration::from_millis(100),
            false,
        );
        let mut conn = manager.connect().unwrap();
        assert!(manager.is_valid(&mut conn).is_ok());

        conn.query_row("SELECT set_config('app.current_tenant', 't-1', false)", [], |_| Ok(()))
            .unwrap();
        assert!(manager.is_valid(&mut conn).is_err());

        assert!(!manager.has_broken(&mut conn));
        conn.mark_broken();
        assert!(manager.has_broken(&mut conn));
    }

    #[test]
    fn test_settings_survive_panic_while_locked() {
        let conn = connect();
        let settings = Arc::clone(&conn.settings);
        let result = std::thread::spawn(move || {
            let _guard = settings.lock();
            panic!("holder panicked");
        })
        .join();
        assert!(result.is_err());

        conn.query_row("SELECT set_config('app.current_tenant', 't-1', false)", [], |_| Ok(()))
            .unwrap();
        assert_eq!(current(&conn), Some("t-1".to_string()));
        assert!(conn.has_settings());
    }
}
