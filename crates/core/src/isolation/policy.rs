//! DDL for tenant-scoped tables and their row-level policies.
//!
//! [`TenantTableBuilder`] emits a table whose rows are tagged with the tenant
//! column, plus the policy that filters them on the isolation variable.
//!
//! # PostgreSQL
//!
//! Native row-level security:
//!
//! ```sql
//! ALTER TABLE items ENABLE ROW LEVEL SECURITY;
//! ALTER TABLE items FORCE ROW LEVEL SECURITY;
//! CREATE POLICY tenant_isolation ON items
//!     USING (tenant_id = current_setting('app.current_tenant', true))
//!     WITH CHECK (tenant_id = current_setting('app.current_tenant', true));
//! ```
//!
//! # SQLite
//!
//! SQLite has no policy evaluator, so the policy is emulated: rows live in
//! `items__rows`, the public name `items` is a view filtered on
//! `current_setting('app.current_tenant')`, and `INSTEAD OF` triggers stamp
//! and check the tenant column on writes. Callers use `items` exactly as they
//! would use the Postgres table.

use super::key::{IsolationKey, is_safe_identifier};
use crate::error::ValidationError;

#[derive(Debug)]
struct ColumnDef {
    name: String,
    data_type: String,
    nullable: bool,
}

#[derive(Debug)]
struct IndexDef {
    name: String,
    columns: Vec<String>,
    unique: bool,
}

/// Builder for creating table DDL with tenant isolation.
///
/// # Example
///
/// ```
/// use tenantscope_core::isolation::{IsolationConfig, IsolationKey, TenantTableBuilder};
///
/// let key = IsolationKey::new(&IsolationConfig::default()).unwrap();
/// let ddl = TenantTableBuilder::new("items", &key)
///     .column("name", "TEXT", false)
///     .index("idx_items_name", vec!["name"], false)
///     .to_postgres_ddl()
///     .unwrap();
/// assert!(ddl.contains("CREATE POLICY tenant_isolation ON items"));
/// ```
#[derive(Debug)]
pub struct TenantTableBuilder {
    table_name: String,
    tenant_column: String,
    variable: String,
    primary_key: String,
    columns: Vec<ColumnDef>,
    indexes: Vec<IndexDef>,
    append_only: bool,
}

impl TenantTableBuilder {
    /// Creates a new table builder with an `id TEXT` primary key.
    pub fn new(table_name: impl Into<String>, key: &IsolationKey) -> Self {
        Self {
            table_name: table_name.into(),
            tenant_column: key.tenant_column().to_string(),
            variable: key.variable().to_string(),
            primary_key: "id".to_string(),
            columns: Vec::new(),
            indexes: Vec::new(),
            append_only: false,
        }
    }

    /// Overrides the primary key column name.
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = name.into();
        self
    }

    /// Adds a column to the table.
    pub fn column(
        mut self,
        name: impl Into<String>,
        data_type: impl Into<String>,
        nullable: bool,
    ) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
        });
        self
    }

    /// Adds an index (tenant_id will be prepended automatically).
    pub fn index(mut self, name: impl Into<String>, columns: Vec<&str>, unique: bool) -> Self {
        self.indexes.push(IndexDef {
            name: name.into(),
            columns: columns.into_iter().map(String::from).collect(),
            unique,
        });
        self
    }

    /// Permits only inserts and reads. Updates and deletes are rejected.
    pub fn append_only(mut self) -> Self {
        self.append_only = true;
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let idents = std::iter::once(&self.table_name)
            .chain(std::iter::once(&self.tenant_column))
            .chain(std::iter::once(&self.primary_key))
            .chain(self.columns.iter().map(|c| &c.name))
            .chain(self.indexes.iter().map(|i| &i.name))
            .chain(self.indexes.iter().flat_map(|i| i.columns.iter()));

        for ident in idents {
            if !is_safe_identifier(ident) {
                return Err(ValidationError::InvalidIdentifier {
                    identifier: ident.clone(),
                });
            }
        }

        let type_ok = |t: &str| {
            !t.is_empty()
                && t
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '(' | ')' | ','))
        };
        if let Some(col) = self.columns.iter().find(|c| !type_ok(&c.data_type)) {
            return Err(ValidationError::InvalidIdentifier {
                identifier: col.data_type.clone(),
            });
        }

        Ok(())
    }

    fn column_lines(&self, tenant_default: &str) -> String {
        let mut ddl = format!(
            "    {} TEXT NOT NULL{},\n    {} TEXT NOT NULL,\n",
            self.tenant_column, tenant_default, self.primary_key
        );
        for col in &self.columns {
            let null_str = if col.nullable { "" } else { " NOT NULL" };
            ddl.push_str(&format!("    {} {}{},\n", col.name, col.data_type, null_str));
        }
        ddl.push_str(&format!(
            "    PRIMARY KEY ({}, {})\n",
            self.tenant_column, self.primary_key
        ));
        ddl
    }

    fn index_lines(&self, physical_table: &str) -> String {
        let mut ddl = String::new();
        for idx in &self.indexes {
            let unique_str = if idx.unique { "UNIQUE " } else { "" };
            let columns: Vec<_> = std::iter::once(self.tenant_column.as_str())
                .chain(idx.columns.iter().map(|s| s.as_str()))
                .collect();
            ddl.push_str(&format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});\n",
                unique_str,
                idx.name,
                physical_table,
                columns.join(", ")
            ));
        }
        ddl
    }

    /// Generates PostgreSQL DDL with row-level security.
    ///
    /// Policies are forced so the table owner is filtered too. Superusers
    /// and roles with `BYPASSRLS` are never filtered by PostgreSQL.
    pub fn to_postgres_ddl(&self) -> Result<String, ValidationError> {
        self.validate()?;
        let t = &self.table_name;
        let tc = &self.tenant_column;
        let predicate = format!("{} = current_setting('{}', true)", tc, self.variable);
        let default = format!(" DEFAULT current_setting('{}', true)", self.variable);

        let mut ddl = format!("CREATE TABLE IF NOT EXISTS {} (\n", t);
        ddl.push_str(&self.column_lines(&default));
        ddl.push_str(");\n\n");
        ddl.push_str(&self.index_lines(t));

        ddl.push_str(&format!("\nALTER TABLE {} ENABLE ROW LEVEL SECURITY;\n", t));
        ddl.push_str(&format!("ALTER TABLE {} FORCE ROW LEVEL SECURITY;\n", t));

        if self.append_only {
            ddl.push_str(&format!(
                "DROP POLICY IF EXISTS tenant_isolation_select ON {t};\n\
                 CREATE POLICY tenant_isolation_select ON {t} FOR SELECT USING ({predicate});\n\
                 DROP POLICY IF EXISTS tenant_isolation_insert ON {t};\n\
                 CREATE POLICY tenant_isolation_insert ON {t} FOR INSERT WITH CHECK ({predicate});\n"
            ));
        } else {
            ddl.push_str(&format!(
                "DROP POLICY IF EXISTS tenant_isolation ON {t};\n\
                 CREATE POLICY tenant_isolation ON {t} USING ({predicate}) WITH CHECK ({predicate});\n"
            ));
        }

        Ok(ddl)
    }

    /// Generates SQLite DDL that emulates the row-level policy.
    ///
    /// Requires the `set_config`/`current_setting` functions registered on
    /// every connection by the SQLite backend.
    pub fn to_sqlite_ddl(&self) -> Result<String, ValidationError> {
        self.validate()?;
        let t = &self.table_name;
        let rows = format!("{}__rows", t);
        let tc = &self.tenant_column;
        let pk = &self.primary_key;
        let current = format!("current_setting('{}')", self.variable);

        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        let all_columns: Vec<&str> = [tc.as_str(), pk.as_str()]
            .into_iter()
            .chain(names.iter().copied())
            .collect();
        let new_values: Vec<String> = std::iter::once(current.clone())
            .chain(std::iter::once(format!("NEW.{}", pk)))
            .chain(names.iter().map(|n| format!("NEW.{}", n)))
            .collect();

        let mut ddl = format!("CREATE TABLE IF NOT EXISTS {} (\n", rows);
        ddl.push_str(&self.column_lines(""));
        ddl.push_str(");\n\n");
        ddl.push_str(&self.index_lines(&rows));

        ddl.push_str(&format!(
            "\nCREATE VIEW IF NOT EXISTS {t} AS\n    SELECT {cols} FROM {rows} WHERE {tc} = {current};\n",
            cols = all_columns.join(", ")
        ));

        ddl.push_str(&format!(
            "\nCREATE TRIGGER IF NOT EXISTS {t}__insert INSTEAD OF INSERT ON {t}\nBEGIN\n    \
             SELECT RAISE(ABORT, 'tenant isolation violation')\n    \
             WHERE {current} IS NULL OR (NEW.{tc} IS NOT NULL AND NEW.{tc} IS NOT {current});\n    \
             INSERT INTO {rows} ({cols}) VALUES ({vals});\nEND;\n",
            cols = all_columns.join(", "),
            vals = new_values.join(", ")
        ));

        if self.append_only {
            for (op, event) in [("update", "UPDATE"), ("delete", "DELETE")] {
                ddl.push_str(&format!(
                    "\nCREATE TRIGGER IF NOT EXISTS {t}__{op} INSTEAD OF {event} ON {t}\nBEGIN\n    \
                     SELECT RAISE(ABORT, '{t} is append-only');\nEND;\n"
                ));
            }
            return Ok(ddl);
        }

        ddl.push_str(&format!(
            "\nCREATE TRIGGER IF NOT EXISTS {t}__update INSTEAD OF UPDATE ON {t}\nBEGIN\n    \
             SELECT RAISE(ABORT, 'tenant isolation violation')\n    \
             WHERE NEW.{tc} IS NOT OLD.{tc} OR NEW.{pk} IS NOT OLD.{pk};\n"
        ));
        if !names.is_empty() {
            let assignments: Vec<String> = names.iter().map(|n| format!("{n} = NEW.{n}")).collect();
            ddl.push_str(&format!(
                "    UPDATE {rows} SET {} WHERE {tc} = {current} AND {pk} = OLD.{pk};\n",
                assignments.join(", ")
            ));
        }
        ddl.push_str("END;\n");

        ddl.push_str(&format!(
            "\nCREATE TRIGGER IF NOT EXISTS {t}__delete INSTEAD OF DELETE ON {t}\nBEGIN\n    \
             DELETE FROM {rows} WHERE {tc} = {current} AND {pk} = OLD.{pk};\nEND;\n"
        ));

        Ok(ddl)
    }
}
