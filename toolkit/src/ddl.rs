//! Best-effort schema changes without DDL privileges.
//!
//! A change is first attempted through the arbitrary-SQL RPC. When that is
//! unavailable, or the change cannot be seen afterwards, the exact SQL is
//! handed back for an operator to run. Every call ends in exactly one of:
//! confirmed present, or SQL surfaced.

use serde_json::json;
use shared::catalog::column_sql;
use shared::{ColumnDef, TableDef};

use crate::client::RestClient;
use crate::probe::{self, Presence, TableProbe};

const RELOAD_SCHEMA: &str = "NOTIFY pgrst, 'reload schema';";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub references: Option<(String, String)>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            default: None,
            references: None,
        }
    }

    pub fn with_default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    fn sql_fragment(&self) -> String {
        column_sql(
            &self.name,
            &self.sql_type,
            self.nullable,
            self.default.as_deref(),
            self.references
                .as_ref()
                .map(|(table, column)| (table.as_str(), column.as_str())),
        )
    }
}

impl From<&ColumnDef> for ColumnSpec {
    fn from(def: &ColumnDef) -> Self {
        Self {
            name: def.name.to_string(),
            sql_type: def.sql_type.to_string(),
            nullable: def.nullable,
            default: def.default.map(str::to_string),
            references: def.references.map(|(t, c)| (t.to_string(), c.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    AddColumn {
        table: String,
        column: ColumnSpec,
    },
    CreateTable {
        table: TableDef,
    },
    AddForeignKey {
        table: String,
        column: String,
        target: String,
        target_column: String,
        constraint: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Present,
    Missing,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlOutcome {
    AlreadyPresent,
    /// Applied through the RPC and confirmed by a re-check.
    Applied,
    /// Not confirmed; the operator must run `sql`.
    ManualSqlRequired { sql: String, reason: String },
}

impl DdlOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, DdlOutcome::AlreadyPresent | DdlOutcome::Applied)
    }

    pub fn manual_sql(&self) -> Option<&str> {
        match self {
            DdlOutcome::ManualSqlRequired { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Console lines; the manual case always carries the SQL verbatim.
    pub fn render(&self, change: &SchemaChange) -> Vec<String> {
        match self {
            DdlOutcome::AlreadyPresent => vec![format!("✓ {} (already present)", change.describe())],
            DdlOutcome::Applied => vec![format!("✓ {} (applied and verified)", change.describe())],
            DdlOutcome::ManualSqlRequired { sql, reason } => {
                let mut lines = vec![
                    format!("⚠ {} needs manual action", change.describe()),
                    "  Run this SQL in the database SQL editor:".to_string(),
                ];
                lines.extend(sql.lines().map(|l| format!("    {}", l)));
                lines.insert(1, format!("  reason: {}", reason));
                lines
            }
        }
    }
}

impl SchemaChange {
    pub fn add_column(table: impl Into<String>, column: ColumnSpec) -> Self {
        SchemaChange::AddColumn {
            table: table.into(),
            column,
        }
    }

    /// Add a catalog column, e.g. `SchemaChange::catalog_column(&WORK_ORDERS, "updated_at")`.
    pub fn catalog_column(table: &TableDef, column: &str) -> Option<Self> {
        let def = table.column(column)?;
        Some(SchemaChange::AddColumn {
            table: table.name.to_string(),
            column: ColumnSpec::from(def),
        })
    }

    pub fn foreign_key(table: &str, column: &str, target: &str, target_column: &str) -> Self {
        SchemaChange::AddForeignKey {
            table: table.to_string(),
            column: column.to_string(),
            target: target.to_string(),
            target_column: target_column.to_string(),
            constraint: format!("{}_{}_fkey", table, column),
        }
    }

    pub fn table(&self) -> &str {
        match self {
            SchemaChange::AddColumn { table, .. } => table,
            SchemaChange::CreateTable { table } => table.name,
            SchemaChange::AddForeignKey { table, .. } => table,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SchemaChange::AddColumn { table, column } => {
                format!("add column {}.{}", table, column.name)
            }
            SchemaChange::CreateTable { table } => format!("create table {}", table.name),
            SchemaChange::AddForeignKey {
                table,
                column,
                target,
                target_column,
                ..
            } => format!(
                "foreign key {}.{} -> {}.{}",
                table, column, target, target_column
            ),
        }
    }

    /// Idempotent SQL for this change, ending with a schema-cache reload.
    pub fn sql(&self) -> String {
        let body = match self {
            SchemaChange::AddColumn { table, column } => {
                let mut sql = format!(
                    "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {};",
                    table,
                    column.sql_fragment()
                );
                if column.name == "updated_at" {
                    sql.push('\n');
                    sql.push_str(&updated_at_trigger_sql(table));
                }
                sql
            }
            SchemaChange::CreateTable { table } => {
                let mut sql = table.create_sql();
                if table.column("updated_at").is_some() {
                    sql.push('\n');
                    sql.push_str(&updated_at_trigger_sql(table.name));
                }
                sql
            }
            SchemaChange::AddForeignKey {
                table,
                column,
                target,
                target_column,
                constraint,
            } => format!(
                "DO $$\nBEGIN\n  IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = '{constraint}') THEN\n    ALTER TABLE {table} ADD CONSTRAINT {constraint} FOREIGN KEY ({column}) REFERENCES {target}({target_column});\n  END IF;\nEND $$;"
            ),
        };
        format!("{}\n{}", body, RELOAD_SCHEMA)
    }

    pub async fn check(&self, client: &RestClient) -> CheckOutcome {
        match self {
            SchemaChange::AddColumn { table, column } => {
                presence_outcome(probe::probe_column(client, table, &column.name).await)
            }
            SchemaChange::CreateTable { table } => match probe::probe_table(client, table.name).await {
                TableProbe::Exists { .. } | TableProbe::ExistsEmpty => CheckOutcome::Present,
                TableProbe::Absent => CheckOutcome::Missing,
                TableProbe::Unknown { message } => CheckOutcome::Unknown(message),
            },
            SchemaChange::AddForeignKey {
                table,
                target,
                constraint,
                ..
            } => presence_outcome(probe::probe_relationship(client, table, target, constraint).await),
        }
    }
}

fn presence_outcome(presence: Presence) -> CheckOutcome {
    match presence {
        Presence::Present => CheckOutcome::Present,
        Presence::Missing | Presence::TableAbsent => CheckOutcome::Missing,
        Presence::Unknown { message } => CheckOutcome::Unknown(message),
    }
}

fn updated_at_trigger_sql(table: &str) -> String {
    format!(
        "CREATE OR REPLACE FUNCTION set_updated_at() RETURNS trigger AS $fn$\nBEGIN\n  NEW.updated_at = now();\n  RETURN NEW;\nEND;\n$fn$ LANGUAGE plpgsql;\nDROP TRIGGER IF EXISTS {table}_set_updated_at ON {table};\nCREATE TRIGGER {table}_set_updated_at BEFORE UPDATE ON {table}\n  FOR EACH ROW EXECUTE FUNCTION set_updated_at();"
    )
}

/// Check, attempt through `exec_fn`, verify. With `dry_run` nothing is sent
/// beyond the checks.
pub async fn apply(
    client: &RestClient,
    change: &SchemaChange,
    exec_fn: &str,
    dry_run: bool,
) -> DdlOutcome {
    let before = change.check(client).await;
    if before == CheckOutcome::Present {
        return DdlOutcome::AlreadyPresent;
    }

    let sql = change.sql();
    let state_note = match &before {
        CheckOutcome::Unknown(message) => format!("; current state unknown: {}", message),
        _ => String::new(),
    };

    if dry_run {
        return DdlOutcome::ManualSqlRequired {
            sql,
            reason: format!("dry run{}", state_note),
        };
    }

    if let Err(e) = client.rpc(exec_fn, &json!({ "sql": sql })).await {
        tracing::warn!(change = %change.describe(), error = %e, "SQL execution RPC failed; falling back to manual SQL");
        let reason = if e.is_capability_unavailable() {
            format!("SQL execution function '{}' is not available ({})", exec_fn, e)
        } else {
            format!("SQL execution failed: {}", e)
        };
        return DdlOutcome::ManualSqlRequired {
            sql,
            reason: format!("{}{}", reason, state_note),
        };
    }

    match change.check(client).await {
        CheckOutcome::Present => {
            tracing::info!(change = %change.describe(), "schema change applied");
            DdlOutcome::Applied
        }
        CheckOutcome::Missing => DdlOutcome::ManualSqlRequired {
            sql,
            reason: "RPC accepted the SQL but the change is not visible after apply".to_string(),
        },
        CheckOutcome::Unknown(message) => DdlOutcome::ManualSqlRequired {
            sql,
            reason: format!("could not verify after apply: {}", message),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::catalog::{WORK_ORDERS, WORK_ORDER_COMMENTS};

    #[test]
    fn add_column_sql_is_idempotent_and_reloads_cache() {
        let change = SchemaChange::catalog_column(&WORK_ORDERS, "actual_hours").unwrap();
        let sql = change.sql();
        assert!(sql.starts_with("ALTER TABLE work_orders ADD COLUMN IF NOT EXISTS actual_hours numeric;"));
        assert!(sql.ends_with(RELOAD_SCHEMA));
        assert!(!sql.contains("TRIGGER"));
    }

    #[test]
    fn updated_at_column_brings_its_trigger() {
        let change = SchemaChange::catalog_column(&WORK_ORDERS, "updated_at").unwrap();
        let sql = change.sql();
        assert!(sql.contains("updated_at timestamptz NOT NULL DEFAULT now()"));
        assert!(sql.contains("CREATE TRIGGER work_orders_set_updated_at BEFORE UPDATE ON work_orders"));
    }

    #[test]
    fn foreign_key_sql_guards_on_constraint_name() {
        let change = SchemaChange::foreign_key("work_orders", "requested_by", "user_profiles", "id");
        let sql = change.sql();
        assert!(sql.contains("conname = 'work_orders_requested_by_fkey'"));
        assert!(sql.contains("FOREIGN KEY (requested_by) REFERENCES user_profiles(id)"));
        assert_eq!(
            change.describe(),
            "foreign key work_orders.requested_by -> user_profiles.id"
        );
    }

    #[test]
    fn create_table_sql_comes_from_catalog() {
        let change = SchemaChange::CreateTable {
            table: WORK_ORDER_COMMENTS,
        };
        assert!(change
            .sql()
            .starts_with("CREATE TABLE IF NOT EXISTS work_order_comments ("));
        assert_eq!(change.table(), "work_order_comments");
    }

    #[test]
    fn manual_render_always_contains_sql() {
        let change = SchemaChange::add_column("assets", ColumnSpec::new("notes", "text"));
        let outcome = DdlOutcome::ManualSqlRequired {
            sql: change.sql(),
            reason: "dry run".to_string(),
        };
        let lines = outcome.render(&change);
        assert_eq!(lines[0], "⚠ add column assets.notes needs manual action");
        assert_eq!(lines[1], "  reason: dry run");
        let text = lines.join("\n");
        assert!(text.contains("ALTER TABLE assets ADD COLUMN IF NOT EXISTS notes text;"));
        assert!(text.contains("reason: dry run"));
        assert!(!outcome.is_confirmed());
        assert!(outcome.manual_sql().is_some());
    }

    #[test]
    fn column_spec_renders_like_its_catalog_column() {
        for table in shared::CATALOG {
            for def in table.columns {
                assert_eq!(ColumnSpec::from(def).sql_fragment(), def.sql_fragment());
            }
        }
        let spec = ColumnSpec::new("is_critical", "boolean").with_default("false");
        assert_eq!(spec.sql_fragment(), "is_critical boolean DEFAULT false");
    }
}
