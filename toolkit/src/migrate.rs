//! Ordered ledger of schema fixes.
//!
//! Each migration is an idempotent check, a best-effort apply and a verify
//! (see [`crate::ddl::apply`]). Migrations run in order; one that is left for
//! an operator blocks the migrations that depend on it.

use std::collections::HashMap;

use shared::catalog::{
    WORK_ORDERS, WORK_ORDER_ATTACHMENTS, WORK_ORDER_COMMENTS, WORK_ORDER_HISTORY,
    WORK_ORDER_TASKS,
};
use shared::TableDef;
use thiserror::Error;

use crate::client::RestClient;
use crate::ddl::{self, ColumnSpec, DdlOutcome, SchemaChange};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub id: &'static str,
    pub description: &'static str,
    pub change: SchemaChange,
    pub depends_on: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStatus {
    AlreadyApplied,
    Applied,
    ManualSqlRequired { sql: String, reason: String },
    Blocked { sql: String, waiting_on: String },
}

impl MigrationStatus {
    pub fn pending_sql(&self) -> Option<&str> {
        match self {
            MigrationStatus::ManualSqlRequired { sql, .. } | MigrationStatus::Blocked { sql, .. } => {
                Some(sql)
            }
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MigrationStatus::AlreadyApplied => "already applied",
            MigrationStatus::Applied => "applied",
            MigrationStatus::ManualSqlRequired { .. } => "manual SQL required",
            MigrationStatus::Blocked { .. } => "blocked",
        }
    }
}

impl From<DdlOutcome> for MigrationStatus {
    fn from(outcome: DdlOutcome) -> Self {
        match outcome {
            DdlOutcome::AlreadyPresent => MigrationStatus::AlreadyApplied,
            DdlOutcome::Applied => MigrationStatus::Applied,
            DdlOutcome::ManualSqlRequired { sql, reason } => {
                MigrationStatus::ManualSqlRequired { sql, reason }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub id: &'static str,
    pub description: &'static str,
    pub status: MigrationStatus,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("duplicate migration id '{0}'")]
    DuplicateId(String),
    #[error("migration '{id}' depends on '{dependency}', which is not an earlier migration")]
    UnknownDependency { id: String, dependency: String },
}

#[derive(Debug, Clone)]
pub struct Ledger {
    migrations: Vec<Migration>,
}

impl Ledger {
    pub fn new(migrations: Vec<Migration>) -> Result<Self, LedgerError> {
        let ledger = Self { migrations };
        ledger.validate()?;
        Ok(ledger)
    }

    /// Fixes for the invariants the application relies on.
    pub fn builtin() -> Self {
        Self {
            migrations: vec![
                Migration {
                    id: "001_work_orders_updated_at",
                    description: "work_orders.updated_at for the update trigger",
                    change: column(&WORK_ORDERS, "updated_at"),
                    depends_on: &[],
                },
                Migration {
                    id: "002_work_order_tasks_updated_at",
                    description: "work_order_tasks.updated_at for the update trigger",
                    change: column(&WORK_ORDER_TASKS, "updated_at"),
                    depends_on: &[],
                },
                Migration {
                    id: "003_work_orders_actual_hours",
                    description: "work_orders.actual_hours",
                    change: column(&WORK_ORDERS, "actual_hours"),
                    depends_on: &[],
                },
                Migration {
                    id: "004_work_order_tasks_is_critical",
                    description: "work_order_tasks.is_critical",
                    change: column(&WORK_ORDER_TASKS, "is_critical"),
                    depends_on: &[],
                },
                Migration {
                    id: "005_work_orders_assigned_to",
                    description: "work_orders.assigned_to",
                    change: column(&WORK_ORDERS, "assigned_to"),
                    depends_on: &[],
                },
                Migration {
                    id: "006_work_order_history",
                    description: "audit table for work order changes",
                    change: SchemaChange::CreateTable {
                        table: WORK_ORDER_HISTORY,
                    },
                    depends_on: &[],
                },
                Migration {
                    id: "007_work_order_comments",
                    description: "discussion table for work orders",
                    change: SchemaChange::CreateTable {
                        table: WORK_ORDER_COMMENTS,
                    },
                    depends_on: &[],
                },
                Migration {
                    id: "008_work_order_attachments",
                    description: "attachment metadata table for work orders",
                    change: SchemaChange::CreateTable {
                        table: WORK_ORDER_ATTACHMENTS,
                    },
                    depends_on: &[],
                },
                Migration {
                    id: "009_work_orders_requested_by_fkey",
                    description: "requested_by must reference user_profiles.id",
                    change: SchemaChange::foreign_key("work_orders", "requested_by", "user_profiles", "id"),
                    depends_on: &[],
                },
                Migration {
                    id: "010_work_orders_assigned_to_fkey",
                    description: "assigned_to must reference user_profiles.id",
                    change: SchemaChange::foreign_key("work_orders", "assigned_to", "user_profiles", "id"),
                    depends_on: &["005_work_orders_assigned_to"],
                },
            ],
        }
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        let mut seen: Vec<&str> = Vec::new();
        for m in &self.migrations {
            if seen.contains(&m.id) {
                return Err(LedgerError::DuplicateId(m.id.to_string()));
            }
            for dep in m.depends_on {
                if !seen.contains(dep) {
                    return Err(LedgerError::UnknownDependency {
                        id: m.id.to_string(),
                        dependency: dep.to_string(),
                    });
                }
            }
            seen.push(m.id);
        }
        Ok(())
    }

    /// Run every migration in order.
    pub async fn run(
        &self,
        client: &RestClient,
        exec_fn: &str,
        dry_run: bool,
    ) -> Vec<MigrationReport> {
        let mut statuses: HashMap<&'static str, bool> = HashMap::new();
        let mut reports = Vec::with_capacity(self.migrations.len());

        for m in &self.migrations {
            let unmet = m
                .depends_on
                .iter()
                .find(|dep| !statuses.get(**dep).copied().unwrap_or(false));

            let status = match unmet {
                Some(dep) => MigrationStatus::Blocked {
                    sql: m.change.sql(),
                    waiting_on: dep.to_string(),
                },
                None => ddl::apply(client, &m.change, exec_fn, dry_run).await.into(),
            };

            tracing::info!(migration = m.id, status = status.label(), "migration checked");
            statuses.insert(
                m.id,
                matches!(status, MigrationStatus::AlreadyApplied | MigrationStatus::Applied),
            );
            reports.push(MigrationReport {
                id: m.id,
                description: m.description,
                status,
            });
        }

        reports
    }
}

fn column(table: &TableDef, name: &str) -> SchemaChange {
    SchemaChange::catalog_column(table, name)
        .unwrap_or_else(|| SchemaChange::add_column(table.name, ColumnSpec::new(name, "text")))
}

/// SQL of every migration still needing an operator, in ledger order.
pub fn manual_script(reports: &[MigrationReport]) -> Option<String> {
    let parts: Vec<String> = reports
        .iter()
        .filter_map(|r| r.status.pending_sql().map(|sql| format!("-- {}\n{}", r.id, sql)))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ledger_is_valid_and_ordered() {
        let ledger = Ledger::builtin();
        ledger.validate().unwrap();
        let ids: Vec<&str> = ledger.migrations().iter().map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn builtin_columns_come_from_catalog() {
        for m in Ledger::builtin().migrations() {
            if let SchemaChange::AddColumn { table, column } = &m.change {
                let def = shared::catalog::table(table).unwrap();
                assert!(def.column(&column.name).is_some(), "{} not in catalog", m.id);
            }
        }
    }

    #[test]
    fn rejects_forward_and_duplicate_dependencies() {
        let change = SchemaChange::add_column("assets", ColumnSpec::new("notes", "text"));
        let m = |id: &'static str, deps: &'static [&'static str]| Migration {
            id,
            description: "test",
            change: change.clone(),
            depends_on: deps,
        };

        let err = Ledger::new(vec![m("a", &["b"]), m("b", &[])]).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownDependency { .. }));

        let err = Ledger::new(vec![m("a", &[]), m("a", &[])]).unwrap_err();
        assert_eq!(err, LedgerError::DuplicateId("a".to_string()));
    }

    #[test]
    fn manual_script_collects_pending_sql_in_order() {
        let reports = vec![
            MigrationReport {
                id: "001",
                description: "",
                status: MigrationStatus::AlreadyApplied,
            },
            MigrationReport {
                id: "002",
                description: "",
                status: MigrationStatus::ManualSqlRequired {
                    sql: "SELECT 2;".to_string(),
                    reason: "dry run".to_string(),
                },
            },
            MigrationReport {
                id: "003",
                description: "",
                status: MigrationStatus::Blocked {
                    sql: "SELECT 3;".to_string(),
                    waiting_on: "002".to_string(),
                },
            },
        ];
        assert_eq!(
            manual_script(&reports).unwrap(),
            "-- 002\nSELECT 2;\n\n-- 003\nSELECT 3;"
        );
        assert_eq!(manual_script(&reports[..1]), None);
    }
}
