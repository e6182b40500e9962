//! Schema discovery by trial queries.
//!
//! The anon key has no access to the system catalogs, so existence and shape
//! are inferred from how a bounded `select` fails or succeeds. Probes never
//! return an error: whatever cannot be classified is reported verbatim.

use serde_json::Value;
use shared::TableDef;

use crate::client::{Filters, Query, RestClient};
use crate::error::DbError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableProbe {
    /// Rows came back; columns are the keys of the first one.
    Exists { columns: Vec<String> },
    /// The table answered but holds no rows, so its columns are unknown.
    ExistsEmpty,
    Absent,
    Unknown { message: String },
}

impl TableProbe {
    pub fn exists(&self) -> bool {
        matches!(self, TableProbe::Exists { .. } | TableProbe::ExistsEmpty)
    }

    pub fn columns(&self) -> Option<&[String]> {
        match self {
            TableProbe::Exists { columns } => Some(columns),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TableProbe::Exists { .. } => "exists",
            TableProbe::ExistsEmpty => "exists (empty)",
            TableProbe::Absent => "absent",
            TableProbe::Unknown { .. } => "unknown",
        }
    }
}

/// Outcome of probing a column or a foreign-key relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Present,
    Missing,
    TableAbsent,
    Unknown { message: String },
}

impl Presence {
    pub fn is_present(&self) -> bool {
        matches!(self, Presence::Present)
    }
}

pub async fn probe_table(client: &RestClient, table: &str) -> TableProbe {
    match client.select(table, &Query::new().limit(1)).await {
        Ok(rows) => match rows.first() {
            Some(row) => TableProbe::Exists {
                columns: row.keys().cloned().collect(),
            },
            None => TableProbe::ExistsEmpty,
        },
        Err(DbError::MissingRelation { .. }) => TableProbe::Absent,
        Err(e) => TableProbe::Unknown {
            message: e.to_string(),
        },
    }
}

/// Like [`probe_table`], but an empty table gets a disposable `{}` insert to
/// learn the accepted columns. The inserted row is deleted again by `id`.
pub async fn probe_table_with_discovery(client: &RestClient, table: &str) -> TableProbe {
    let probe = probe_table(client, table).await;
    if probe != TableProbe::ExistsEmpty {
        return probe;
    }

    let inserted = match client.insert(table, &Value::Object(Default::default())).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::debug!(table, error = %e, "disposable insert rejected");
            return TableProbe::ExistsEmpty;
        }
    };
    let Some(row) = inserted.into_iter().next() else {
        return TableProbe::ExistsEmpty;
    };

    let columns: Vec<String> = row.keys().cloned().collect();
    match row.get("id").and_then(id_text) {
        Some(id) => {
            if let Err(e) = client.delete(table, &Filters::new().eq("id", &id)).await {
                tracing::warn!(table, id = %id, error = %e, "could not remove discovery row");
            }
        }
        None => tracing::warn!(table, "discovery row has no id; left in place"),
    }

    TableProbe::Exists { columns }
}

pub async fn probe_column(client: &RestClient, table: &str, column: &str) -> Presence {
    presence_of(client, table, Query::new().select(column).limit(1)).await
}

/// Probe a foreign key by embedding `target` through the named constraint.
pub async fn probe_relationship(
    client: &RestClient,
    table: &str,
    target: &str,
    constraint: &str,
) -> Presence {
    let select = format!("id,{}!{}(id)", target, constraint);
    presence_of(client, table, Query::new().select(select).limit(1)).await
}

async fn presence_of(client: &RestClient, table: &str, query: Query) -> Presence {
    match client.select(table, &query).await {
        Ok(_) => Presence::Present,
        Err(DbError::MissingColumn { .. }) | Err(DbError::MissingRelationship { .. }) => {
            Presence::Missing
        }
        Err(DbError::MissingRelation { .. }) => Presence::TableAbsent,
        Err(e) => Presence::Unknown {
            message: e.to_string(),
        },
    }
}

pub(crate) fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ============================================================================
// Catalog check
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: String,
    pub probe: TableProbe,
    pub row_count: Option<u64>,
    pub missing_columns: Vec<String>,
    pub unexpected_columns: Vec<String>,
    /// Expected columns whose presence could not be decided.
    pub unverified_columns: Vec<String>,
}

impl TableReport {
    pub fn is_healthy(&self) -> bool {
        self.probe.exists() && self.missing_columns.is_empty() && self.unverified_columns.is_empty()
    }
}

/// Probe every table of `catalog` and compare against its expected columns.
pub async fn check_catalog(client: &RestClient, catalog: &[TableDef]) -> Vec<TableReport> {
    let mut reports = Vec::with_capacity(catalog.len());

    for def in catalog {
        let probe = probe_table(client, def.name).await;
        let mut report = TableReport {
            table: def.name.to_string(),
            probe: probe.clone(),
            row_count: None,
            missing_columns: Vec::new(),
            unexpected_columns: Vec::new(),
            unverified_columns: Vec::new(),
        };

        match &probe {
            TableProbe::Exists { columns } => {
                report.missing_columns = def
                    .columns
                    .iter()
                    .filter(|c| !columns.iter().any(|found| found == c.name))
                    .map(|c| c.name.to_string())
                    .collect();
                report.unexpected_columns = columns
                    .iter()
                    .filter(|found| def.column(found).is_none())
                    .cloned()
                    .collect();
            }
            TableProbe::ExistsEmpty => {
                for col in def.columns {
                    match probe_column(client, def.name, col.name).await {
                        Presence::Present => {}
                        Presence::Missing => report.missing_columns.push(col.name.to_string()),
                        _ => report.unverified_columns.push(col.name.to_string()),
                    }
                }
            }
            TableProbe::Absent | TableProbe::Unknown { .. } => {
                reports.push(report);
                continue;
            }
        }

        report.row_count = match client.count(def.name).await {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(table = def.name, error = %e, "row count failed");
                None
            }
        };
        reports.push(report);
    }

    reports
}
