//! Table dumps: JSON backups and per-table CSV files.

pub mod backup;
pub mod csv_export;

use std::collections::BTreeSet;

use crate::client::{Query, RestClient, Row};
use crate::error::{DbError, DbResult};

pub use self::backup::{backup, read_backup, write_backup, BackupFile, BackupInfo, TableBackup};
pub use self::csv_export::{export_csv, CsvExportReport};

/// A table left out of an export, and why.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SkippedTable {
    pub table: String,
    pub reason: String,
}

/// Read every row of `table`, `page_size` rows per request.
pub async fn fetch_all(client: &RestClient, table: &str, page_size: usize) -> DbResult<Vec<Row>> {
    fetch_all_with(client, table, Query::new(), page_size).await
}

/// Page through `query` until every matching row is read.
///
/// The server may cap a page below `page_size` (`max-rows`), so a short page
/// does not end the loop. Paging stops once the exact count reported with the
/// first page is reached, or at the first empty page when no count came back.
pub async fn fetch_all_with(
    client: &RestClient,
    table: &str,
    query: Query,
    page_size: usize,
) -> DbResult<Vec<Row>> {
    let mut rows: Vec<Row> = Vec::new();
    let mut total: Option<u64> = None;
    let mut order = Some("id.asc");

    loop {
        let mut page_query = query.clone().limit(page_size).offset(rows.len());
        if let Some(order) = order {
            page_query = page_query.order(order);
        }

        let fetched = if rows.is_empty() {
            client.select_counted(table, &page_query).await
        } else {
            client.select(table, &page_query).await.map(|page| (page, None))
        };
        let page = match fetched {
            Ok((page, reported)) => {
                if rows.is_empty() {
                    total = reported;
                }
                page
            }
            // No id column to order by: fall back to server order.
            Err(DbError::MissingColumn { .. }) if order.is_some() && rows.is_empty() => {
                order = None;
                continue;
            }
            Err(e) => return Err(e),
        };

        if page.is_empty() {
            return Ok(rows);
        }
        rows.extend(page);
        tracing::debug!(table, fetched = rows.len(), total = ?total, "page fetched");
        if total.is_some_and(|total| rows.len() as u64 >= total) {
            return Ok(rows);
        }
    }
}

/// Column order for a dump: catalog order first, then any other keys sorted.
pub fn column_order(table: &str, rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = shared::catalog::table(table)
        .map(|def| def.column_names().into_iter().map(str::to_string).collect())
        .unwrap_or_default();

    let extra: BTreeSet<&String> = rows
        .iter()
        .flat_map(|r| r.keys())
        .filter(|k| !columns.contains(k))
        .collect();
    columns.extend(extra.into_iter().cloned());

    // Catalog columns that the live rows do not carry are dropped, unless
    // there are no rows to compare with.
    if !rows.is_empty() {
        columns.retain(|c| rows.iter().any(|r| r.contains_key(c)));
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn catalog_columns_lead_then_extras_sorted() {
        let rows = vec![row(json!({"zeta": 1, "name": "Acme", "id": "c1", "alpha": 2}))];
        assert_eq!(
            column_order("companies", &rows),
            vec!["id", "name", "alpha", "zeta"]
        );
    }

    #[test]
    fn unknown_table_uses_sorted_keys() {
        let rows = vec![row(json!({"b": 1})), row(json!({"a": 2, "b": 3}))];
        assert_eq!(column_order("scratch", &rows), vec!["a", "b"]);
        assert!(column_order("scratch", &[]).is_empty());
    }

    #[test]
    fn empty_catalog_table_keeps_expected_columns() {
        assert_eq!(
            column_order("locations", &[]),
            vec!["id", "name", "created_at"]
        );
    }
}
