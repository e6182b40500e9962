use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{column_order, fetch_all, SkippedTable};
use crate::client::{RestClient, Row};
use crate::error::DbResult;

/// Written in place of a header when neither rows nor the catalog give columns.
pub const NO_DATA_PLACEHOLDER: &str = "no data";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvExportReport {
    pub directory: PathBuf,
    /// `(table, rows written)` in export order.
    pub files: Vec<(String, usize)>,
    pub skipped: Vec<SkippedTable>,
}

impl CsvExportReport {
    pub fn total_rows(&self) -> usize {
        self.files.iter().map(|(_, n)| n).sum()
    }

    fn summary(&self, timestamp: DateTime<Utc>, source: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "CSV export");
        let _ = writeln!(out, "==========");
        let _ = writeln!(out, "Timestamp: {}", timestamp.to_rfc3339());
        let _ = writeln!(out, "Source:    {}", source);
        let _ = writeln!(out, "Files:     {}", self.files.len());
        let _ = writeln!(out, "Records:   {}", self.total_rows());
        let _ = writeln!(out);
        for (table, n) in &self.files {
            let _ = writeln!(out, "{:<28} {:>10}  {}.csv", table, n, table);
        }
        if !self.skipped.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Skipped:");
            for s in &self.skipped {
                let _ = writeln!(out, "  - {}: {}", s.table, s.reason);
            }
        }
        out
    }
}

/// Text form of one JSON value for a CSV cell.
pub fn field_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Write `rows` as CSV. Quoting of commas, quotes and line breaks is left to
/// the `csv` writer, which doubles embedded quotes.
pub fn write_rows<W: io::Write>(writer: W, table: &str, rows: &[Row]) -> DbResult<usize> {
    let mut wtr = ::csv::WriterBuilder::new()
        .quote_style(::csv::QuoteStyle::Necessary)
        .from_writer(writer);
    let columns = column_order(table, rows);

    if columns.is_empty() {
        wtr.write_record([NO_DATA_PLACEHOLDER])?;
        wtr.flush()?;
        return Ok(0);
    }

    wtr.write_record(&columns)?;
    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|c| row.get(c).map(field_value).unwrap_or_default())
            .collect();
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(rows.len())
}

/// Export each table to `<out_dir>/csv_export_<stamp>/<table>.csv` plus a
/// summary file.
pub async fn export_csv(
    client: &RestClient,
    tables: &[String],
    page_size: usize,
    out_dir: &Path,
) -> DbResult<CsvExportReport> {
    let now = Utc::now();
    let directory = out_dir.join(format!("csv_export_{}", now.format("%Y%m%d_%H%M%S")));
    fs::create_dir_all(&directory)?;

    let mut report = CsvExportReport {
        directory: directory.clone(),
        files: Vec::new(),
        skipped: Vec::new(),
    };

    for table in tables {
        let rows = match fetch_all(client, table, page_size).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(table = %table, error = %e, "skipping table");
                report.skipped.push(SkippedTable {
                    table: table.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let file = fs::File::create(directory.join(format!("{}.csv", table)))?;
        let written = write_rows(io::BufWriter::new(file), table, &rows)?;
        tracing::info!(table = %table, records = written, "table exported");
        report.files.push((table.clone(), written));
    }

    fs::write(
        directory.join("export_summary.txt"),
        report.summary(now, client.base_url()),
    )?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_string(table: &str, rows: &[Row]) -> String {
        let mut buf = Vec::new();
        write_rows(&mut buf, table, rows).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn awkward_values_round_trip_through_a_csv_reader() {
        let nasty = "Replace seal, check \"gland\"\nthen restart";
        let row = json!({"id": "WO-7", "title": nasty}).as_object().cloned().unwrap();
        let text = to_string("scratch", &[row]);

        let mut rdr = ::csv::Reader::from_reader(text.as_bytes());
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["id", "title"]);
        let record = rdr.records().next().unwrap().unwrap();
        assert_eq!(&record[1], nasty);
        assert!(text.contains("\"\"gland\"\""));
    }

    #[test]
    fn nulls_numbers_and_objects_render_as_text() {
        assert_eq!(field_value(&Value::Null), "");
        assert_eq!(field_value(&json!(2.5)), "2.5");
        assert_eq!(field_value(&json!(true)), "true");
        assert_eq!(field_value(&json!({"a": [1, 2]})), r#"{"a":[1,2]}"#);
    }

    #[test]
    fn empty_catalog_table_writes_header_only() {
        let text = to_string("locations", &[]);
        assert_eq!(text, "id,name,created_at\n");
    }

    #[test]
    fn empty_unknown_table_writes_placeholder() {
        let text = to_string("scratch", &[]);
        assert_eq!(text, "no data\n");
    }

    #[test]
    fn missing_keys_become_empty_cells() {
        let rows: Vec<Row> = [json!({"id": "1", "name": "A"}), json!({"id": "2"})]
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        let text = to_string("locations", &rows);
        assert_eq!(text, "id,name\n1,A\n2,\n");
    }
}
