use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{column_order, fetch_all, SkippedTable};
use crate::client::{RestClient, Row};
use crate::error::DbResult;
use crate::probe::{probe_table, TableProbe};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub table_count: usize,
    pub record_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub record_count: usize,
    pub columns: Vec<String>,
    pub exported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableBackup {
    pub table_info: TableInfo,
    pub data: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupFile {
    pub backup_info: BackupInfo,
    pub tables: BTreeMap<String, TableBackup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedTable>,
}

impl BackupFile {
    pub fn new(source: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            backup_info: BackupInfo {
                timestamp,
                source: source.into(),
                table_count: 0,
                record_count: 0,
            },
            tables: BTreeMap::new(),
            skipped: Vec::new(),
        }
    }

    /// Add a table's rows, keeping the counters in step with the data.
    pub fn push_table(&mut self, name: &str, data: Vec<Row>, exported_at: DateTime<Utc>) {
        let table_info = TableInfo {
            name: name.to_string(),
            record_count: data.len(),
            columns: column_order(name, &data),
            exported_at,
        };
        if let Some(old) = self.tables.insert(name.to_string(), TableBackup { table_info, data }) {
            self.backup_info.record_count -= old.data.len();
        }
        self.backup_info.record_count += self.tables[name].data.len();
        self.backup_info.table_count = self.tables.len();
    }

    /// Tables whose `record_count` disagrees with their data.
    pub fn inconsistent_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|(_, t)| t.table_info.record_count != t.data.len())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let info = &self.backup_info;
        let _ = writeln!(out, "Database backup");
        let _ = writeln!(out, "===============");
        let _ = writeln!(out, "Timestamp: {}", info.timestamp.to_rfc3339());
        let _ = writeln!(out, "Source:    {}", info.source);
        let _ = writeln!(out, "Tables:    {}", info.table_count);
        let _ = writeln!(out, "Records:   {}", info.record_count);
        let _ = writeln!(out);
        let _ = writeln!(out, "{:<28} {:>10}", "Table", "Records");
        let _ = writeln!(out, "{}", "-".repeat(40));
        for (name, table) in &self.tables {
            let _ = writeln!(out, "{:<28} {:>10}", name, table.table_info.record_count);
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

/// Dump `tables` into one document. Tables that cannot be read are listed
/// under `skipped` and do not stop the backup.
pub async fn backup(client: &RestClient, tables: &[String], page_size: usize) -> BackupFile {
    let mut doc = BackupFile::new(client.base_url(), Utc::now());

    for table in tables {
        match probe_table(client, table).await {
            TableProbe::Absent => {
                doc.skipped.push(SkippedTable {
                    table: table.clone(),
                    reason: "table does not exist".to_string(),
                });
                continue;
            }
            TableProbe::Unknown { message } => {
                doc.skipped.push(SkippedTable {
                    table: table.clone(),
                    reason: message,
                });
                continue;
            }
            TableProbe::Exists { .. } | TableProbe::ExistsEmpty => {}
        }

        match fetch_all(client, table, page_size).await {
            Ok(rows) => {
                tracing::info!(table = %table, records = rows.len(), "table backed up");
                doc.push_table(table, rows, Utc::now());
            }
            Err(e) => doc.skipped.push(SkippedTable {
                table: table.clone(),
                reason: e.to_string(),
            }),
        }
    }

    doc
}

/// Write `backup_<stamp>.json` and its `.txt` summary under `out_dir`.
pub fn write_backup(doc: &BackupFile, out_dir: &Path) -> DbResult<(PathBuf, PathBuf)> {
    fs::create_dir_all(out_dir)?;
    let stamp = doc.backup_info.timestamp.format("%Y%m%d_%H%M%S");
    let json_path = out_dir.join(format!("backup_{}.json", stamp));
    let txt_path = out_dir.join(format!("backup_{}.txt", stamp));

    fs::write(&json_path, serde_json::to_string_pretty(doc)?)?;
    fs::write(&txt_path, doc.summary())?;
    Ok((json_path, txt_path))
}

pub fn read_backup(path: &Path) -> DbResult<BackupFile> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
