use anyhow::{Context, Result};
use async_trait::async_trait;
use indexmap::IndexSet;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{output_path, write_stats, RecordSink};
use crate::extract::Record;
use crate::utils::RunStats;

/// Comma-separated records, one column per field seen in any record
pub struct CsvSink {
    dir: PathBuf,
    job_name: String,
}

impl CsvSink {
    pub fn new(dir: impl Into<PathBuf>, job_name: &str) -> Self {
        Self {
            dir: dir.into(),
            job_name: job_name.to_string(),
        }
    }
}

#[async_trait]
impl RecordSink for CsvSink {
    async fn save(&self, records: &[Record], stats: &RunStats) -> Result<PathBuf> {
        if records.is_empty() {
            warn!("No records to save; writing an empty CSV file");
        }
        let path = output_path(&self.dir, &self.job_name, "csv").await?;
        tokio::fs::write(&path, render(records))
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        write_stats(&path, stats).await?;

        info!("Saved {} records to {}", records.len(), path.display());
        Ok(path)
    }
}

/// Header is the union of field names in first-seen order
pub fn render(records: &[Record]) -> String {
    let columns: IndexSet<&str> = records.iter().flat_map(|r| r.keys().map(String::as_str)).collect();
    if columns.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    push_row(&mut out, columns.iter().map(|c| c.to_string()));
    for record in records {
        push_row(&mut out, columns.iter().map(|c| cell(record.get(*c))));
    }
    out
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn needs_quotes(field: &str) -> bool {
    field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r')
}

fn push_row(out: &mut String, cells: impl Iterator<Item = String>) {
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if needs_quotes(&cell) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(&cell);
        }
    }
    out.push_str("\r\n");
}
