use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

use super::{output_path, write_stats, RecordSink};
use crate::extract::Record;
use crate::utils::RunStats;

/// Pretty-printed JSON array plus a statistics file
pub struct JsonSink {
    dir: PathBuf,
    job_name: String,
}

impl JsonSink {
    pub fn new(dir: impl Into<PathBuf>, job_name: &str) -> Self {
        Self {
            dir: dir.into(),
            job_name: job_name.to_string(),
        }
    }
}

#[async_trait]
impl RecordSink for JsonSink {
    async fn save(&self, records: &[Record], stats: &RunStats) -> Result<PathBuf> {
        let path = output_path(&self.dir, &self.job_name, "json").await?;
        let body = serde_json::to_string_pretty(records).context("Failed to serialize records")?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        let stats_path = write_stats(&path, stats).await?;

        info!("Saved {} records to {} (stats: {})", records.len(), path.display(), stats_path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_writes_records_and_stats() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = JsonSink::new(tmp.path(), "quotes");
        let records: Vec<Record> = vec![
            json!({"b": "first", "a": 1}).as_object().cloned().unwrap(),
            json!({"b": null}).as_object().cloned().unwrap(),
        ];
        let mut stats = RunStats::start();
        stats.pages_scraped = 2;
        stats.finish();

        let path = sink.save(&records, &stats).await.unwrap();
        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, json!([{"b": "first", "a": 1}, {"b": null}]));
        // Field order survives serialization
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.find("\"b\"").unwrap() < text.find("\"a\"").unwrap());

        let stem = path.file_stem().unwrap().to_string_lossy().into_owned();
        let stats_path = path.with_file_name(format!("{}_stats.json", stem));
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(stats_path).unwrap()).unwrap();
        assert_eq!(saved["pages_scraped"], 2);
        assert!(saved["run_id"].is_string());
    }
}
