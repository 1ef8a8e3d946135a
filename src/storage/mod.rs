pub mod csv;
pub mod json;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cli::config::OutputFormat;
use crate::extract::Record;
use crate::utils::RunStats;

pub use self::csv::CsvSink;
pub use self::json::JsonSink;

/// Destination for the records of one run
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Persist the records and return the path written
    async fn save(&self, records: &[Record], stats: &RunStats) -> Result<PathBuf>;
}

/// Sink for the configured output format
pub fn sink_for(format: OutputFormat, dir: impl Into<PathBuf>, job_name: &str) -> Box<dyn RecordSink> {
    let dir = dir.into();
    match format {
        OutputFormat::Json => Box::new(JsonSink::new(dir, job_name)),
        OutputFormat::Csv => Box::new(CsvSink::new(dir, job_name)),
    }
}

/// Lowercase ASCII alphanumerics joined by single underscores
pub fn slugify(name: &str) -> String {
    let slug = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("_");
    if slug.is_empty() {
        "scraped_data".to_string()
    } else {
        slug
    }
}

/// `<dir>/<slug>_<YYYYmmdd_HHMMSS>.<ext>`, creating `dir` if needed
pub(crate) async fn output_path(dir: &Path, job_name: &str, extension: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{}_{}.{}", slugify(job_name), stamp, extension));
    debug!("Output file: {}", path.display());
    Ok(path)
}

/// Write run statistics next to `data_path` as `<stem>_stats.json`
pub(crate) async fn write_stats(data_path: &Path, stats: &RunStats) -> Result<PathBuf> {
    let stem = data_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "run".to_string());
    let path = data_path.with_file_name(format!("{}_stats.json", stem));
    let body = serde_json::to_string_pretty(stats).context("Failed to serialize run statistics")?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("Failed to write statistics: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Example Paged Scraper"), "example_paged_scraper");
        assert_eq!(slugify("  quotes -- v2!  "), "quotes_v2");
        assert_eq!(slugify("***"), "scraped_data");
    }

    #[tokio::test]
    async fn test_output_path_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested/out");
        let path = output_path(&dir, "My Job", "csv").await.unwrap();

        assert!(dir.is_dir());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("my_job_"));
        assert!(name.ends_with(".csv"));
        // my_job_ + YYYYmmdd_HHMMSS + .csv
        assert_eq!(name.len(), "my_job_".len() + 15 + ".csv".len());
    }
}
