use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing::info;

use crate::cli::config::{JobConfig, OutputFormat};
use crate::crawler::JobRunner;
use crate::storage::sink_for;

/// Run a job and save its records
pub async fn run(
    config_path: PathBuf,
    output_dir: Option<PathBuf>,
    format: Option<OutputFormat>,
    max_pages: Option<usize>,
    no_save: bool,
) -> Result<()> {
    if max_pages == Some(0) {
        bail!("--max-pages must be at least 1");
    }

    let mut config = JobConfig::load(&config_path)
        .with_context(|| format!("Failed to load job: {}", config_path.display()))?;

    // Override configuration with command line parameters if provided
    if let Some(dir) = output_dir {
        config.output_dir = dir.display().to_string();
    }
    if let Some(format) = format {
        config.output_format = format;
    }

    let runner = JobRunner::new(config).with_max_pages(max_pages);
    let output = runner
        .run()
        .await
        .with_context(|| format!("Job '{}' failed", runner.config().name))?;

    println!("Job: {}", runner.config().name);
    println!("Records: {}", output.records.len());
    println!("{}", output.stats.summary());

    if no_save {
        info!("Skipping output files (--no-save)");
        return Ok(());
    }

    let job = runner.config();
    let sink = sink_for(job.output_format, &job.output_dir, &job.name);
    let path = sink.save(&output.records, &output.stats).await?;
    println!("Saved to: {}", path.display());

    Ok(())
}

/// Load and validate a job file
pub fn validate(config_path: PathBuf) -> Result<()> {
    let config = JobConfig::load(&config_path)
        .with_context(|| format!("Invalid job: {}", config_path.display()))?;

    println!("Job '{}' is valid", config.name);
    println!("Kind: {:?}", config.job_kind());
    if !config.urls.is_empty() {
        println!("URLs: {}", config.urls.len());
    }
    if let Some(max) = config.max_pages() {
        println!("Max pages: {}", max);
    }
    Ok(())
}

/// Write the example job description
pub fn sample(path: PathBuf) -> Result<()> {
    if path.exists() {
        bail!("Refusing to overwrite existing file: {}", path.display());
    }
    JobConfig::sample().save(&path)?;
    println!("Sample job written to {}", path.display());
    Ok(())
}
