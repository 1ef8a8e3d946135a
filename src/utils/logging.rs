use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber.
///
/// Other crates log at `warn` unless `RUST_LOG` says otherwise; this crate
/// logs at `info`, or `debug` when `verbose`. With `log_file`, events are also
/// appended there without ANSI colours.
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let crate_level = if verbose { "smart_scraper=debug" } else { "smart_scraper=info" };
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy()
        .add_directive(crate_level.parse()?);

    let file_layer = match log_file {
        Some(path) => {
            let file = open_log_file(&path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(verbose))
        .with(file_layer)
        .try_init()?;

    Ok(())
}

/// Open `path` for appending, creating its directory first
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

/// `scraper.log` in the per-user data directory, or `./logs` without one
pub fn default_log_file() -> PathBuf {
    directories::ProjectDirs::from("com", "smart-scraper", "smart-scraper")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./logs"))
        .join("scraper.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_log_file_is_appended() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/run.log");

        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_default_log_file_name() {
        assert!(default_log_file().ends_with("scraper.log"));
    }
}
