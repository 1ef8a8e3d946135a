use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

/// Counters for a single run. Owned by the job runner and passed down explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Pages successfully fetched or rendered
    pub pages_scraped: usize,

    /// Targets abandoned after a fatal status or exhausted retries
    pub pages_failed: usize,

    /// Records produced by extraction, before processing
    pub items_extracted: usize,

    /// Records remaining after processing
    pub items_processed: usize,

    pub robots_skipped: usize,

    pub proxy_failures: usize,

    pub total_duration_seconds: f64,

    #[serde(skip, default = "Instant::now")]
    clock: Instant,
}

impl RunStats {
    pub fn start() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            pages_scraped: 0,
            pages_failed: 0,
            items_extracted: 0,
            items_processed: 0,
            robots_skipped: 0,
            proxy_failures: 0,
            total_duration_seconds: 0.0,
            clock: Instant::now(),
        }
    }

    /// Stamp the end time and duration (rounded to hundredths of a second)
    pub fn finish(&mut self) {
        let elapsed = self.clock.elapsed().as_secs_f64();
        self.total_duration_seconds = (elapsed * 100.0).round() / 100.0;
        self.finished_at = Some(Utc::now());
    }

    /// One-line summary for logs and the CLI
    pub fn summary(&self) -> String {
        format!(
            "pages scraped: {}, pages failed: {}, items extracted: {}, items processed: {}, robots skipped: {}, proxy failures: {}, duration: {:.2}s",
            self.pages_scraped,
            self.pages_failed,
            self.items_extracted,
            self.items_processed,
            self.robots_skipped,
            self.proxy_failures,
            self.total_duration_seconds,
        )
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::start()
    }
}
