use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Enforces a minimum spacing between consecutive requests
#[derive(Debug)]
pub struct Throttle {
    delay: Duration,
    last_call: Option<Instant>,
}

impl Throttle {
    /// `delay_secs` below zero is treated as zero
    pub fn new(delay_secs: f64) -> Self {
        let delay = if delay_secs.is_finite() && delay_secs > 0.0 {
            Duration::from_secs_f64(delay_secs)
        } else {
            Duration::ZERO
        };
        Self {
            delay,
            last_call: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleep until `delay` has passed since the previous call completed
    pub async fn wait(&mut self) {
        if self.delay.is_zero() {
            return;
        }

        if let Some(last) = self.last_call {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                let remaining = self.delay - elapsed;
                debug!("Throttling request: sleeping for {:.2} seconds", remaining.as_secs_f64());
                sleep(remaining).await;
            }
        }

        self.last_call = Some(Instant::now());
    }
}
