use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::robots::RobotsGate;
use super::throttle::Throttle;
use super::transport::{FetchRequest, HttpTransport, RawResponse, ReqwestTransport, TransportError};
use crate::cli::config::JobConfig;
use crate::error::{ConfigError, FetchError, FetchErrorKind};
use crate::proxy::ProxyPool;
use crate::utils::RunStats;

/// What to do after one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Retry(FetchErrorKind),
    Fatal(FetchErrorKind),
}

/// Pure retry policy: 2xx succeeds, 4xx other than 429 is fatal, everything else is retried
pub fn classify(outcome: &Result<RawResponse, TransportError>, via_proxy: bool) -> Verdict {
    match outcome {
        Ok(response) => match response.status {
            200..=299 => Verdict::Success,
            429 => Verdict::Retry(FetchErrorKind::HttpRetryable),
            400..=499 => Verdict::Fatal(FetchErrorKind::HttpClientFatal),
            _ => Verdict::Retry(FetchErrorKind::HttpRetryable),
        },
        Err(TransportError::Timeout) => Verdict::Retry(FetchErrorKind::Timeout),
        Err(TransportError::Connect(_)) if via_proxy => Verdict::Retry(FetchErrorKind::ProxyFailure),
        Err(_) => Verdict::Retry(FetchErrorKind::NetworkOther),
    }
}

/// `unit * 2^attempt`, attempt counted from zero
pub fn backoff_delay(unit: Duration, attempt: u32) -> Duration {
    unit.saturating_mul(2u32.saturating_pow(attempt))
}

/// A successfully fetched document
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub final_url: String,
    pub body: String,
}

/// Politeness and resilience parameters of one job
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agent: String,
    pub timeout: Duration,
    pub request_delay: f64,
    pub max_retries: u32,
    pub respect_robots: bool,
    pub backoff_unit: Duration,
}

impl FetchSettings {
    pub fn from_job(job: &JobConfig, user_agent: String) -> Self {
        Self {
            user_agent,
            timeout: Duration::from_secs(job.request_timeout),
            request_delay: job.request_delay,
            max_retries: job.max_retries,
            respect_robots: job.respect_robots,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// Throttled, robots-aware, proxy-rotating HTTP fetcher with retry and backoff
pub struct FetchClient {
    transport: Arc<dyn HttpTransport>,
    throttle: Throttle,
    robots: RobotsGate,
    proxies: ProxyPool,
    settings: FetchSettings,
}

impl FetchClient {
    pub fn new(transport: Arc<dyn HttpTransport>, proxies: ProxyPool, settings: FetchSettings) -> Self {
        Self {
            transport,
            throttle: Throttle::new(settings.request_delay),
            robots: RobotsGate::new(settings.respect_robots, settings.timeout),
            proxies,
            settings,
        }
    }

    /// Client over reqwest for the given job
    pub fn for_job(job: &JobConfig, user_agent: String) -> Result<Self, ConfigError> {
        let transport = ReqwestTransport::new()
            .map_err(|e| ConfigError::invalid("http client", e.to_string()))?;
        Ok(Self::new(
            Arc::new(transport),
            ProxyPool::new(&job.proxies),
            FetchSettings::from_job(job, user_agent),
        ))
    }

    /// Shrink the backoff base, mostly useful in tests
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.settings.backoff_unit = unit;
        self
    }

    pub fn user_agent(&self) -> &str {
        &self.settings.user_agent
    }

    pub fn max_retries(&self) -> u32 {
        self.settings.max_retries
    }

    pub fn proxies(&self) -> &ProxyPool {
        &self.proxies
    }

    pub fn proxies_mut(&mut self) -> &mut ProxyPool {
        &mut self.proxies
    }

    /// Wait out the inter-request delay without issuing a request
    pub async fn throttle(&mut self) {
        self.throttle.wait().await;
    }

    /// Robots check that also counts skips
    pub async fn robots_allows(&mut self, url: &str, stats: &mut RunStats) -> bool {
        let allowed = self
            .robots
            .is_allowed(url, &self.settings.user_agent, self.transport.as_ref())
            .await;
        if !allowed {
            warn!("Scraping disallowed by robots.txt for URL: {} (User-Agent: {})", url, self.settings.user_agent);
            stats.robots_skipped += 1;
        }
        allowed
    }

    /// Body of `url`, or `None` after a robots denial, fatal status or exhausted retries
    pub async fn fetch(&mut self, url: &str, max_retries: u32, stats: &mut RunStats) -> Option<String> {
        self.fetch_page(url, &[], max_retries, stats)
            .await
            .ok()
            .map(|page| page.body)
    }

    pub async fn fetch_page(
        &mut self,
        url: &str,
        headers: &[(String, String)],
        max_retries: u32,
        stats: &mut RunStats,
    ) -> Result<FetchedPage, FetchError> {
        if !self.robots_allows(url, stats).await {
            return Err(FetchError {
                kind: FetchErrorKind::RobotsDenied,
                url: url.to_string(),
                detail: "disallowed by robots.txt".to_string(),
            });
        }

        let mut last_failure = (FetchErrorKind::NetworkOther, String::from("no attempt made"));

        for attempt in 0..=max_retries {
            self.throttle.wait().await;

            let proxy = self.proxies.next();
            let request = FetchRequest {
                url: url.to_string(),
                headers: headers.to_vec(),
                user_agent: self.settings.user_agent.clone(),
                timeout: self.settings.timeout,
                proxy: proxy.clone(),
            };

            debug!("Fetching {} (attempt {}/{})", url, attempt + 1, max_retries + 1);
            let outcome = self.transport.send(&request).await;

            match classify(&outcome, proxy.is_some()) {
                Verdict::Success => {
                    if let Ok(response) = outcome {
                        info!("Successfully fetched {} (status {})", url, response.status);
                        stats.pages_scraped += 1;
                        return Ok(FetchedPage {
                            url: url.to_string(),
                            final_url: response.final_url,
                            body: response.body,
                        });
                    }
                }
                Verdict::Fatal(kind) => {
                    let detail = describe(&outcome);
                    warn!("Client error fetching {}: {}. Not retrying.", url, detail);
                    stats.pages_failed += 1;
                    return Err(FetchError {
                        kind,
                        url: url.to_string(),
                        detail,
                    });
                }
                Verdict::Retry(kind) => {
                    let detail = describe(&outcome);
                    if kind == FetchErrorKind::ProxyFailure {
                        if let Some(proxy) = &proxy {
                            self.proxies.quarantine(proxy);
                        }
                        stats.proxy_failures += 1;
                    }
                    warn!(
                        "Attempt {}/{} for {} failed ({}): {}",
                        attempt + 1,
                        max_retries + 1,
                        url,
                        kind,
                        detail
                    );
                    last_failure = (kind, detail);
                }
            }

            if attempt < max_retries {
                let delay = backoff_delay(self.settings.backoff_unit, attempt);
                info!("Retrying {} in {:.1} seconds", url, delay.as_secs_f64());
                sleep(delay).await;
            }
        }

        warn!("Failed to fetch {} after {} attempts", url, max_retries + 1);
        stats.pages_failed += 1;
        let (kind, detail) = last_failure;
        Err(FetchError {
            kind,
            url: url.to_string(),
            detail,
        })
    }
}

fn describe(outcome: &Result<RawResponse, TransportError>) -> String {
    match outcome {
        Ok(response) => format!("HTTP {}", response.status),
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::ProxySettings;
    use crate::fetch::transport::MockHttpTransport;
    use crate::proxy::ProxyHealth;
    use tokio::time::Instant;

    fn response(status: u16, body: &str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse {
            status,
            final_url: "https://example.com/page".to_string(),
            body: body.to_string(),
        })
    }

    fn settings(max_retries: u32) -> FetchSettings {
        FetchSettings {
            user_agent: "TestBot/1.0".to_string(),
            timeout: Duration::from_secs(5),
            request_delay: 0.0,
            max_retries,
            respect_robots: false,
            backoff_unit: Duration::from_secs(1),
        }
    }

    fn client(transport: MockHttpTransport, max_retries: u32) -> FetchClient {
        FetchClient::new(Arc::new(transport), ProxyPool::new(&[]), settings(max_retries))
    }

    #[test]
    fn test_classify_statuses() {
        assert_eq!(classify(&response(200, ""), false), Verdict::Success);
        assert_eq!(classify(&response(204, ""), false), Verdict::Success);
        assert_eq!(
            classify(&response(404, ""), false),
            Verdict::Fatal(FetchErrorKind::HttpClientFatal)
        );
        assert_eq!(
            classify(&response(403, ""), true),
            Verdict::Fatal(FetchErrorKind::HttpClientFatal)
        );
        assert_eq!(
            classify(&response(429, ""), false),
            Verdict::Retry(FetchErrorKind::HttpRetryable)
        );
        assert_eq!(
            classify(&response(503, ""), false),
            Verdict::Retry(FetchErrorKind::HttpRetryable)
        );
    }

    #[test]
    fn test_classify_transport_errors() {
        assert_eq!(
            classify(&Err(TransportError::Timeout), true),
            Verdict::Retry(FetchErrorKind::Timeout)
        );
        assert_eq!(
            classify(&Err(TransportError::Connect("refused".into())), true),
            Verdict::Retry(FetchErrorKind::ProxyFailure)
        );
        assert_eq!(
            classify(&Err(TransportError::Connect("refused".into())), false),
            Verdict::Retry(FetchErrorKind::NetworkOther)
        );
        assert_eq!(
            classify(&Err(TransportError::Other("dns".into())), false),
            Verdict::Retry(FetchErrorKind::NetworkOther)
        );
    }

    #[test]
    fn test_backoff_doubles() {
        let unit = Duration::from_secs(1);
        assert_eq!(backoff_delay(unit, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(unit, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(unit, 3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_returns_body() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| response(200, "<html>ok</html>"));

        let mut stats = RunStats::start();
        let body = client(transport, 3)
            .fetch("https://example.com/page", 3, &mut stats)
            .await;
        assert_eq!(body.as_deref(), Some("<html>ok</html>"));
        assert_eq!(stats.pages_scraped, 1);
        assert_eq!(stats.pages_failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_exhaust_all_attempts() {
        for n in [0u32, 1, 3] {
            let mut transport = MockHttpTransport::new();
            transport
                .expect_send()
                .times(n as usize + 1)
                .returning(|_| response(500, "boom"));

            let mut stats = RunStats::start();
            let body = client(transport, n)
                .fetch("https://example.com/page", n, &mut stats)
                .await;
            assert!(body.is_none());
            assert_eq!(stats.pages_failed, 1);
            assert_eq!(stats.pages_scraped, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried_with_backoff() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .times(3)
            .returning(|_| Err(TransportError::Timeout));

        let mut stats = RunStats::start();
        let start = Instant::now();
        let body = client(transport, 2)
            .fetch("https://example.com/page", 2, &mut stats)
            .await;
        assert!(body.is_none());
        // 1s after the first attempt, 2s after the second, none after the last
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert!(start.elapsed() < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .times(1)
            .returning(|_| response(404, "missing"));

        let mut stats = RunStats::start();
        let result = client(transport, 3)
            .fetch_page("https://example.com/missing", &[], 3, &mut stats)
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::HttpClientFatal);
        assert_eq!(stats.pages_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_retried() {
        let mut transport = MockHttpTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| response(429, "slow down"));
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| response(200, "fine"));

        let mut stats = RunStats::start();
        let body = client(transport, 3)
            .fetch("https://example.com/page", 3, &mut stats)
            .await;
        assert_eq!(body.as_deref(), Some("fine"));
        assert_eq!(stats.pages_scraped, 1);
        assert_eq!(stats.pages_failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_proxy_is_quarantined() {
        let mut transport = MockHttpTransport::new();
        transport.expect_send().times(2).returning(|req| {
            if req.proxy.is_some() {
                Err(TransportError::Connect("connection refused".into()))
            } else {
                response(200, "direct")
            }
        });

        let proxies = ProxyPool::new(&[ProxySettings {
            http: Some("http://10.0.0.1:8080".to_string()),
            https: None,
        }]);
        let mut client = FetchClient::new(Arc::new(transport), proxies, settings(3));

        let mut stats = RunStats::start();
        let body = client.fetch("https://example.com/page", 3, &mut stats).await;
        assert_eq!(body.as_deref(), Some("direct"));
        assert_eq!(stats.proxy_failures, 1);
        assert_eq!(client.proxies().available_count(), 0);
        let bad = crate::proxy::ProxyEntry::from_settings(&ProxySettings {
            http: Some("http://10.0.0.1:8080".to_string()),
            https: None,
        })
        .unwrap();
        assert_eq!(client.proxies().health(&bad), ProxyHealth::Quarantined);
    }

    #[tokio::test(start_paused = true)]
    async fn test_robots_denial_skips_network() {
        let mut transport = MockHttpTransport::new();
        transport.expect_send().times(1).returning(|req| {
            assert!(req.url.ends_with("/robots.txt"));
            response(200, "User-agent: *\nDisallow: /\n")
        });

        let mut settings = settings(3);
        settings.respect_robots = true;
        let mut client = FetchClient::new(Arc::new(transport), ProxyPool::new(&[]), settings);

        let mut stats = RunStats::start();
        let result = client
            .fetch_page("https://example.com/page", &[], 3, &mut stats)
            .await;
        assert_eq!(result.unwrap_err().kind, FetchErrorKind::RobotsDenied);
        assert_eq!(stats.robots_skipped, 1);
        assert_eq!(stats.pages_failed, 0);
    }
}
