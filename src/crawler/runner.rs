use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::visited::VisitedSet;
use crate::browser::{launch_with_retries, BrowserControl, BrowserSession};
use crate::cli::config::{JobConfig, JobKind};
use crate::error::{ConfigError, JobError};
use crate::extract::{ApiJson, DynamicBrowser, Record, StaticHtml, Strategy};
use crate::fetch::FetchClient;
use crate::processing::RuleEngine;
use crate::utils::{resolve_user_agent, RunStats};

/// Everything a run hands to storage
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub records: Vec<Record>,
    pub stats: RunStats,
}

/// Drives one job end to end: acquire, extract, paginate, then process
pub struct JobRunner {
    config: JobConfig,
    user_agent: String,
    max_pages: Option<usize>,
}

impl JobRunner {
    pub fn new(config: JobConfig) -> Self {
        let user_agent = resolve_user_agent(config.user_agent.as_deref());
        let max_pages = config.max_pages();
        Self {
            config,
            user_agent,
            max_pages,
        }
    }

    /// Override the configured page cap
    pub fn with_max_pages(mut self, max_pages: Option<usize>) -> Self {
        if max_pages.is_some() {
            self.max_pages = max_pages;
        }
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Run the job, launching Chrome over WebDriver for dynamic jobs
    pub async fn run(&self) -> Result<RunOutput, JobError> {
        let (engine, mut fetch, mut stats) = self.setup()?;

        if !self.is_dynamic() {
            let strategy = self.plain_strategy::<BrowserSession>()?;
            return self.drive(strategy, fetch, &engine, stats).await;
        }

        let max_retries = self.config.max_retries;
        let launched = launch_with_retries(
            &self.config.browser,
            &self.user_agent,
            fetch.proxies_mut(),
            max_retries,
            &mut stats,
        )
        .await;

        match launched {
            Ok(session) => {
                let strategy = Strategy::Dynamic(DynamicBrowser::new(session, &self.config)?);
                self.drive(strategy, fetch, &engine, stats).await
            }
            Err(e) => {
                error!("Could not start a browser session for '{}': {}", self.config.name, e);
                Ok(self.complete(Vec::new(), &engine, stats))
            }
        }
    }

    /// Run the job with a caller-provided browser for dynamic pages
    pub async fn run_with_browser<B: BrowserControl>(&self, browser: B) -> Result<RunOutput, JobError> {
        let (engine, fetch, stats) = self.setup()?;
        let strategy = if self.is_dynamic() {
            Strategy::Dynamic(DynamicBrowser::new(browser, &self.config)?)
        } else {
            self.plain_strategy::<B>()?
        };
        self.drive(strategy, fetch, &engine, stats).await
    }

    fn is_dynamic(&self) -> bool {
        self.config.job_kind() == JobKind::Web && self.config.dynamic
    }

    fn setup(&self) -> Result<(RuleEngine, FetchClient, RunStats), ConfigError> {
        self.config.validate()?;
        let engine = RuleEngine::new(&self.config.processing_rules)?;
        let fetch = FetchClient::for_job(&self.config, self.user_agent.clone())?;
        info!("Starting job '{}' with user agent: {}", self.config.name, self.user_agent);
        Ok((engine, fetch, RunStats::start()))
    }

    fn plain_strategy<B: BrowserControl>(&self) -> Result<Strategy<B>, ConfigError> {
        match self.config.job_kind() {
            JobKind::Api => {
                let api = self.config.api_config.as_ref().ok_or(ConfigError::Missing("api_config"))?;
                Ok(Strategy::Api(ApiJson::new(api)))
            }
            JobKind::Web => {
                let selectors = self.config.selectors.as_ref().ok_or(ConfigError::Missing("selectors"))?;
                let html = StaticHtml::new(self.config.urls.clone(), selectors, self.config.pagination.as_ref())?;
                Ok(Strategy::Static(html))
            }
        }
    }

    async fn drive<B: BrowserControl>(
        &self,
        mut strategy: Strategy<B>,
        mut fetch: FetchClient,
        engine: &RuleEngine,
        mut stats: RunStats,
    ) -> Result<RunOutput, JobError> {
        if let Err(e) = strategy.prepare(&mut fetch).await {
            error!("Login failed, aborting job '{}': {}", self.config.name, e);
            strategy.finish().await;
            return Err(e.into());
        }

        let mut visited = VisitedSet::new();
        let mut records = Vec::new();
        let mut pages = 0usize;

        'seeds: for seed in strategy.seeds().await {
            let mut target = Some(seed);

            while let Some(url) = target.take() {
                if !visited.insert(&url) {
                    warn!("Next page URL {} has already been visited. Stopping pagination.", url);
                    break;
                }

                info!("Scraping page {}: {}", pages + 1, url);
                let Some(content) = strategy.acquire(&url, &mut fetch, &mut stats).await else {
                    warn!("No content for {}. Ending this pagination chain.", url);
                    break;
                };
                pages += 1;

                let page_records = strategy.extract(&content).await;
                debug!("{} records from {}", page_records.len(), url);
                stats.items_extracted += page_records.len();
                records.extend(page_records);

                if self.max_pages.is_some_and(|max| pages >= max) {
                    info!("Reached max pages limit ({})", pages);
                    break 'seeds;
                }
                if strategy.paginates() {
                    target = strategy.next_target(&content).await;
                    if target.is_none() {
                        info!("No next page found after {}", url);
                    }
                }
            }
        }

        strategy.finish().await;
        Ok(self.complete(records, engine, stats))
    }

    fn complete(&self, records: Vec<Record>, engine: &RuleEngine, mut stats: RunStats) -> RunOutput {
        let records = engine.process(records);
        stats.items_processed = records.len();
        stats.finish();
        info!("Job '{}' finished. {}", self.config.name, stats.summary());
        RunOutput { records, stats }
    }
}
