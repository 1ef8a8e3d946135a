use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::{field_value, has_any_value, Content, Record};
use crate::browser::{BrowserControl, Locator};
use crate::cli::config::{BrowserSettings, JobConfig, LoginSettings, SelectorKind};
use crate::error::{BrowserError, ConfigError, ExtractionError, LoginError};
use crate::fetch::FetchClient;
use crate::utils::RunStats;

const LOGIN_FIELD_WAIT: Duration = Duration::from_secs(10);
const LOGIN_VERIFY_WAIT: Duration = Duration::from_secs(5);
const CONTAINER_WAIT: Duration = Duration::from_secs(5);
const NEXT_CONTROL_WAIT: Duration = Duration::from_secs(5);
const URL_CHANGE_WAIT: Duration = Duration::from_secs(10);
const URL_POLL: Duration = Duration::from_millis(250);

struct LiveField {
    name: String,
    locator: Locator,
    attr: Option<String>,
}

/// Browser-rendered pages with optional login and click-through pagination
pub struct DynamicBrowser<B: BrowserControl> {
    browser: Option<B>,
    urls: Vec<String>,
    kind: SelectorKind,
    container: Option<Locator>,
    item: Locator,
    fields: Vec<LiveField>,
    next_page: Option<Locator>,
    settings: BrowserSettings,
    login: Option<LoginSettings>,
    landing_url: Option<String>,
}

impl<B: BrowserControl> DynamicBrowser<B> {
    pub fn new(browser: B, job: &JobConfig) -> Result<Self, ConfigError> {
        let selectors = job.selectors.as_ref().ok_or(ConfigError::Missing("selectors"))?;
        let kind = selectors.kind;

        let fields = selectors
            .fields
            .iter()
            .map(|(name, field)| LiveField {
                name: name.clone(),
                locator: Locator::new(kind, field.selector()),
                attr: field.attribute().map(str::to_string),
            })
            .collect();

        // A path ending in an attribute step cannot be clicked; click its element instead
        let next_page = job.pagination.as_ref().map(|p| {
            let selector = p.next_page_selector.as_str();
            let clickable = match (kind, selector.rsplit_once("/@")) {
                (SelectorKind::Xpath, Some((element, _))) => element,
                _ => selector,
            };
            Locator::new(kind, clickable)
        });

        Ok(Self {
            browser: Some(browser),
            urls: job.urls.clone(),
            kind,
            container: selectors.container.as_deref().map(|c| Locator::new(kind, c)),
            item: Locator::new(kind, selectors.item.as_str()),
            fields,
            next_page,
            settings: job.browser.clone(),
            login: job.login_config.clone(),
            landing_url: None,
        })
    }

    pub fn paginates(&self) -> bool {
        self.next_page.is_some()
    }

    fn browser(&self) -> Result<&B, BrowserError> {
        self.browser.as_ref().ok_or(BrowserError::Closed)
    }

    /// Configured URLs, or the page the login flow landed on
    pub async fn seeds(&self) -> Vec<String> {
        if !self.urls.is_empty() {
            return self.urls.clone();
        }

        let login_url = self.login.as_ref().map(|l| l.login_url.as_str());
        match self.landing_url.as_deref() {
            Some(landing) if landing != "about:blank" && Some(landing) != login_url => {
                info!("No initial URLs specified, starting from the page reached after login: {}", landing);
                vec![landing.to_string()]
            }
            _ => {
                warn!("No target URLs and no usable post-login page. Nothing to scrape.");
                Vec::new()
            }
        }
    }

    /// Run the login flow if one is configured
    pub async fn login(&mut self, fetch: &mut FetchClient) -> Result<(), LoginError> {
        let Some(login) = self.login.clone() else {
            return Ok(());
        };
        let browser = self.browser().map_err(|_| LoginError::NoSession)?;
        info!("Attempting login via: {}", login.login_url);

        fetch.throttle().await;
        browser
            .navigate(&login.login_url)
            .await
            .map_err(|e| LoginError::Navigation {
                url: login.login_url.clone(),
                reason: e.to_string(),
            })?;
        if self.settings.wait_time > 0.0 {
            sleep(Duration::from_secs_f64(self.settings.wait_time)).await;
        }

        let form_error = |selector: &str, e: BrowserError| LoginError::Form {
            selector: selector.to_string(),
            reason: e.to_string(),
        };
        let user_loc = Locator::new(self.kind, login.username_selector.as_str());
        let pass_loc = Locator::new(self.kind, login.password_selector.as_str());
        let submit_loc = Locator::new(self.kind, login.submit_selector.as_str());

        let user_field = browser
            .wait_for_visible(&user_loc, LOGIN_FIELD_WAIT)
            .await
            .map_err(|e| form_error(&login.username_selector, e))?;
        let pass_field = browser
            .wait_for_visible(&pass_loc, LOGIN_FIELD_WAIT)
            .await
            .map_err(|e| form_error(&login.password_selector, e))?;
        let submit = browser
            .wait_for_clickable(&submit_loc, LOGIN_FIELD_WAIT)
            .await
            .map_err(|e| form_error(&login.submit_selector, e))?;

        debug!("Entering login credentials");
        browser
            .fill(&user_field, &login.username)
            .await
            .map_err(|e| form_error(&login.username_selector, e))?;
        browser
            .fill(&pass_field, &login.password)
            .await
            .map_err(|e| form_error(&login.password_selector, e))?;
        browser
            .script_click(&submit)
            .await
            .map_err(|e| form_error(&login.submit_selector, e))?;

        debug!("Waiting {}s after submitting login form", login.wait_after_login);
        if login.wait_after_login > 0.0 {
            sleep(Duration::from_secs_f64(login.wait_after_login)).await;
        }

        let mut verified = false;
        if let Some(success) = &login.success_selector {
            let loc = Locator::new(self.kind, success.as_str());
            match browser.wait_for_visible(&loc, LOGIN_VERIFY_WAIT).await {
                Ok(_) => {
                    info!("Login successful (success selector found)");
                    verified = true;
                }
                Err(_) => warn!("Login verification failed: success selector '{}' not found", success),
            }
        }

        let current_url = browser.current_url().await.unwrap_or_default();
        if !verified {
            if let Some(fragment) = &login.success_url_contains {
                if current_url.contains(fragment.as_str()) {
                    info!("Login successful (URL '{}' contains '{}')", current_url, fragment);
                    verified = true;
                } else {
                    warn!("Login verification failed: URL '{}' doesn't contain '{}'", current_url, fragment);
                }
            }
        }

        if !verified {
            return Err(LoginError::Unverified { current_url });
        }
        self.landing_url = Some(current_url);
        Ok(())
    }

    /// Load `target` unless the browser is already there, then apply the post-load wait
    pub async fn acquire(&mut self, target: &str, fetch: &mut FetchClient, stats: &mut RunStats) -> Option<Content> {
        if !fetch.robots_allows(target, stats).await {
            return None;
        }
        let browser = match self.browser() {
            Ok(browser) => browser,
            Err(e) => {
                warn!("Cannot load {}: {}", target, e);
                return None;
            }
        };

        let current = browser.current_url().await.ok();
        if current.as_deref() != Some(target) {
            fetch.throttle().await;
            if let Err(e) = browser.navigate(target).await {
                warn!("Failed to load {}: {}", target, e);
                stats.pages_failed += 1;
                return None;
            }
        }

        self.wait_for_page_load(target).await;
        stats.pages_scraped += 1;
        Some(Content::Live {
            url: target.to_string(),
        })
    }

    async fn wait_for_page_load(&self, url: &str) {
        let Ok(browser) = self.browser() else {
            return;
        };
        let wait = Duration::from_secs_f64(self.settings.wait_time.max(0.0));

        match &self.settings.wait_for_selector {
            Some(selector) => {
                let loc = Locator::new(self.kind, selector.as_str());
                debug!("Waiting up to {:?} for {} to be visible", wait, loc);
                if browser.wait_for_visible(&loc, wait).await.is_err() {
                    warn!("Timed out after {:?} waiting for {} on {}", wait, loc, url);
                }
            }
            None if !wait.is_zero() => {
                debug!("Applying general wait of {:?}", wait);
                sleep(wait).await;
            }
            None => {}
        }
    }

    /// Records from the live DOM of the current page
    pub async fn extract(&self, url: &str) -> Result<Vec<Record>, ExtractionError> {
        let browser = self.browser()?;

        let scope = match &self.container {
            Some(container) => match browser.wait_for_present(container, CONTAINER_WAIT).await {
                Ok(element) => Some(element),
                Err(e) => {
                    warn!("Container {} not found ({}), searching page root", container, e);
                    None
                }
            },
            None => None,
        };

        let items = match &scope {
            Some(scope) => browser.find_within(scope, &self.item).await?,
            None => {
                if let Err(e) = browser.wait_for_present(&self.item, CONTAINER_WAIT).await {
                    warn!("Timed out waiting for items matching {}: {}", self.item, e);
                    return Ok(Vec::new());
                }
                browser.find_all(&self.item).await?
            }
        };
        debug!("Found {} potential item elements", items.len());

        let mut records = Vec::new();
        for (i, item) in items.iter().enumerate() {
            let mut record = Record::new();
            for field in &self.fields {
                let raw = match browser.find_within(item, &field.locator).await {
                    Ok(elements) => {
                        let mut raw = Vec::with_capacity(elements.len());
                        for element in &elements {
                            let value = match &field.attr {
                                Some(attr) => browser.attribute(element, attr).await,
                                None => browser.text(element).await.map(Some),
                            };
                            match value {
                                Ok(Some(v)) => raw.push(v),
                                Ok(None) => {}
                                Err(e) => debug!("Field '{}' unreadable in item {}: {}", field.name, i + 1, e),
                            }
                        }
                        raw
                    }
                    Err(e) => {
                        debug!("Field '{}' selector {} failed in item {}: {}", field.name, field.locator, i + 1, e);
                        Vec::new()
                    }
                };
                record.insert(field.name.clone(), field_value(raw, field.attr.as_deref(), url));
            }

            if has_any_value(&record) {
                records.push(record);
            } else {
                debug!("Skipping item {} as all fields evaluated to None", i + 1);
            }
        }

        if !records.is_empty() {
            info!("Extracted {} non-empty items from {}", records.len(), url);
        } else if !items.is_empty() {
            warn!("Found {} item elements, but all extracted items were empty on {}", items.len(), url);
        }
        Ok(records)
    }

    /// Click the next-page control and report the URL it leads to.
    ///
    /// Pagination ends when the control is missing, disabled, or the URL
    /// does not change within the timeout. Same-URL content updates are
    /// indistinguishable from the last page.
    pub async fn next_target(&mut self, url: &str) -> Option<String> {
        let locator = self.next_page.as_ref()?;
        let browser = self.browser().ok()?;

        let control = match browser.wait_for_clickable(locator, NEXT_CONTROL_WAIT).await {
            Ok(control) => control,
            Err(_) => {
                info!("Next page element {} not found or not clickable", locator);
                return None;
            }
        };

        let disabled = browser.attribute(&control, "disabled").await.ok().flatten().is_some();
        let class = browser
            .attribute(&control, "class")
            .await
            .ok()
            .flatten()
            .unwrap_or_default()
            .to_lowercase();
        let inert = class.split_whitespace().any(|token| token == "disabled" || token == "inactive");
        if disabled || inert {
            info!("Next page element {} appears disabled. Assuming last page.", locator);
            return None;
        }

        info!("Found clickable next page element. Clicking...");
        if let Err(e) = browser.script_click(&control).await {
            warn!("Clicking next page element {} failed: {}", locator, e);
            return None;
        }

        let deadline = Instant::now() + URL_CHANGE_WAIT;
        loop {
            match browser.current_url().await {
                Ok(current) if current != url => {
                    info!("Navigated to next page: {}", current);
                    self.wait_for_page_load(&current).await;
                    return Some(current);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Could not read the browser URL after clicking next: {}", e);
                    return None;
                }
            }
            if Instant::now() >= deadline {
                info!("URL did not change within {:?} after clicking next. Ending pagination.", URL_CHANGE_WAIT);
                return None;
            }
            sleep(URL_POLL).await;
        }
    }

    pub async fn close(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.quit().await {
                warn!("Error closing browser session: {}", e);
            }
        }
    }
}
