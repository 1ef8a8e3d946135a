use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use thirtyfour::error::WebDriverError;
use thirtyfour::prelude::*;
use tracing::{debug, error, info, warn};

use super::{BrowserControl, Locator};
use crate::cli::config::{BrowserSettings, SelectorKind};
use crate::error::BrowserError;
use crate::proxy::{ProxyEntry, ProxyPool};
use crate::utils::RunStats;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Chrome session driven over WebDriver
pub struct BrowserSession {
    driver: Option<WebDriver>,
}

impl BrowserSession {
    /// Start Chrome through the WebDriver server at `settings.webdriver_url`
    pub async fn launch(
        settings: &BrowserSettings,
        user_agent: &str,
        proxy: Option<&ProxyEntry>,
    ) -> Result<Self, BrowserError> {
        let mut caps = DesiredCapabilities::chrome();
        let launch_err = |e: WebDriverError| launch_error(e.to_string(), proxy.is_some());

        if settings.headless {
            caps.set_headless().map_err(launch_err)?;
        }
        if settings.disable_images {
            caps.add_chrome_arg("--blink-settings=imagesEnabled=false")
                .map_err(launch_err)?;
        }
        if let Some(proxy) = proxy {
            let server = match proxy.scheme().as_deref() {
                Some(scheme) if scheme.starts_with("socks") => format!("{}://{}", scheme, proxy.key()),
                _ => proxy.key().to_string(),
            };
            info!("Launching browser with proxy: {}", server);
            caps.add_chrome_arg(&format!("--proxy-server={}", server))
                .map_err(launch_err)?;
        }

        caps.add_chrome_arg(&format!("--user-agent={}", user_agent))
            .map_err(launch_err)?;
        caps.add_chrome_arg("--disable-gpu").map_err(launch_err)?;
        caps.add_chrome_arg("--no-sandbox").map_err(launch_err)?;
        caps.add_chrome_arg("--disable-dev-shm-usage").map_err(launch_err)?;
        caps.add_chrome_option("excludeSwitches", json!(["enable-automation"]))
            .map_err(launch_err)?;
        caps.add_chrome_option("useAutomationExtension", json!(false))
            .map_err(launch_err)?;

        let driver = WebDriver::new(settings.webdriver_url.as_str(), caps)
            .await
            .map_err(launch_err)?;
        driver
            .set_page_load_timeout(Duration::from_secs(settings.page_load_timeout))
            .await
            .map_err(launch_err)?;

        debug!("Browser session initialized via {}", settings.webdriver_url);
        Ok(Self {
            driver: Some(driver),
        })
    }

    fn driver(&self) -> Result<&WebDriver, BrowserError> {
        self.driver.as_ref().ok_or(BrowserError::Closed)
    }
}

/// Launch a session, rotating away from proxies that break the launch
pub async fn launch_with_retries(
    settings: &BrowserSettings,
    user_agent: &str,
    proxies: &mut ProxyPool,
    max_retries: u32,
    stats: &mut RunStats,
) -> Result<BrowserSession, BrowserError> {
    let mut last_error = BrowserError::Closed;

    for attempt in 0..=max_retries {
        let proxy = proxies.next();
        match BrowserSession::launch(settings, user_agent, proxy.as_ref()).await {
            Ok(session) => return Ok(session),
            Err(BrowserError::Launch {
                message,
                proxy_related: true,
            }) => {
                warn!("Browser launch failed (attempt {}/{}): {}", attempt + 1, max_retries + 1, message);
                if let Some(proxy) = &proxy {
                    proxies.quarantine(proxy);
                    stats.proxy_failures += 1;
                }
                last_error = BrowserError::Launch {
                    message,
                    proxy_related: true,
                };
            }
            Err(e) => {
                error!("Browser launch failed: {}", e);
                return Err(e);
            }
        }
    }

    Err(last_error)
}

fn launch_error(message: String, via_proxy: bool) -> BrowserError {
    let lower = message.to_lowercase();
    let proxy_related = via_proxy
        && (lower.contains("proxy") || lower.contains("connection refused") || lower.contains("net::err"));
    BrowserError::Launch {
        message,
        proxy_related,
    }
}

fn by(locator: &Locator) -> By {
    match locator.kind {
        SelectorKind::Css => By::Css(locator.query.as_str()),
        SelectorKind::Xpath => By::XPath(locator.query.as_str()),
    }
}

fn driver_error(e: WebDriverError) -> BrowserError {
    BrowserError::Driver(e.to_string())
}

#[async_trait]
impl BrowserControl for BrowserSession {
    type Element = WebElement;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        debug!("Navigating to: {}", url);
        self.driver()?.goto(url).await.map_err(driver_error)
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        let url = self.driver()?.current_url().await.map_err(driver_error)?;
        Ok(url.to_string())
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<WebElement>, BrowserError> {
        self.driver()?.find_all(by(locator)).await.map_err(driver_error)
    }

    async fn find_within(&self, scope: &WebElement, locator: &Locator) -> Result<Vec<WebElement>, BrowserError> {
        scope.find_all(by(locator)).await.map_err(driver_error)
    }

    async fn wait_for_present(&self, locator: &Locator, timeout: Duration) -> Result<WebElement, BrowserError> {
        self.driver()?
            .query(by(locator))
            .wait(timeout, POLL_INTERVAL)
            .first()
            .await
            .map_err(|_| BrowserError::Timeout(format!("{} not present", locator)))
    }

    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> Result<WebElement, BrowserError> {
        self.driver()?
            .query(by(locator))
            .and_displayed()
            .wait(timeout, POLL_INTERVAL)
            .first()
            .await
            .map_err(|_| BrowserError::Timeout(format!("{} not visible", locator)))
    }

    async fn wait_for_clickable(&self, locator: &Locator, timeout: Duration) -> Result<WebElement, BrowserError> {
        self.driver()?
            .query(by(locator))
            .and_clickable()
            .wait(timeout, POLL_INTERVAL)
            .first()
            .await
            .map_err(|_| BrowserError::Timeout(format!("{} not clickable", locator)))
    }

    async fn text(&self, element: &WebElement) -> Result<String, BrowserError> {
        element.text().await.map_err(driver_error)
    }

    async fn attribute(&self, element: &WebElement, name: &str) -> Result<Option<String>, BrowserError> {
        element.attr(name).await.map_err(driver_error)
    }

    async fn fill(&self, element: &WebElement, text: &str) -> Result<(), BrowserError> {
        element.clear().await.map_err(driver_error)?;
        element.send_keys(text).await.map_err(driver_error)
    }

    async fn script_click(&self, element: &WebElement) -> Result<(), BrowserError> {
        let driver = self.driver()?;
        let arg = element.to_json().map_err(driver_error)?;
        driver
            .execute("arguments[0].scrollIntoView(true);", vec![arg.clone()])
            .await
            .map_err(driver_error)?;
        tokio::time::sleep(Duration::from_millis(300)).await;
        driver
            .execute("arguments[0].click();", vec![arg])
            .await
            .map_err(driver_error)?;
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), BrowserError> {
        if let Some(driver) = self.driver.take() {
            info!("Closing browser session");
            driver.quit().await.map_err(driver_error)?;
        }
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            tokio::spawn(async move {
                if let Err(e) = driver.quit().await {
                    error!("Error closing browser session during drop: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_related_launch_errors() {
        let err = launch_error("unknown error: net::ERR_PROXY_CONNECTION_FAILED".to_string(), true);
        assert!(matches!(err, BrowserError::Launch { proxy_related: true, .. }));

        // Without a proxy the same message cannot blame one
        let err = launch_error("net::ERR_PROXY_CONNECTION_FAILED".to_string(), false);
        assert!(matches!(err, BrowserError::Launch { proxy_related: false, .. }));

        let err = launch_error("session not created: chrome not found".to_string(), true);
        assert!(matches!(err, BrowserError::Launch { proxy_related: false, .. }));
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::css("div.item").to_string(), "css `div.item`");
        assert_eq!(Locator::xpath("//a").to_string(), "xpath `//a`");
    }
}
