#[cfg(test)]
pub mod fake;
pub mod session;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::cli::config::SelectorKind;
use crate::error::BrowserError;

pub use session::{launch_with_retries, BrowserSession};

/// A selector plus the query language it is written in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub kind: SelectorKind,
    pub query: String,
}

impl Locator {
    pub fn new(kind: SelectorKind, query: impl Into<String>) -> Self {
        Self {
            kind,
            query: query.into(),
        }
    }

    pub fn css(query: impl Into<String>) -> Self {
        Self::new(SelectorKind::Css, query)
    }

    pub fn xpath(query: impl Into<String>) -> Self {
        Self::new(SelectorKind::Xpath, query)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SelectorKind::Css => write!(f, "css `{}`", self.query),
            SelectorKind::Xpath => write!(f, "xpath `{}`", self.query),
        }
    }
}

/// The browser surface the dynamic strategy drives
#[async_trait]
pub trait BrowserControl: Send + Sync {
    type Element: Send + Sync;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    async fn find_all(&self, locator: &Locator) -> Result<Vec<Self::Element>, BrowserError>;

    /// Matches of `locator` inside `scope`
    async fn find_within(
        &self,
        scope: &Self::Element,
        locator: &Locator,
    ) -> Result<Vec<Self::Element>, BrowserError>;

    /// First match once it is attached to the DOM
    async fn wait_for_present(&self, locator: &Locator, timeout: Duration) -> Result<Self::Element, BrowserError>;

    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> Result<Self::Element, BrowserError>;

    async fn wait_for_clickable(&self, locator: &Locator, timeout: Duration) -> Result<Self::Element, BrowserError>;

    async fn text(&self, element: &Self::Element) -> Result<String, BrowserError>;

    async fn attribute(&self, element: &Self::Element, name: &str) -> Result<Option<String>, BrowserError>;

    /// Clear the input then type `text`
    async fn fill(&self, element: &Self::Element, text: &str) -> Result<(), BrowserError>;

    /// Scroll into view and click through JavaScript, bypassing overlays
    async fn script_click(&self, element: &Self::Element) -> Result<(), BrowserError>;

    async fn quit(&mut self) -> Result<(), BrowserError>;
}
