//! Scripted in-memory browser for driving the dynamic strategy in tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{BrowserControl, Locator};
use crate::error::BrowserError;

/// Element tree keyed by selector text
#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    text: String,
    attrs: HashMap<String, String>,
    children: HashMap<String, Vec<FakeElement>>,
    navigates_to: Option<String>,
}

impl FakeElement {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn child(mut self, query: &str, element: FakeElement) -> Self {
        self.children.entry(query.to_string()).or_default().push(element);
        self
    }

    /// Clicking this element moves the browser to `url`
    pub fn navigates_to(mut self, url: &str) -> Self {
        self.navigates_to = Some(url.to_string());
        self
    }
}

#[derive(Default)]
struct State {
    pages: HashMap<String, HashMap<String, Vec<FakeElement>>>,
    current: String,
    navigations: usize,
    clicks: usize,
    filled: Vec<(String, String)>,
    quit: bool,
}

#[derive(Clone)]
pub struct FakeBrowser {
    state: Arc<Mutex<State>>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        let state = State {
            current: "about:blank".to_string(),
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Register the elements reachable from the document root of `url`
    pub fn page(&self, url: &str, elements: Vec<(&str, Vec<FakeElement>)>) {
        let elements = elements
            .into_iter()
            .map(|(query, found)| (query.to_string(), found))
            .collect();
        self.state.lock().unwrap().pages.insert(url.to_string(), elements);
    }

    pub fn navigations(&self) -> usize {
        self.state.lock().unwrap().navigations
    }

    pub fn clicks(&self) -> usize {
        self.state.lock().unwrap().clicks
    }

    /// `(name attribute, typed text)` for every filled input
    pub fn filled(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().filled.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().quit
    }

    fn lookup(&self, locator: &Locator) -> Vec<FakeElement> {
        let state = self.state.lock().unwrap();
        state
            .pages
            .get(&state.current)
            .and_then(|page| page.get(&locator.query))
            .cloned()
            .unwrap_or_default()
    }

    fn first(&self, locator: &Locator) -> Result<FakeElement, BrowserError> {
        self.lookup(locator)
            .into_iter()
            .next()
            .ok_or_else(|| BrowserError::Timeout(format!("{} not found", locator)))
    }
}

#[async_trait]
impl BrowserControl for FakeBrowser {
    type Element = FakeElement;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let mut state = self.state.lock().unwrap();
        state.navigations += 1;
        state.current = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.state.lock().unwrap().current.clone())
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<FakeElement>, BrowserError> {
        Ok(self.lookup(locator))
    }

    async fn find_within(&self, scope: &FakeElement, locator: &Locator) -> Result<Vec<FakeElement>, BrowserError> {
        Ok(scope.children.get(&locator.query).cloned().unwrap_or_default())
    }

    async fn wait_for_present(&self, locator: &Locator, _timeout: Duration) -> Result<FakeElement, BrowserError> {
        self.first(locator)
    }

    async fn wait_for_visible(&self, locator: &Locator, _timeout: Duration) -> Result<FakeElement, BrowserError> {
        self.first(locator)
    }

    async fn wait_for_clickable(&self, locator: &Locator, _timeout: Duration) -> Result<FakeElement, BrowserError> {
        self.first(locator)
    }

    async fn text(&self, element: &FakeElement) -> Result<String, BrowserError> {
        Ok(element.text.clone())
    }

    async fn attribute(&self, element: &FakeElement, name: &str) -> Result<Option<String>, BrowserError> {
        Ok(element.attrs.get(name).cloned())
    }

    async fn fill(&self, element: &FakeElement, text: &str) -> Result<(), BrowserError> {
        let name = element.attrs.get("name").cloned().unwrap_or_default();
        self.state.lock().unwrap().filled.push((name, text.to_string()));
        Ok(())
    }

    async fn script_click(&self, element: &FakeElement) -> Result<(), BrowserError> {
        let mut state = self.state.lock().unwrap();
        state.clicks += 1;
        if let Some(url) = &element.navigates_to {
            state.current = url.clone();
        }
        Ok(())
    }

    async fn quit(&mut self) -> Result<(), BrowserError> {
        self.state.lock().unwrap().quit = true;
        Ok(())
    }
}
