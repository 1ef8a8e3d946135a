pub mod api;
pub mod dynamic;
pub mod html;
pub mod xpath;

use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

use crate::browser::BrowserControl;
use crate::error::LoginError;
use crate::fetch::FetchClient;
use crate::utils::RunStats;

pub use api::ApiJson;
pub use dynamic::DynamicBrowser;
pub use html::StaticHtml;

/// One extracted item: field name to untyped value, in configuration order
pub type Record = Map<String, Value>;

/// What a strategy acquired for one target
#[derive(Debug, Clone)]
pub enum Content {
    /// Markup fetched over HTTP
    Html {
        url: String,
        final_url: String,
        body: String,
    },
    /// The page currently loaded in the browser
    Live { url: String },
    /// A decoded API response
    Json { url: String, value: Value },
}

impl Content {
    pub fn url(&self) -> &str {
        match self {
            Self::Html { url, .. } | Self::Live { url } | Self::Json { url, .. } => url,
        }
    }
}

/// The three extraction strategies, dispatched by the job runner
pub enum Strategy<B: BrowserControl> {
    Static(StaticHtml),
    Dynamic(DynamicBrowser<B>),
    Api(ApiJson),
}

impl<B: BrowserControl> Strategy<B> {
    /// One-time setup before the first target; runs the login flow for browser jobs
    pub async fn prepare(&mut self, fetch: &mut FetchClient) -> Result<(), LoginError> {
        match self {
            Self::Dynamic(dynamic) => dynamic.login(fetch).await,
            Self::Static(_) | Self::Api(_) => Ok(()),
        }
    }

    /// Initial targets, in order
    pub async fn seeds(&self) -> Vec<String> {
        match self {
            Self::Static(s) => s.seeds().to_vec(),
            Self::Dynamic(d) => d.seeds().await,
            Self::Api(a) => a.targets(),
        }
    }

    /// Whether `next_target` can ever produce anything
    pub fn paginates(&self) -> bool {
        match self {
            Self::Static(s) => s.paginates(),
            Self::Dynamic(d) => d.paginates(),
            Self::Api(_) => false,
        }
    }

    pub async fn acquire(
        &mut self,
        target: &str,
        fetch: &mut FetchClient,
        stats: &mut RunStats,
    ) -> Option<Content> {
        match self {
            Self::Static(s) => s.acquire(target, fetch, stats).await,
            Self::Dynamic(d) => d.acquire(target, fetch, stats).await,
            Self::Api(a) => a.acquire(target, fetch, stats).await,
        }
    }

    pub async fn extract(&self, content: &Content) -> Vec<Record> {
        let result = match (self, content) {
            (Self::Static(s), Content::Html { final_url, body, .. }) => Ok(s.extract(body, final_url)),
            (Self::Dynamic(d), Content::Live { url }) => d.extract(url).await,
            (Self::Api(a), Content::Json { url, value }) => a.extract(value, url),
            _ => Ok(Vec::new()),
        };

        result.unwrap_or_else(|e| {
            warn!("Extraction failed for {}: {}", content.url(), e);
            Vec::new()
        })
    }

    pub async fn next_target(&mut self, content: &Content) -> Option<String> {
        match (self, content) {
            (Self::Static(s), Content::Html { url, final_url, body }) => s.next_target(body, url, final_url),
            (Self::Dynamic(d), Content::Live { url }) => d.next_target(url).await,
            _ => None,
        }
    }

    /// Release the browser, if any
    pub async fn finish(&mut self) {
        if let Self::Dynamic(d) = self {
            d.close().await;
        }
    }
}

/// Turn the raw matches for one field into its record value.
///
/// Values are trimmed and empty ones discarded. Attribute values join with
/// `", "`, text with `" "`. `href`/`src` values are resolved against `base_url`.
pub(crate) fn field_value(raw: Vec<String>, attr: Option<&str>, base_url: &str) -> Value {
    let parts: Vec<String> = raw
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect();
    if parts.is_empty() {
        return Value::Null;
    }

    match attr {
        Some(name @ ("href" | "src")) => {
            let resolved: Vec<String> = parts.iter().map(|p| resolve_link(base_url, p, name)).collect();
            Value::String(resolved.join(", "))
        }
        Some(_) => Value::String(parts.join(", ")),
        None => Value::String(parts.join(" ")),
    }
}

/// Absolute form of a link found on `base_url`
pub(crate) fn resolve_link(base_url: &str, link: &str, attr: &str) -> String {
    if ["http://", "https://", "//", "data:"].iter().any(|p| link.starts_with(p)) {
        return link.to_string();
    }
    match Url::parse(base_url).and_then(|base| base.join(link)) {
        Ok(resolved) => resolved.to_string(),
        Err(e) => {
            warn!("Could not resolve relative {} '{}' against '{}': {}", attr, link, base_url, e);
            link.to_string()
        }
    }
}

/// False when every field came back empty
pub(crate) fn has_any_value(record: &Record) -> bool {
    record.values().any(|v| !v.is_null())
}
