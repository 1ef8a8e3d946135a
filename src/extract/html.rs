use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use super::xpath::{XNode, XPath, XPathDocument, XValue};
use super::{field_value, has_any_value, resolve_link, Content, Record};
use crate::cli::config::{PaginationSettings, SelectorKind, SelectorSettings};
use crate::error::ConfigError;
use crate::fetch::FetchClient;
use crate::utils::RunStats;

struct FieldRule<Q> {
    name: String,
    query: Q,
    attr: Option<String>,
}

struct Compiled<Q> {
    container: Option<Q>,
    item: Q,
    fields: Vec<FieldRule<Q>>,
    next_page: Option<Q>,
}

enum Queries {
    Css(Compiled<Selector>),
    Xpath(Compiled<XPath>),
}

fn compile_css(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::Selector {
        selector: selector.to_string(),
        reason: format!("{:?}", e),
    })
}

fn compile_xpath(selector: &str) -> Result<XPath, ConfigError> {
    XPath::parse(selector).map_err(|e| ConfigError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn compile_all<Q>(
    selectors: &SelectorSettings,
    pagination: Option<&PaginationSettings>,
    compile: impl Fn(&str) -> Result<Q, ConfigError>,
) -> Result<Compiled<Q>, ConfigError> {
    let fields = selectors
        .fields
        .iter()
        .map(|(name, field)| {
            Ok(FieldRule {
                name: name.clone(),
                query: compile(field.selector())?,
                attr: field.attribute().map(str::to_string),
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(Compiled {
        container: selectors.container.as_deref().map(&compile).transpose()?,
        item: compile(&selectors.item)?,
        fields,
        next_page: pagination.map(|p| compile(&p.next_page_selector)).transpose()?,
    })
}

/// Static pages fetched over HTTP and parsed with CSS selectors or XPath
pub struct StaticHtml {
    urls: Vec<String>,
    queries: Queries,
}

impl StaticHtml {
    /// Compile every selector up front; a bad one is a configuration error
    pub fn new(
        urls: Vec<String>,
        selectors: &SelectorSettings,
        pagination: Option<&PaginationSettings>,
    ) -> Result<Self, ConfigError> {
        let queries = match selectors.kind {
            SelectorKind::Css => Queries::Css(compile_all(selectors, pagination, compile_css)?),
            SelectorKind::Xpath => Queries::Xpath(compile_all(selectors, pagination, compile_xpath)?),
        };
        Ok(Self { urls, queries })
    }

    pub fn seeds(&self) -> &[String] {
        &self.urls
    }

    pub fn paginates(&self) -> bool {
        match &self.queries {
            Queries::Css(c) => c.next_page.is_some(),
            Queries::Xpath(c) => c.next_page.is_some(),
        }
    }

    pub async fn acquire(&self, target: &str, fetch: &mut FetchClient, stats: &mut RunStats) -> Option<Content> {
        let max_retries = fetch.max_retries();
        match fetch.fetch_page(target, &[], max_retries, stats).await {
            Ok(page) => Some(Content::Html {
                url: target.to_string(),
                final_url: page.final_url,
                body: page.body,
            }),
            Err(e) => {
                debug!("No content for {}: {}", target, e);
                None
            }
        }
    }

    /// Records found in `body`; items with no non-empty field are dropped
    pub fn extract(&self, body: &str, page_url: &str) -> Vec<Record> {
        if body.trim().is_empty() {
            return Vec::new();
        }
        let document = Html::parse_document(body);

        let (found, records) = match &self.queries {
            Queries::Css(c) => extract_css(c, &document, page_url),
            Queries::Xpath(c) => extract_xpath(c, &document, page_url),
        };

        if found == 0 {
            warn!("No items found using the item selector on page {}", page_url);
        } else {
            info!("Extracted {} non-empty items from {} ({} candidates)", records.len(), page_url, found);
        }
        records
    }

    /// URL behind the next-page selector, unless missing or pointing back at this page
    pub fn next_target(&self, body: &str, url: &str, final_url: &str) -> Option<String> {
        let document = Html::parse_document(body);

        let link = match &self.queries {
            Queries::Css(c) => {
                let selector = c.next_page.as_ref()?;
                document
                    .select(selector)
                    .next()
                    .and_then(|el| el.value().attr("href"))
                    .map(str::to_string)
            }
            Queries::Xpath(c) => {
                let xpath = c.next_page.as_ref()?;
                let doc = XPathDocument::new(&document);
                match doc.evaluate(xpath, doc.root()) {
                    XValue::Nodes(nodes) => nodes.first().and_then(|node| match node {
                        XNode::Attr { value, .. } => Some(value.to_string()),
                        XNode::Node(_) => node
                            .element()
                            .and_then(|el| el.value().attr("href"))
                            .map(str::to_string),
                    }),
                    other => Some(other.to_text()),
                }
            }
        };

        let link = link.map(|l| l.trim().to_string()).filter(|l| !l.is_empty());
        let Some(link) = link else {
            debug!("Next page selector did not find a link on {}", url);
            return None;
        };

        let next = resolve_link(final_url, &link, "href");
        if same_page(&next, url) || same_page(&next, final_url) {
            warn!("Next page link points back to the current URL '{}'. Stopping pagination.", url);
            return None;
        }
        debug!("Found next page link: {}", next);
        Some(next)
    }
}

fn same_page(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(mut a), Ok(mut b)) => {
            a.set_fragment(None);
            b.set_fragment(None);
            a == b
        }
        _ => a == b,
    }
}

fn extract_css(c: &Compiled<Selector>, document: &Html, page_url: &str) -> (usize, Vec<Record>) {
    let root = document.root_element();
    let scope = match &c.container {
        Some(container) => document.select(container).next().unwrap_or_else(|| {
            warn!("Container selector not found on {}, searching whole page", page_url);
            root
        }),
        None => root,
    };

    let items: Vec<ElementRef<'_>> = scope.select(&c.item).collect();
    let records = items
        .iter()
        .filter_map(|item| {
            let mut record = Record::new();
            for field in &c.fields {
                let raw: Vec<String> = item
                    .select(&field.query)
                    .filter_map(|el| match &field.attr {
                        Some(attr) => el.value().attr(attr).map(str::to_string),
                        None => Some(el.text().collect::<String>()),
                    })
                    .collect();
                record.insert(field.name.clone(), field_value(raw, field.attr.as_deref(), page_url));
            }
            has_any_value(&record).then_some(record)
        })
        .collect();

    (items.len(), records)
}

fn extract_xpath(c: &Compiled<XPath>, document: &Html, page_url: &str) -> (usize, Vec<Record>) {
    let doc = XPathDocument::new(document);
    let root = doc.root();
    let scope = match &c.container {
        Some(container) => doc.select(container, root).first().copied().unwrap_or_else(|| {
            warn!("Container expression not found on {}, searching whole page", page_url);
            root
        }),
        None => root,
    };

    let items = doc.select(&c.item, scope);
    let records = items
        .iter()
        .filter_map(|item| {
            let mut record = Record::new();
            for field in &c.fields {
                let (raw, selected_attr) = match doc.evaluate(&field.query, *item) {
                    XValue::Nodes(nodes) => {
                        // `.//a/@href` picks the attribute inside the expression
                        let selected_attr = nodes.iter().find_map(|node| match node {
                            XNode::Attr { name, .. } => Some(*name),
                            XNode::Node(_) => None,
                        });
                        let raw = nodes
                            .iter()
                            .filter_map(|node| match (&field.attr, node.element()) {
                                (Some(attr), Some(el)) => el.value().attr(attr).map(str::to_string),
                                (Some(_), None) | (None, _) => Some(node.string_value()),
                            })
                            .collect();
                        (raw, selected_attr)
                    }
                    scalar => (vec![scalar.to_text()], None),
                };
                let attr = field.attr.as_deref().or(selected_attr);
                record.insert(field.name.clone(), field_value(raw, attr, page_url));
            }
            has_any_value(&record).then_some(record)
        })
        .collect();

    (items.len(), records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::config::FieldSelector;
    use indexmap::IndexMap;
    use serde_json::Value;

    const QUOTES: &str = r#"
        <html><body>
          <div class="col">
            <div class="quote"><span class="text">“To be.”</span>
              <small class="author">Shakespeare</small>
              <a href="/author/Shakespeare">about</a>
              <div class="tags"><a class="tag">life</a> <a class="tag">being</a></div>
            </div>
            <div class="quote"><span class="text">“Stay hungry.”</span>
              <a href="/author/Jobs">about</a>
            </div>
            <div class="quote"><span class="text">“Hello.”</span>
              <small class="author">Anon</small>
            </div>
            <div class="quote"></div>
          </div>
          <nav><li class="next"><a href="/page/2/">Next →</a></li></nav>
        </body></html>
    "#;

    fn css_settings() -> SelectorSettings {
        let mut fields = IndexMap::new();
        fields.insert("text".to_string(), FieldSelector::Text("span.text".to_string()));
        fields.insert("author".to_string(), FieldSelector::Text("small.author".to_string()));
        fields.insert(
            "link".to_string(),
            FieldSelector::Detailed {
                selector: "a[href]".to_string(),
                attr: Some("href".to_string()),
            },
        );
        fields.insert("tags".to_string(), FieldSelector::Text("a.tag".to_string()));
        SelectorSettings {
            kind: SelectorKind::Css,
            container: Some("div.col".to_string()),
            item: "div.quote".to_string(),
            fields,
        }
    }

    fn pagination(selector: &str) -> PaginationSettings {
        PaginationSettings {
            next_page_selector: selector.to_string(),
            max_pages: None,
        }
    }

    #[test]
    fn test_css_extraction_keeps_partial_items() {
        let html = StaticHtml::new(vec![], &css_settings(), None).unwrap();
        let records = html.extract(QUOTES, "https://quotes.toscrape.com/");

        // The empty fourth quote is dropped
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["text"], "“To be.”");
        assert_eq!(records[0]["author"], "Shakespeare");
        assert_eq!(records[0]["link"], "https://quotes.toscrape.com/author/Shakespeare");
        assert_eq!(records[0]["tags"], "life being");
        assert_eq!(records[1]["author"], Value::Null);
        assert_eq!(records[2]["link"], Value::Null);

        let keys: Vec<&String> = records[0].keys().collect();
        assert_eq!(keys, vec!["text", "author", "link", "tags"]);
    }

    #[test]
    fn test_xpath_extraction() {
        let mut fields = IndexMap::new();
        fields.insert("text".to_string(), FieldSelector::Text(".//span[@class='text']".to_string()));
        fields.insert("link".to_string(), FieldSelector::Text(".//a/@href".to_string()));
        fields.insert(
            "author".to_string(),
            FieldSelector::Detailed {
                selector: ".//small".to_string(),
                attr: None,
            },
        );
        let settings = SelectorSettings {
            kind: SelectorKind::Xpath,
            container: None,
            item: "//div[@class='quote']".to_string(),
            fields,
        };

        let html = StaticHtml::new(vec![], &settings, None).unwrap();
        let records = html.extract(QUOTES, "https://quotes.toscrape.com/");
        assert_eq!(records.len(), 3);
        assert_eq!(records[1]["text"], "“Stay hungry.”");
        assert_eq!(records[1]["link"], "https://quotes.toscrape.com/author/Jobs");
        assert_eq!(records[2]["author"], "Anon");
    }

    #[test]
    fn test_xpath_attribute_steps_resolve_links() {
        let mut fields = IndexMap::new();
        fields.insert("link".to_string(), FieldSelector::Text(".//a/@href".to_string()));
        fields.insert("img".to_string(), FieldSelector::Text(".//img/@src".to_string()));
        fields.insert("lang".to_string(), FieldSelector::Text(".//a/@hreflang".to_string()));
        let settings = SelectorSettings {
            kind: SelectorKind::Xpath,
            container: None,
            item: "//div[@class='q']".to_string(),
            fields,
        };
        let page = r#"<div class="q"><a href="/author/Jobs" hreflang="en">Jobs</a><img src="img/a.png"></div>"#;

        let html = StaticHtml::new(vec![], &settings, None).unwrap();
        let records = html.extract(page, "https://quotes.toscrape.com/page/2/");
        assert_eq!(records[0]["link"], "https://quotes.toscrape.com/author/Jobs");
        assert_eq!(records[0]["img"], "https://quotes.toscrape.com/page/2/img/a.png");
        assert_eq!(records[0]["lang"], "en");
    }

    #[test]
    fn test_next_target_resolves_relative_link() {
        let html = StaticHtml::new(vec![], &css_settings(), Some(&pagination("li.next a"))).unwrap();
        assert!(html.paginates());
        let next = html.next_target(QUOTES, "https://quotes.toscrape.com/", "https://quotes.toscrape.com/");
        assert_eq!(next.as_deref(), Some("https://quotes.toscrape.com/page/2/"));
    }

    #[test]
    fn test_next_target_stops_on_self_link_and_missing_control() {
        let html = StaticHtml::new(vec![], &css_settings(), Some(&pagination("li.next a"))).unwrap();
        let current = "https://quotes.toscrape.com/page/2/";
        assert!(html.next_target(QUOTES, current, current).is_none());

        let last_page = "<html><body><div class='quote'>x</div></body></html>";
        assert!(html.next_target(last_page, "https://quotes.toscrape.com/page/9/", "https://quotes.toscrape.com/page/9/").is_none());
    }

    #[test]
    fn test_xpath_next_page_attribute() {
        let mut settings = css_settings();
        settings.kind = SelectorKind::Xpath;
        settings.container = None;
        settings.item = "//div[@class='quote']".to_string();
        settings.fields = IndexMap::from([("text".to_string(), FieldSelector::Text(".//span".to_string()))]);

        let html = StaticHtml::new(vec![], &settings, Some(&pagination("//li[@class='next']/a/@href"))).unwrap();
        let next = html.next_target(QUOTES, "https://quotes.toscrape.com/", "https://quotes.toscrape.com/");
        assert_eq!(next.as_deref(), Some("https://quotes.toscrape.com/page/2/"));
    }

    #[test]
    fn test_invalid_selector_is_config_error() {
        let mut settings = css_settings();
        settings.item = "div[[".to_string();
        assert!(matches!(
            StaticHtml::new(vec![], &settings, None),
            Err(ConfigError::Selector { .. })
        ));

        settings.kind = SelectorKind::Xpath;
        settings.item = "//div[".to_string();
        assert!(matches!(
            StaticHtml::new(vec![], &settings, None),
            Err(ConfigError::Selector { .. })
        ));
    }
}
