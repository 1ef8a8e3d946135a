use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::ConfigError;

/// Main job description
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct JobConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Explicit job kind; inferred from `api_config` when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<JobKind>,

    #[serde(default)]
    pub urls: Vec<String>,

    /// Render pages in a real browser instead of plain HTTP
    #[serde(default)]
    pub dynamic: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<SelectorSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationSettings>,

    #[serde(default)]
    pub browser: BrowserSettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_config: Option<LoginSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_config: Option<ApiSettings>,

    /// Minimum delay between requests in seconds
    #[serde(default = "default_request_delay")]
    pub request_delay: f64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    #[serde(default = "default_true")]
    pub respect_robots: bool,

    #[serde(default)]
    pub proxies: Vec<ProxySettings>,

    #[serde(default)]
    pub processing_rules: ProcessingRules,

    #[serde(default)]
    pub output_format: OutputFormat,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Web,
    Api,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    /// CSS selectors
    #[default]
    Css,
    /// XPath expressions
    Xpath,
}

/// Item and field selectors for web jobs
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SelectorSettings {
    #[serde(default, rename = "type")]
    pub kind: SelectorKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,

    pub item: String,

    pub fields: IndexMap<String, FieldSelector>,
}

/// Either a bare selector (text extraction) or a selector plus attribute name
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum FieldSelector {
    Text(String),
    Detailed {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attr: Option<String>,
    },
}

impl FieldSelector {
    pub fn selector(&self) -> &str {
        match self {
            Self::Text(selector) => selector,
            Self::Detailed { selector, .. } => selector,
        }
    }

    pub fn attribute(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::Detailed { attr, .. } => attr.as_deref(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaginationSettings {
    pub next_page_selector: String,

    /// Maximum number of pages fetched over the whole run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,
}

/// Browser options for dynamic jobs
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BrowserSettings {
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_true")]
    pub disable_images: bool,

    /// Page load timeout in seconds
    #[serde(default = "default_page_load_timeout")]
    pub page_load_timeout: u64,

    /// Selector that signals the page is ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<String>,

    /// Seconds to wait for `wait_for_selector`, or to sleep when it is absent
    #[serde(default = "default_wait_time")]
    pub wait_time: f64,

    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            disable_images: true,
            page_load_timeout: default_page_load_timeout(),
            wait_for_selector: None,
            wait_time: default_wait_time(),
            webdriver_url: default_webdriver_url(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoginSettings {
    pub login_url: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    pub username: String,
    pub password: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_selector: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_url_contains: Option<String>,

    /// Seconds to let the page settle after submitting
    #[serde(default = "default_wait_after_login")]
    pub wait_after_login: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiSettings {
    pub base_url: String,

    #[serde(default)]
    pub endpoints: Vec<String>,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_path: Option<String>,

    /// Output field -> source path
    #[serde(default)]
    pub field_mappings: IndexMap<String, String>,

    #[serde(default)]
    pub params: IndexMap<String, String>,

    #[serde(default)]
    pub headers: IndexMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Proxy entry as written in the job file
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<String>,
}

/// Post-extraction rules, applied in a fixed stage order
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ProcessingRules {
    #[serde(default)]
    pub field_types: IndexMap<String, FieldType>,

    #[serde(default)]
    pub text_cleaning: IndexMap<String, CleaningRules>,

    #[serde(default)]
    pub transformations: IndexMap<String, String>,

    #[serde(default)]
    pub validations: IndexMap<String, ValidationRules>,

    #[serde(default)]
    pub drop_fields: Vec<String>,
}

impl ProcessingRules {
    pub fn is_empty(&self) -> bool {
        self.field_types.is_empty()
            && self.text_cleaning.is_empty()
            && self.transformations.is_empty()
            && self.validations.is_empty()
            && self.drop_fields.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FieldType {
    #[serde(rename = "type")]
    pub target: TargetType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    String,
    Int,
    Float,
    Boolean,
    Datetime,
    Date,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CleaningRules {
    #[serde(default = "default_true")]
    pub trim: bool,

    #[serde(default)]
    pub lowercase: bool,

    #[serde(default)]
    pub uppercase: bool,

    #[serde(default = "default_true")]
    pub remove_newlines: bool,

    #[serde(default = "default_true")]
    pub remove_extra_spaces: bool,

    #[serde(default)]
    pub remove_special_chars: bool,

    /// Pattern -> replacement, applied in order
    #[serde(default)]
    pub regex_replace: IndexMap<String, String>,
}

impl Default for CleaningRules {
    fn default() -> Self {
        Self {
            trim: true,
            lowercase: false,
            uppercase: false,
            remove_newlines: true,
            remove_extra_spaces: true,
            remove_special_chars: false,
            regex_replace: IndexMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ValidationRules {
    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(ConfigError::invalid(
                "output_format",
                format!("unsupported format '{}'", other),
            )),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_request_delay() -> f64 {
    1.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    30
}

fn default_page_load_timeout() -> u64 {
    30
}

fn default_wait_time() -> f64 {
    5.0
}

fn default_wait_after_login() -> f64 {
    3.0
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_output_dir() -> String {
    "outputs".to_string()
}

impl JobConfig {
    /// Resolved job kind
    pub fn job_kind(&self) -> JobKind {
        match self.kind {
            Some(kind) => kind,
            None if self.api_config.is_some() => JobKind::Api,
            None => JobKind::Web,
        }
    }

    /// Page cap for web jobs; `None` means unlimited
    pub fn max_pages(&self) -> Option<usize> {
        self.pagination.as_ref().and_then(|p| p.max_pages)
    }

    /// Load a job description from a YAML file and validate it
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading job configuration from: {}", path.display());
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config = Self::from_yaml(&contents)?;
        info!("Job configuration loaded and validated: {}", path.display());
        Ok(config)
    }

    /// Parse and validate a YAML job description
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the job description as YAML
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        debug!("Saving job configuration to: {}", path.display());
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_yaml::to_string(self).context("Failed to serialize job configuration")?;
        fs::write(path, contents)
            .context(format!("Failed to write job configuration: {}", path.display()))?;
        Ok(())
    }

    /// Check the cross-field rules serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.request_delay.is_finite() || self.request_delay < 0.0 {
            return Err(ConfigError::invalid("request_delay", "must be zero or positive"));
        }
        if self.request_timeout == 0 {
            return Err(ConfigError::invalid("request_timeout", "must be at least one second"));
        }
        if let Some(pagination) = &self.pagination {
            if pagination.max_pages == Some(0) {
                return Err(ConfigError::invalid("pagination.max_pages", "must be at least 1"));
            }
            if pagination.next_page_selector.trim().is_empty() {
                return Err(ConfigError::Missing("pagination.next_page_selector"));
            }
        }

        match self.job_kind() {
            JobKind::Api => {
                let api = self.api_config.as_ref().ok_or(ConfigError::Missing("api_config"))?;
                if api.base_url.trim().is_empty() {
                    return Err(ConfigError::Missing("api_config.base_url"));
                }
                url::Url::parse(&api.base_url)
                    .map_err(|e| ConfigError::invalid("api_config.base_url", e.to_string()))?;
            }
            JobKind::Web => {
                let selectors = self.selectors.as_ref().ok_or(ConfigError::Missing("selectors"))?;
                if selectors.item.trim().is_empty() {
                    return Err(ConfigError::Missing("selectors.item"));
                }
                if selectors.fields.is_empty() {
                    return Err(ConfigError::Missing("selectors.fields"));
                }
                let starts_from_login = self.dynamic && self.login_config.is_some();
                if self.urls.is_empty() && !starts_from_login {
                    return Err(ConfigError::Missing("urls"));
                }
                for u in &self.urls {
                    url::Url::parse(u).map_err(|e| ConfigError::invalid("urls", format!("{}: {}", u, e)))?;
                }
                if let Some(login) = &self.login_config {
                    if !self.dynamic {
                        return Err(ConfigError::invalid("login_config", "login requires `dynamic: true`"));
                    }
                    login.validate()?;
                }
            }
        }

        for (field, rules) in &self.processing_rules.text_cleaning {
            if rules.lowercase && rules.uppercase {
                return Err(ConfigError::invalid(
                    format!("processing_rules.text_cleaning.{}", field),
                    "lowercase and uppercase are mutually exclusive",
                ));
            }
        }

        Ok(())
    }

    /// Sample job, written by the `sample` command
    pub fn sample() -> Self {
        let mut fields = IndexMap::new();
        fields.insert("quote_text".to_string(), FieldSelector::Text("span.text".to_string()));
        fields.insert("author".to_string(), FieldSelector::Text("small.author".to_string()));
        fields.insert(
            "author_url".to_string(),
            FieldSelector::Detailed {
                selector: "a[href*='/author/']".to_string(),
                attr: Some("href".to_string()),
            },
        );
        fields.insert("tags_raw".to_string(), FieldSelector::Text("div.tags a.tag".to_string()));

        let mut rules = ProcessingRules::default();
        let mut quote_cleaning = CleaningRules::default();
        quote_cleaning.regex_replace.insert("^[“”\"]".to_string(), String::new());
        quote_cleaning.regex_replace.insert("[“”\"]$".to_string(), String::new());
        rules.text_cleaning.insert("quote_text".to_string(), quote_cleaning);
        rules.text_cleaning.insert("author".to_string(), CleaningRules::default());
        rules.transformations.insert(
            "tags_raw".to_string(),
            "', '.join(value.split(' ')) if value else ''".to_string(),
        );
        rules.validations.insert(
            "quote_text".to_string(),
            ValidationRules {
                required: true,
                min_length: Some(5),
                ..Default::default()
            },
        );
        rules.validations.insert(
            "author".to_string(),
            ValidationRules {
                required: true,
                ..Default::default()
            },
        );

        Self {
            name: "Example Paged Scraper".to_string(),
            description: Some("Scrapes several pages of quotes.toscrape.com".to_string()),
            kind: Some(JobKind::Web),
            urls: vec!["https://quotes.toscrape.com/".to_string()],
            dynamic: false,
            selectors: Some(SelectorSettings {
                kind: SelectorKind::Css,
                container: None,
                item: "div.quote".to_string(),
                fields,
            }),
            pagination: Some(PaginationSettings {
                next_page_selector: "li.next a".to_string(),
                max_pages: Some(5),
            }),
            browser: BrowserSettings::default(),
            login_config: None,
            api_config: None,
            request_delay: 1.0,
            max_retries: 2,
            request_timeout: default_request_timeout(),
            user_agent: Some("Mozilla/5.0 (compatible; SmartScraperBot/1.0)".to_string()),
            respect_robots: true,
            proxies: Vec::new(),
            processing_rules: rules,
            output_format: OutputFormat::Json,
            output_dir: "outputs/example_paged".to_string(),
        }
    }
}

impl LoginSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("login_config.login_url", &self.login_url),
            ("login_config.username_selector", &self.username_selector),
            ("login_config.password_selector", &self.password_selector),
            ("login_config.submit_selector", &self.submit_selector),
            ("login_config.username", &self.username),
            ("login_config.password", &self.password),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }
        let has_selector = self.success_selector.as_deref().is_some_and(|s| !s.is_empty());
        let has_url = self.success_url_contains.as_deref().is_some_and(|s| !s.is_empty());
        if !has_selector && !has_url {
            return Err(ConfigError::Missing(
                "login_config.success_selector or login_config.success_url_contains",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATIC_JOB: &str = r#"
name: quotes
urls: ["https://quotes.toscrape.com/"]
selectors:
  item: div.quote
  fields:
    text: span.text
    link:
      selector: a
      attr: href
pagination:
  next_page_selector: li.next a
  max_pages: 3
processing_rules:
  text_cleaning:
    text:
      lowercase: true
      regex_replace:
        "a": "b"
        "b": "c"
"#;

    #[test]
    fn test_parse_static_job_with_defaults() {
        let config = JobConfig::from_yaml(STATIC_JOB).unwrap();
        assert_eq!(config.job_kind(), JobKind::Web);
        assert_eq!(config.request_delay, 1.0);
        assert_eq!(config.max_retries, 3);
        assert!(config.respect_robots);
        assert_eq!(config.max_pages(), Some(3));
        assert_eq!(config.output_format, OutputFormat::Json);

        let selectors = config.selectors.unwrap();
        assert_eq!(selectors.kind, SelectorKind::Css);
        let names: Vec<_> = selectors.fields.keys().cloned().collect();
        assert_eq!(names, vec!["text", "link"]);
        assert_eq!(selectors.fields["link"].attribute(), Some("href"));
        assert_eq!(selectors.fields["text"].selector(), "span.text");

        let cleaning = &config.processing_rules.text_cleaning["text"];
        assert!(cleaning.trim && cleaning.remove_newlines && cleaning.lowercase);
        let patterns: Vec<_> = cleaning.regex_replace.keys().cloned().collect();
        assert_eq!(patterns, vec!["a", "b"]);
    }

    #[test]
    fn test_api_kind_is_inferred() {
        let yaml = r#"
api_config:
  base_url: https://api.example.com
  endpoints: ["/items"]
  data_path: results
"#;
        let config = JobConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.job_kind(), JobKind::Api);
        assert_eq!(config.api_config.unwrap().method, "GET");
    }

    #[test]
    fn test_web_job_requires_urls_and_fields() {
        let yaml = r#"
selectors:
  item: div
  fields:
    a: span
"#;
        let err = JobConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("urls")));

        let yaml = r#"
urls: ["https://example.com"]
selectors:
  item: div
  fields: {}
"#;
        let err = JobConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("selectors.fields")));
    }

    #[test]
    fn test_dynamic_login_job_may_omit_urls() {
        let yaml = r##"
dynamic: true
selectors:
  item: tr
  fields:
    name: td.name
login_config:
  login_url: https://example.com/login
  username_selector: "#user"
  password_selector: "#pass"
  submit_selector: "button[type=submit]"
  username: alice
  password: secret
  success_url_contains: /dashboard
"##;
        let config = JobConfig::from_yaml(yaml).unwrap();
        assert!(config.urls.is_empty());
        assert_eq!(config.login_config.unwrap().wait_after_login, 3.0);
    }

    #[test]
    fn test_login_requires_success_check() {
        let yaml = r##"
dynamic: true
selectors:
  item: tr
  fields:
    name: td.name
login_config:
  login_url: https://example.com/login
  username_selector: "#user"
  password_selector: "#pass"
  submit_selector: "button"
  username: alice
  password: secret
"##;
        assert!(matches!(JobConfig::from_yaml(yaml), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_rejects_zero_max_pages_and_negative_delay() {
        let yaml = STATIC_JOB.replace("max_pages: 3", "max_pages: 0");
        assert!(matches!(JobConfig::from_yaml(&yaml), Err(ConfigError::Invalid { .. })));

        let yaml = format!("{}\nrequest_delay: -1\n", STATIC_JOB);
        assert!(matches!(JobConfig::from_yaml(&yaml), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_unknown_target_type_is_a_parse_error() {
        let yaml = format!(
            "{}\n  field_types:\n    text:\n      type: decimal\n",
            STATIC_JOB
        );
        assert!(matches!(JobConfig::from_yaml(&yaml), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_sample_is_valid_and_round_trips_through_yaml() {
        let sample = JobConfig::sample();
        sample.validate().unwrap();
        let yaml = serde_yaml::to_string(&sample).unwrap();
        let parsed = JobConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.name, sample.name);
        assert_eq!(parsed.processing_rules.validations.len(), 2);
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert!("sqlite".parse::<OutputFormat>().is_err());
    }
}
