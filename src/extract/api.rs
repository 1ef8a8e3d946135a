use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::{Content, Record};
use crate::cli::config::ApiSettings;
use crate::error::ExtractionError;
use crate::fetch::FetchClient;
use crate::utils::RunStats;

/// JSON endpoints walked in configured order
pub struct ApiJson {
    base_url: String,
    endpoints: Vec<String>,
    params: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    data_path: Option<String>,
    field_mappings: IndexMap<String, String>,
}

impl ApiJson {
    pub fn new(settings: &ApiSettings) -> Self {
        if !settings.method.eq_ignore_ascii_case("GET") {
            warn!(
                "API method '{}' is not supported; requests are sent as GET",
                settings.method
            );
        }
        if settings.body.is_some() {
            warn!("API request body is configured but ignored for GET requests");
        }

        let endpoints = if settings.endpoints.is_empty() {
            vec![String::new()]
        } else {
            settings.endpoints.clone()
        };

        Self {
            base_url: settings.base_url.clone(),
            endpoints,
            params: pairs(&settings.params),
            headers: pairs(&settings.headers),
            data_path: settings.data_path.clone().filter(|p| !p.trim().is_empty()),
            field_mappings: settings.field_mappings.clone(),
        }
    }

    /// Full request URL for every endpoint, query parameters included
    pub fn targets(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .map(|endpoint| {
                let raw = format!("{}{}", self.base_url, endpoint);
                if self.params.is_empty() {
                    return raw;
                }
                match Url::parse(&raw) {
                    Ok(mut url) => {
                        url.query_pairs_mut().extend_pairs(self.params.iter());
                        url.to_string()
                    }
                    Err(e) => {
                        warn!("Cannot attach query parameters to '{}': {}", raw, e);
                        raw
                    }
                }
            })
            .collect()
    }

    pub async fn acquire(&self, target: &str, fetch: &mut FetchClient, stats: &mut RunStats) -> Option<Content> {
        let max_retries = fetch.max_retries();
        let page = match fetch.fetch_page(target, &self.headers, max_retries, stats).await {
            Ok(page) => page,
            Err(e) => {
                debug!("No content for {}: {}", target, e);
                return None;
            }
        };

        match serde_json::from_str(&page.body) {
            Ok(value) => Some(Content::Json {
                url: target.to_string(),
                value,
            }),
            Err(e) => {
                let err = ExtractionError::Json {
                    url: target.to_string(),
                    reason: e.to_string(),
                };
                warn!("{}", err);
                None
            }
        }
    }

    pub fn extract(&self, value: &Value, url: &str) -> Result<Vec<Record>, ExtractionError> {
        let data = match &self.data_path {
            Some(path) => lookup(value, path).ok_or_else(|| ExtractionError::DataPath {
                path: path.clone(),
                url: url.to_string(),
            })?,
            None => value,
        };

        let items: Vec<&Value> = match data {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let mut records = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let Value::Object(object) = item else {
                warn!("Skipping item {} from {}: expected an object, got {}", i + 1, url, kind_of(item));
                continue;
            };

            if self.field_mappings.is_empty() {
                records.push(object.clone());
                continue;
            }

            let record = self
                .field_mappings
                .iter()
                .map(|(target, source)| (target.clone(), lookup(item, source).cloned().unwrap_or(Value::Null)))
                .collect();
            records.push(record);
        }

        info!("Collected {} items from {}", records.len(), url);
        Ok(records)
    }
}

fn pairs(map: &IndexMap<String, String>) -> Vec<(String, String)> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Follow a dotted path such as `results.0.name`; integer segments index arrays
pub(crate) fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> ApiSettings {
        ApiSettings {
            base_url: "https://api.example.com".to_string(),
            endpoints: vec!["/users".to_string(), "/admins".to_string()],
            method: "GET".to_string(),
            data_path: Some("data.results".to_string()),
            field_mappings: IndexMap::new(),
            params: IndexMap::new(),
            headers: IndexMap::new(),
            body: None,
        }
    }

    #[test]
    fn test_lookup_follows_keys_and_indexes() {
        let value = json!({"results": [{"name": "a"}, {"name": "b", "tags": ["x", "y"]}]});
        assert_eq!(lookup(&value, "results.1.name"), Some(&json!("b")));
        assert_eq!(lookup(&value, "results.1.tags.0"), Some(&json!("x")));
        assert_eq!(lookup(&value, "results.5"), None);
        assert_eq!(lookup(&value, "results.name"), None);
        assert_eq!(lookup(&value, ""), Some(&value));
    }

    #[test]
    fn test_targets_join_base_and_params() {
        let mut s = settings();
        s.params.insert("page".to_string(), "1".to_string());
        s.params.insert("q".to_string(), "a b".to_string());
        let api = ApiJson::new(&s);
        assert_eq!(
            api.targets(),
            vec![
                "https://api.example.com/users?page=1&q=a+b".to_string(),
                "https://api.example.com/admins?page=1&q=a+b".to_string(),
            ]
        );
    }

    #[test]
    fn test_missing_endpoints_default_to_base_url() {
        let mut s = settings();
        s.endpoints.clear();
        assert_eq!(ApiJson::new(&s).targets(), vec!["https://api.example.com".to_string()]);
    }

    #[test]
    fn test_extract_passes_objects_through() {
        let api = ApiJson::new(&settings());
        let value = json!({"data": {"results": [{"id": 1, "name": "Ann"}, 7, {"id": 2}]}});
        let records = api.extract(&value, "https://api.example.com/users").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], "Ann");
        assert_eq!(records[1]["id"], 2);
    }

    #[test]
    fn test_single_object_is_one_record() {
        let api = ApiJson::new(&settings());
        let value = json!({"data": {"results": {"id": 9}}});
        let records = api.extract(&value, "u").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["id"], 9);
    }

    #[test]
    fn test_field_mappings_use_paths() {
        let mut s = settings();
        s.field_mappings.insert("user".to_string(), "profile.name".to_string());
        s.field_mappings.insert("first_tag".to_string(), "tags.0".to_string());
        s.field_mappings.insert("missing".to_string(), "nope".to_string());
        let api = ApiJson::new(&s);

        let value = json!({"data": {"results": [{"profile": {"name": "Ann"}, "tags": ["red"]}]}});
        let records = api.extract(&value, "u").unwrap();
        let keys: Vec<_> = records[0].keys().cloned().collect();
        assert_eq!(keys, vec!["user", "first_tag", "missing"]);
        assert_eq!(records[0]["user"], "Ann");
        assert_eq!(records[0]["first_tag"], "red");
        assert_eq!(records[0]["missing"], Value::Null);
    }

    #[test]
    fn test_unresolved_data_path_is_an_error() {
        let api = ApiJson::new(&settings());
        let err = api.extract(&json!({"items": []}), "https://api.example.com/users").unwrap_err();
        assert!(matches!(err, ExtractionError::DataPath { ref path, .. } if path == "data.results"));
    }
}
