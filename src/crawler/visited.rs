use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Normalized targets already fetched in this run
#[derive(Debug, Default)]
pub struct VisitedSet {
    seen: HashSet<String>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `url`; false if an equivalent URL was already visited
    pub fn insert(&mut self, url: &str) -> bool {
        let normalized = normalize_url(url);
        if self.seen.contains(&normalized) {
            debug!("Skipping already visited URL: {}", normalized);
            return false;
        }
        self.seen.insert(normalized);
        true
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(&normalize_url(url))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Canonical form used to detect revisits.
///
/// Lowercases the host, drops default ports and the fragment, sorts query
/// pairs by key and renders the bare root path without its trailing slash.
pub fn normalize_url(url: &str) -> String {
    // Unparseable targets compare by their raw text
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    parsed.set_fragment(None);

    if parsed.query().is_some_and(|q| !q.is_empty()) {
        let mut pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    } else {
        parsed.set_query(None);
    }

    let mut normalized = parsed.to_string();
    if parsed.path() == "/" && parsed.query().is_none() && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("HTTPS://Example.COM:443/"), "https://example.com");
        assert_eq!(normalize_url("http://example.com:80/a#frag"), "http://example.com/a");
        assert_eq!(normalize_url("http://example.com:8080/a"), "http://example.com:8080/a");
        assert_eq!(normalize_url("https://example.com/p?b=2&a=1"), "https://example.com/p?a=1&b=2");
        assert_eq!(normalize_url("https://example.com/p?"), "https://example.com/p");
        assert_eq!(normalize_url("not a url"), "not a url");
    }

    #[test]
    fn test_visited_set_dedupes_equivalent_urls() {
        let mut visited = VisitedSet::new();
        assert!(visited.insert("https://example.com/page/2/?sort=asc&x=1"));
        assert!(!visited.insert("https://EXAMPLE.com/page/2/?x=1&sort=asc#top"));
        assert!(visited.contains("https://example.com:443/page/2/?x=1&sort=asc"));
        assert!(visited.insert("https://example.com/page/3/"));
        assert_eq!(visited.len(), 2);
    }
}
