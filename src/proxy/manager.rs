use rand::seq::SliceRandom;
use std::collections::HashSet;
use tracing::{debug, warn};
use url::Url;

use crate::cli::config::ProxySettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyHealth {
    Available,
    Quarantined,
}

/// One candidate egress proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    /// Proxy URL for plain HTTP traffic
    pub http: Option<String>,

    /// Proxy URL for HTTPS traffic
    pub https: Option<String>,

    /// host:port identity; credential variants share it
    key: String,
}

impl ProxyEntry {
    pub fn from_settings(settings: &ProxySettings) -> Option<Self> {
        let key = settings
            .http
            .as_deref()
            .and_then(host_port_key)
            .or_else(|| settings.https.as_deref().and_then(host_port_key))?;

        Some(Self {
            http: settings.http.clone(),
            https: settings.https.clone(),
            key,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Scheme of the primary proxy URL (http, https, socks5, ...)
    pub fn scheme(&self) -> Option<String> {
        self.http
            .as_deref()
            .or(self.https.as_deref())
            .and_then(|u| Url::parse(u).ok())
            .map(|u| u.scheme().to_string())
    }
}

fn host_port_key(proxy_url: &str) -> Option<String> {
    let parsed = Url::parse(proxy_url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let port = parsed.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

/// Run-scoped proxy rotation with monotonic quarantine
pub struct ProxyPool {
    entries: Vec<ProxyEntry>,

    /// host:port keys excluded for the rest of the run
    quarantined: HashSet<String>,
}

impl ProxyPool {
    pub fn new(settings: &[ProxySettings]) -> Self {
        let entries = settings
            .iter()
            .filter_map(|s| {
                let entry = ProxyEntry::from_settings(s);
                if entry.is_none() {
                    warn!("Ignoring proxy entry without a usable http/https URL: {:?}", s);
                }
                entry
            })
            .collect();

        Self {
            entries,
            quarantined: HashSet::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A uniformly random non-quarantined entry, or `None` to go direct
    pub fn next(&self) -> Option<ProxyEntry> {
        if self.entries.is_empty() {
            return None;
        }

        let available: Vec<&ProxyEntry> = self
            .entries
            .iter()
            .filter(|p| !self.quarantined.contains(p.key()))
            .collect();

        match available.choose(&mut rand::thread_rng()) {
            Some(proxy) => {
                debug!("Using proxy: {}", proxy.key());
                Some((*proxy).clone())
            }
            None => {
                warn!("No working proxies available, connecting directly");
                None
            }
        }
    }

    /// Exclude the entry (by host:port) for the remainder of the run
    pub fn quarantine(&mut self, entry: &ProxyEntry) {
        if self.quarantined.insert(entry.key().to_string()) {
            warn!("Marked proxy as bad: {}", entry.key());
        }
    }

    pub fn health(&self, entry: &ProxyEntry) -> ProxyHealth {
        if self.quarantined.contains(entry.key()) {
            ProxyHealth::Quarantined
        } else {
            ProxyHealth::Available
        }
    }

    pub fn available_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|p| !self.quarantined.contains(p.key()))
            .count()
    }
}
