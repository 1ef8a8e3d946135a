use std::collections::HashMap;
use std::time::Duration;
use texting_robots::Robot;
use tracing::{debug, info, warn};
use url::Url;

use super::transport::{FetchRequest, HttpTransport};

/// Parsed policy for one origin
enum RobotsPolicy {
    AllowAll,
    Rules(Robot),
}

/// Per-origin robots.txt cache. Any failure to obtain or parse a policy allows the URL.
pub struct RobotsGate {
    enabled: bool,
    timeout: Duration,
    policies: HashMap<String, RobotsPolicy>,
}

impl RobotsGate {
    pub fn new(enabled: bool, timeout: Duration) -> Self {
        Self {
            enabled,
            timeout,
            policies: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn is_allowed(
        &mut self,
        url: &str,
        user_agent: &str,
        transport: &dyn HttpTransport,
    ) -> bool {
        if !self.enabled {
            return true;
        }

        let Some(origin) = origin_of(url) else {
            debug!("Cannot determine origin for {}, allowing", url);
            return true;
        };

        if !self.policies.contains_key(&origin) {
            let policy = self.load_policy(&origin, user_agent, transport).await;
            self.policies.insert(origin.clone(), policy);
        }

        match self.policies.get(&origin) {
            Some(RobotsPolicy::Rules(robot)) => robot.allowed(url),
            _ => true,
        }
    }

    async fn load_policy(
        &self,
        origin: &str,
        user_agent: &str,
        transport: &dyn HttpTransport,
    ) -> RobotsPolicy {
        let robots_url = format!("{}/robots.txt", origin);
        info!("Fetching robots.txt from {}", robots_url);

        let request = FetchRequest::get(&robots_url, user_agent, self.timeout);
        let response = match transport.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Error fetching robots.txt from {}: {}. Allowing by default.", robots_url, e);
                return RobotsPolicy::AllowAll;
            }
        };

        match response.status {
            200..=299 => match Robot::new(user_agent, response.body.as_bytes()) {
                Ok(robot) => RobotsPolicy::Rules(robot),
                Err(e) => {
                    warn!("Could not parse robots.txt from {}: {}. Allowing by default.", robots_url, e);
                    RobotsPolicy::AllowAll
                }
            },
            400..=499 => {
                debug!("No robots.txt at {} (HTTP {})", robots_url, response.status);
                RobotsPolicy::AllowAll
            }
            status => {
                warn!("robots.txt at {} returned HTTP {}. Allowing by default.", robots_url, status);
                RobotsPolicy::AllowAll
            }
        }
    }
}

/// scheme://host[:port], the cache key for a site's policy
fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}
