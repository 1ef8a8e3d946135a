use rand::seq::SliceRandom;

pub const DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
];

pub const MOBILE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Mobile Safari/537.36",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1",
];

pub const TABLET_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPad; CPU OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 13; SM-X710) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
}

pub fn random_user_agent(device: DeviceClass) -> &'static str {
    let pool = match device {
        DeviceClass::Desktop => DESKTOP_USER_AGENTS,
        DeviceClass::Mobile => MOBILE_USER_AGENTS,
        DeviceClass::Tablet => TABLET_USER_AGENTS,
    };
    pool.choose(&mut rand::thread_rng()).copied().unwrap_or(DESKTOP_USER_AGENTS[0])
}

/// The configured agent, or a random desktop one chosen for this run
pub fn resolve_user_agent(configured: Option<&str>) -> String {
    match configured {
        Some(agent) if !agent.trim().is_empty() => agent.to_string(),
        _ => random_user_agent(DeviceClass::Desktop).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_user_agent_comes_from_pool() {
        let agent = random_user_agent(DeviceClass::Mobile);
        assert!(MOBILE_USER_AGENTS.contains(&agent));
    }

    #[test]
    fn test_configured_agent_wins() {
        assert_eq!(resolve_user_agent(Some("MyBot/1.0")), "MyBot/1.0");
        let fallback = resolve_user_agent(Some("  "));
        assert!(DESKTOP_USER_AGENTS.contains(&fallback.as_str()));
    }
}
