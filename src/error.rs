use std::fmt;
use thiserror::Error;

/// Invalid or incomplete job description. Raised before any run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read job file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse job file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    #[error("invalid regular expression `{pattern}`: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid transformation for field `{field}`: {reason}")]
    Expression { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Reason a single fetch attempt (or a whole fetch) did not produce content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    RobotsDenied,
    Timeout,
    ProxyFailure,
    HttpClientFatal,
    HttpRetryable,
    NetworkOther,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RobotsDenied => "robots denied",
            Self::Timeout => "timeout",
            Self::ProxyFailure => "proxy failure",
            Self::HttpClientFatal => "fatal client error",
            Self::HttpRetryable => "retryable http error",
            Self::NetworkOther => "network error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind} while fetching {url}: {detail}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub url: String,
    pub detail: String,
}

/// The login flow did not reach an authenticated state. Fatal for the run.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("login page {url} could not be loaded: {reason}")]
    Navigation { url: String, reason: String },

    #[error("login form element `{selector}` unavailable: {reason}")]
    Form { selector: String, reason: String },

    #[error("login could not be verified (url after submit: {current_url})")]
    Unverified { current_url: String },

    #[error("no browser session is available for login")]
    NoSession,
}

/// Content could not be turned into records. Logged; the target yields nothing.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    #[error("response from {url} is not valid JSON: {reason}")]
    Json { url: String, reason: String },

    #[error("data path `{path}` did not resolve in response from {url}")]
    DataPath { path: String, url: String },

    #[error("browser error during extraction: {0}")]
    Browser(#[from] BrowserError),
}

/// Failure isolated to one record. The record is skipped.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("field `{field}` produced a number that cannot be represented")]
    NonFinite { field: String },
}

#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    #[error("failed to start browser session: {message}")]
    Launch { message: String, proxy_related: bool },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("webdriver error: {0}")]
    Driver(String),

    #[error("browser session is closed")]
    Closed,
}

/// Errors that stop a run before it can return records.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Login(#[from] LoginError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_message_names_kind_and_url() {
        let err = FetchError {
            kind: FetchErrorKind::HttpClientFatal,
            url: "https://example.com/missing".to_string(),
            detail: "HTTP 404".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "fatal client error while fetching https://example.com/missing: HTTP 404"
        );
    }

    #[test]
    fn job_error_wraps_login_failure() {
        let err: JobError = LoginError::Unverified {
            current_url: "https://example.com/login".to_string(),
        }
        .into();
        assert!(matches!(err, JobError::Login(_)));
        assert!(err.to_string().contains("/login"));
    }
}
