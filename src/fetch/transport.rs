use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::proxy::ProxyEntry;

/// Everything needed to issue one GET request
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub user_agent: String,
    pub timeout: Duration,
    pub proxy: Option<ProxyEntry>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>, user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            user_agent: user_agent.into(),
            timeout,
            proxy: None,
        }
    }
}

/// Status and decoded body of a completed exchange
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub final_url: String,
    pub body: String,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    /// Connection refused or reset
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("{0}")]
    Other(String),
}

/// Network seam under the fetch client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse, TransportError>;
}

/// reqwest-backed transport; keeps one client per proxy
pub struct ReqwestTransport {
    direct: Client,
    proxied: Mutex<HashMap<String, Client>>,
}

impl ReqwestTransport {
    pub fn new() -> reqwest::Result<Self> {
        Ok(Self {
            direct: Self::builder().build()?,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn builder() -> reqwest::ClientBuilder {
        Client::builder()
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
    }

    fn client_for(&self, proxy: Option<&ProxyEntry>) -> Result<Client, TransportError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut cache = self
            .proxied
            .lock()
            .map_err(|_| TransportError::Other("proxy client cache poisoned".to_string()))?;
        if let Some(client) = cache.get(proxy.key()) {
            return Ok(client.clone());
        }

        let mut builder = Self::builder();
        if let Some(http) = &proxy.http {
            let p = reqwest::Proxy::http(http)
                .map_err(|e| TransportError::Other(format!("invalid proxy {}: {}", proxy.key(), e)))?;
            builder = builder.proxy(p);
        }
        if let Some(https) = &proxy.https {
            let p = reqwest::Proxy::https(https)
                .map_err(|e| TransportError::Other(format!("invalid proxy {}: {}", proxy.key(), e)))?;
            builder = builder.proxy(p);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build proxy client: {}", e)))?;

        debug!("Created HTTP client for proxy {}", proxy.key());
        cache.insert(proxy.key().to_string(), client.clone());
        Ok(client)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse, TransportError> {
        let client = self.client_for(request.proxy.as_ref())?;

        let mut builder = client
            .get(&request.url)
            .timeout(request.timeout)
            .header(reqwest::header::USER_AGENT, &request.user_agent)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
            );
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(RawResponse {
            status,
            final_url,
            body,
        })
    }
}
