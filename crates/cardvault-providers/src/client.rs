//! Shared JSON-over-HTTP client for external collaborators

use cardvault_core::error::AppError;
use reqwest::{Client, ClientBuilder, Method, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Which collaborator a client talks to; picks the error variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    CardProvider,
    Wallet,
    Exchange,
}

impl Upstream {
    fn error(self, message: String) -> AppError {
        match self {
            Upstream::CardProvider => AppError::Provider(message),
            Upstream::Wallet => AppError::Wallet(message),
            Upstream::Exchange => AppError::Exchange(message),
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Upstream::CardProvider => write!(f, "card-provider"),
            Upstream::Wallet => write!(f, "wallet"),
            Upstream::Exchange => write!(f, "exchange"),
        }
    }
}

/// Base URL, bearer key and pooled `reqwest` client
#[derive(Clone)]
pub struct HttpClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    upstream: Upstream,
}

impl HttpClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        timeout_secs: u64,
        upstream: Upstream,
    ) -> Result<Self, AppError> {
        let http_client = ClientBuilder::new()
            .timeout(Duration::from_secs(timeout_secs))
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Config(format!("{} client: {}", upstream, e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            upstream,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn upstream(&self) -> Upstream {
        self.upstream
    }

    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, AppError> {
        self.send::<(), R>(Method::GET, path, None).await
    }

    pub async fn post<T, R>(&self, path: &str, body: &T) -> Result<R, AppError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.send(Method::POST, path, Some(body)).await
    }

    /// PATCH without a meaningful response body
    pub async fn patch<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), AppError> {
        let _: serde_json::Value = self.send(Method::PATCH, path, Some(body)).await?;
        Ok(())
    }

    #[instrument(skip(self, body), fields(upstream = %self.upstream))]
    async fn send<T, R>(&self, method: Method, path: &str, body: Option<&T>) -> Result<R, AppError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        debug!("{} request: {} {}", self.upstream, method, url);

        let mut request = self.http_client.request(method, &url);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                self.upstream.error(format!("timeout calling {}", url))
            } else {
                self.upstream.error(format!("connection error: {}", e))
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            self.upstream
                .error(format!("failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            error!("{} HTTP error: status={} body={}", self.upstream, status, text);
            return Err(self.status_error(status, &text));
        }

        // Empty bodies deserialize as JSON null
        let body = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(body).map_err(|e| {
            self.upstream
                .error(format!("failed to parse response: {} - body: {}", e, text))
        })
    }

    fn status_error(&self, status: StatusCode, body: &str) -> AppError {
        let message = extract_message(body).unwrap_or_else(|| body.to_string());
        self.upstream
            .error(format!("HTTP {}: {}", status.as_u16(), message))
    }
}

/// `message` or `error` field of a JSON error body
fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .or_else(|| value.get("error"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("upstream", &self.upstream)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
