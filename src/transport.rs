//! HTTP transport for SCEP requests.
//!
//! The client talks to the CA through the [`ScepTransport`] trait so that the
//! HTTP stack can be replaced (proxies, custom TLS, test doubles). The
//! default [`HttpTransport`] is backed by `reqwest`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use url::Url;

use crate::config::ScepClientConfig;
use crate::error::{Result, ScepError};

/// Body and content type of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScepHttpResponse {
    /// Value of the Content-Type header, empty if absent.
    pub content_type: String,
    /// Response body.
    pub body: Vec<u8>,
}

/// HTTP operations needed by the SCEP client.
///
/// Implementations return an error for non-success HTTP statuses.
#[async_trait]
pub trait ScepTransport: Send + Sync {
    /// Perform an HTTP GET.
    async fn get(&self, url: &Url) -> Result<ScepHttpResponse>;

    /// Perform an HTTP POST with the given body.
    async fn post(&self, url: &Url, content_type: &str, body: Vec<u8>)
        -> Result<ScepHttpResponse>;
}

#[async_trait]
impl<T: ScepTransport + ?Sized> ScepTransport for Arc<T> {
    async fn get(&self, url: &Url) -> Result<ScepHttpResponse> {
        (**self).get(url).await
    }

    async fn post(&self, url: &Url, content_type: &str, body: Vec<u8>)
        -> Result<ScepHttpResponse> {
        (**self).post(url, content_type, body).await
    }
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport using the timeout and headers of `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: &ScepClientConfig) -> Result<Self> {
        Ok(Self {
            http: build_http_client(config)?,
        })
    }

    /// Wrap an existing `reqwest` client.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    async fn read_response(response: reqwest::Response) -> Result<ScepHttpResponse> {
        let status = response.status();

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ScepError::transport(format!("HTTP {}: {}", status, message)));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.bytes().await?.to_vec();

        Ok(ScepHttpResponse { content_type, body })
    }
}

#[async_trait]
impl ScepTransport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<ScepHttpResponse> {
        tracing::debug!(%url, "GET");
        let response = self.http.get(url.clone()).send().await?;
        Self::read_response(response).await
    }

    async fn post(
        &self,
        url: &Url,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<ScepHttpResponse> {
        tracing::debug!(%url, len = body.len(), "POST");
        let response = self
            .http
            .post(url.clone())
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        Self::read_response(response).await
    }
}

/// Build the `reqwest` client used by [`HttpTransport`].
pub fn build_http_client(config: &ScepClientConfig) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    for (name, value) in &config.additional_headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!("Ignoring invalid HTTP header '{}'", name),
        }
    }

    reqwest::Client::builder()
        .timeout(config.timeout)
        .user_agent(crate::USER_AGENT)
        .default_headers(headers)
        .build()
        .map_err(|e| ScepError::transport(format!("Failed to build HTTP client: {}", e)))
}
