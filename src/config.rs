// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration types for the SCEP client.
//!
//! This module provides the CA identifier (URL and optional profile) and the
//! client policy knobs: GET-only mode, legacy algorithm fallback and the
//! signing-time window applied to responses.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{Result, ScepError};
use crate::types::Operation;

/// Default window for the response signingTime check.
pub const DEFAULT_MAX_SIGNING_TIME_BIAS: Duration = Duration::from_secs(5 * 60);

/// Default HTTP request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// SCEP endpoint of a CA: base URL and optional profile.
///
/// The profile (sometimes called CA identifier) selects one of several CAs
/// served from the same URL. It is sent as the `message` parameter of the
/// `GetCACaps`, `GetCACert` and `GetNextCACert` requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaIdentifier {
    url: Url,
    profile: Option<String>,
}

impl CaIdentifier {
    /// Create an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ScepError::Config`] if the URL is not absolute HTTP(S), has
    /// a fragment or an `operation`/`message` query parameter, or the profile
    /// contains characters that are not URL-safe. Other query parameters are
    /// kept on every request.
    pub fn new(url: impl AsRef<str>, profile: Option<String>) -> Result<Self> {
        let url = Url::parse(url.as_ref())?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ScepError::config(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }
        if url.fragment().is_some() {
            return Err(ScepError::config("CA URL must not contain a fragment"));
        }
        if let Some((key, _)) = url
            .query_pairs()
            .find(|(k, _)| k == "operation" || k == "message")
        {
            return Err(ScepError::config(format!(
                "CA URL must not set the '{}' query parameter",
                key
            )));
        }

        if let Some(profile) = &profile {
            let url_safe = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~');
            if profile.is_empty() || !profile.chars().all(url_safe) {
                return Err(ScepError::config(format!("invalid CA profile '{}'", profile)));
            }
        }

        Ok(Self { url, profile })
    }

    /// Base URL of the SCEP endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// CA profile, if any.
    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    /// URL for a GET request: `<base>?operation=<op>[&message=<message>]`.
    ///
    /// `message` is percent-encoded and appended after any query parameters
    /// of the base URL.
    pub fn build_get_url(&self, operation: Operation, message: Option<&str>) -> Url {
        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("operation", operation.as_str());
            if let Some(message) = message {
                query.append_pair("message", message);
            }
        }
        url
    }

    /// URL for a POST request: `<base>?operation=<op>`.
    pub fn build_post_url(&self, operation: Operation) -> Url {
        self.build_get_url(operation, None)
    }
}

impl fmt::Display for CaIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.profile {
            Some(profile) => write!(f, "{} (profile {})", self.url, profile),
            None => write!(f, "{}", self.url),
        }
    }
}

/// Configuration for a SCEP client.
#[derive(Clone)]
pub struct ScepClientConfig {
    /// The CA to talk to.
    pub ca_id: CaIdentifier,

    /// Send PKIOperation requests with GET even if the CA supports POST.
    pub http_get_only: bool,

    /// Allow single DES when the CA advertises neither AES nor DES3.
    pub use_insecure_algorithms: bool,

    /// Maximum difference between the local clock and a response's
    /// signingTime. `None` disables the check.
    pub max_signing_time_bias: Option<Duration>,

    /// Request timeout of the built-in HTTP transport.
    pub timeout: Duration,

    /// Additional HTTP headers sent by the built-in HTTP transport.
    pub additional_headers: Vec<(String, String)>,
}

impl fmt::Debug for ScepClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScepClientConfig")
            .field("ca_id", &self.ca_id)
            .field("http_get_only", &self.http_get_only)
            .field("use_insecure_algorithms", &self.use_insecure_algorithms)
            .field("max_signing_time_bias", &self.max_signing_time_bias)
            .field("timeout", &self.timeout)
            .field("additional_headers", &self.additional_headers.len())
            .finish()
    }
}

impl ScepClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ScepClientConfigBuilder {
        ScepClientConfigBuilder::new()
    }

    /// Parse a configuration from TOML.
    ///
    /// ```
    /// use scep_client::ScepClientConfig;
    ///
    /// let config = ScepClientConfig::from_toml_str(r#"
    ///     url = "http://ca.example.com/scep"
    ///     profile = "tls-server"
    ///     http_get_only = true
    ///     max_signing_time_bias_ms = 60000
    ///
    ///     [headers]
    ///     X-Tenant = "ops"
    /// "#).unwrap();
    ///
    /// assert!(config.http_get_only);
    /// assert_eq!(config.ca_id.profile(), Some("tls-server"));
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(s).map_err(|e| ScepError::config(format!("invalid TOML: {}", e)))?;

        let mut builder = Self::builder()
            .ca_url(raw.url)?
            .http_get_only(raw.http_get_only)
            .use_insecure_algorithms(raw.use_insecure_algorithms);

        if let Some(profile) = raw.profile {
            builder = builder.profile(profile);
        }
        if let Some(bias) = raw.max_signing_time_bias_ms {
            builder = builder.max_signing_time_bias_ms(bias);
        }
        if let Some(timeout) = raw.timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        for (name, value) in raw.headers {
            builder = builder.add_header(name, value);
        }

        builder.build()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    url: String,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    http_get_only: bool,
    #[serde(default)]
    use_insecure_algorithms: bool,
    #[serde(default)]
    max_signing_time_bias_ms: Option<i64>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

/// Builder for [`ScepClientConfig`].
#[derive(Debug)]
pub struct ScepClientConfigBuilder {
    ca_url: Option<String>,
    profile: Option<String>,
    http_get_only: bool,
    use_insecure_algorithms: bool,
    max_signing_time_bias: Option<Duration>,
    timeout: Duration,
    additional_headers: Vec<(String, String)>,
}

impl Default for ScepClientConfigBuilder {
    fn default() -> Self {
        Self {
            ca_url: None,
            profile: None,
            http_get_only: false,
            use_insecure_algorithms: false,
            max_signing_time_bias: Some(DEFAULT_MAX_SIGNING_TIME_BIAS),
            timeout: DEFAULT_TIMEOUT,
            additional_headers: Vec::new(),
        }
    }
}

impl ScepClientConfigBuilder {
    /// Create a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SCEP endpoint URL.
    pub fn ca_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        Url::parse(url.as_ref())?;
        self.ca_url = Some(url.as_ref().to_string());
        Ok(self)
    }

    /// Set the CA profile.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Always use GET for PKIOperation.
    pub fn http_get_only(mut self, get_only: bool) -> Self {
        self.http_get_only = get_only;
        self
    }

    /// Allow single DES as a last-resort content cipher.
    pub fn use_insecure_algorithms(mut self, insecure: bool) -> Self {
        self.use_insecure_algorithms = insecure;
        self
    }

    /// Set the signingTime window. `None` or zero disables the check.
    pub fn max_signing_time_bias(mut self, bias: Option<Duration>) -> Self {
        self.max_signing_time_bias = bias.filter(|b| !b.is_zero());
        self
    }

    /// Set the signingTime window in milliseconds. Values `<= 0` disable the
    /// check.
    pub fn max_signing_time_bias_ms(self, bias_ms: i64) -> Self {
        let bias = u64::try_from(bias_ms).ok().map(Duration::from_millis);
        self.max_signing_time_bias(bias)
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add an additional HTTP header to all requests.
    pub fn add_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.push((name.into(), value.into()));
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA URL is missing or the CA identifier is
    /// invalid.
    pub fn build(self) -> Result<ScepClientConfig> {
        let url = self
            .ca_url
            .ok_or_else(|| ScepError::config("ca_url is required"))?;

        Ok(ScepClientConfig {
            ca_id: CaIdentifier::new(url, self.profile)?,
            http_get_only: self.http_get_only,
            use_insecure_algorithms: self.use_insecure_algorithms,
            max_signing_time_bias: self.max_signing_time_bias,
            timeout: self.timeout,
            additional_headers: self.additional_headers,
        })
    }
}
