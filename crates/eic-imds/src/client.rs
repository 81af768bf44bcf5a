// ABOUTME: Blocking IMDSv2 client with one short timeout on every call.
// ABOUTME: Fetches the session token, reads fields, and probes field existence without a body.

use crate::error::{ImdsError, Result};
use crate::paths;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Opaque IMDSv2 session token. Lives for one pipeline run and is never logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token([REDACTED])")
    }
}

/// Read access to the instance metadata service.
///
/// The pipeline only talks to metadata through this trait so tests can
/// substitute canned responses.
pub trait MetadataSource {
    /// Obtain a session token. An empty body is an error.
    fn fetch_token(&self) -> Result<Token>;

    /// GET `path` and return the raw body text.
    ///
    /// # Errors
    /// `ImdsError::NotFound` for 404, `ImdsError::Status` for any other
    /// non-success status, `ImdsError::Request` for transport failures.
    fn fetch_field(&self, path: &str, token: &Token) -> Result<String>;

    /// HEAD `path`. `Ok(true)` for 2xx, `Ok(false)` for 404, error otherwise.
    fn probe_field(&self, path: &str, token: &Token) -> Result<bool>;
}

/// Connection settings for the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ImdsConfig {
    /// Base URL, without the `/latest` suffix.
    pub endpoint: String,
    /// Timeout applied to every request, connect included.
    pub timeout_ms: u64,
    /// Lifetime requested for the session token.
    pub token_ttl_secs: u32,
}

impl Default for ImdsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://169.254.169.254".to_string(),
            timeout_ms: 1000,
            token_ttl_secs: 5,
        }
    }
}

impl ImdsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// HTTP implementation of [`MetadataSource`].
///
/// No retries: a slow or unreachable service is reported immediately so
/// sshd is never held up.
#[derive(Debug, Clone)]
pub struct ImdsClient {
    client: Client,
    base_url: String,
    token_ttl_secs: u32,
}

impl ImdsClient {
    /// Build a client for the given settings.
    ///
    /// Proxy settings from the environment are ignored; the metadata service
    /// is link-local and must be reached directly.
    pub fn new(config: &ImdsConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .no_proxy()
            .build()
            .map_err(ImdsError::Client)?;

        Ok(Self {
            client,
            base_url: format!("{}/latest", config.endpoint.trim_end_matches('/')),
            token_ttl_secs: config.token_ttl_secs,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn send(&self, path: &str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().map_err(|e| ImdsError::Request {
            path: path.to_string(),
            source: e,
        })?;
        debug!(path, status = %response.status(), "metadata response");
        Ok(response)
    }
}

/// Map a non-success status onto the error taxonomy.
fn check_status(path: &str, status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::NOT_FOUND {
        Err(ImdsError::NotFound {
            path: path.to_string(),
        })
    } else {
        Err(ImdsError::Status {
            path: path.to_string(),
            status: status.as_u16(),
        })
    }
}

impl MetadataSource for ImdsClient {
    fn fetch_token(&self) -> Result<Token> {
        let request = self
            .client
            .put(self.url(paths::TOKEN))
            .header(paths::TOKEN_TTL_HEADER, self.token_ttl_secs.to_string());
        let response = self.send(paths::TOKEN, request)?;
        check_status(paths::TOKEN, response.status())?;

        let body = response.text().map_err(|e| ImdsError::Body {
            path: paths::TOKEN.to_string(),
            source: e,
        })?;
        let token = body.trim();
        if token.is_empty() {
            return Err(ImdsError::EmptyToken);
        }
        Ok(Token::new(token))
    }

    fn fetch_field(&self, path: &str, token: &Token) -> Result<String> {
        let request = self
            .client
            .get(self.url(path))
            .header(paths::TOKEN_HEADER, token.as_str());
        let response = self.send(path, request)?;
        check_status(path, response.status())?;

        response.text().map_err(|e| ImdsError::Body {
            path: path.to_string(),
            source: e,
        })
    }

    fn probe_field(&self, path: &str, token: &Token) -> Result<bool> {
        let request = self
            .client
            .head(self.url(path))
            .header(paths::TOKEN_HEADER, token.as_str());
        let response = self.send(path, request)?;

        match check_status(path, response.status()) {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
