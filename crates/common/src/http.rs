//! HTTP client that fans a request out over replica hosts.
//!
//! Hosts are tried strictly in order. The first 2xx response wins; a
//! transport error or rejected status is recorded and the next host is
//! tried. Context expiry stops the walk at once and is returned as
//! [`HttpError::Cancelled`] so callers can tell it apart from a remote
//! rejection.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::error::{HostError, HttpError};

/// Per-request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request sent to each candidate host.
#[derive(Debug, Clone)]
pub struct HostRequest {
    method: Method,
    path: String,
    body: Option<Vec<u8>>,
    headers: HeaderMap,
}

impl HostRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body and the matching content type.
    #[must_use]
    pub fn json_body(mut self, body: Vec<u8>) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(body);
        self
    }

    /// Encode `body` as JSON and attach it.
    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, HttpError> {
        let body = serde_json::to_vec(body).map_err(|e| HttpError::Encode(e.to_string()))?;
        Ok(self.json_body(body))
    }

    /// Add a header. Values that are not valid header text are skipped.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(e) => warn!(header = %name, error = %e, "Skipping invalid header value"),
        }
        self
    }

    /// `Authorization: OAuth <token>` when a token is configured.
    #[must_use]
    pub fn oauth(self, token: Option<&str>) -> Self {
        match token {
            Some(token) if !token.is_empty() => self.header(AUTHORIZATION, &format!("OAuth {token}")),
            _ => self,
        }
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// First successful response.
#[derive(Debug, Clone)]
pub struct HostResponse {
    /// Host that answered
    pub host: String,
    pub status: StatusCode,
    pub body: Vec<u8>,
    /// Hosts that failed before this one answered
    pub failures: Vec<HostError>,
}

/// Multi-host HTTP client.
#[derive(Debug, Clone)]
pub struct MultiHostClient {
    client: reqwest::Client,
    scheme: &'static str,
}

impl MultiHostClient {
    /// Create a client with the given per-request timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            scheme: "http",
        }
    }

    /// Send `request` to `hosts` in order until one answers with 2xx.
    pub async fn request(
        &self,
        ctx: &CallContext,
        hosts: &[String],
        request: &HostRequest,
    ) -> Result<HostResponse, HttpError> {
        if hosts.is_empty() {
            return Err(HttpError::NoHosts);
        }

        let mut failures = Vec::with_capacity(hosts.len());
        for host in hosts {
            let url = format!("{}://{}{}", self.scheme, host, request.path);
            debug!(method = %request.method, url = %url, "Sending request");

            match ctx.run(self.try_host(&url, request)).await? {
                Ok((status, body)) if status.is_success() => {
                    return Ok(HostResponse {
                        host: host.clone(),
                        status,
                        body,
                        failures,
                    });
                }
                Ok((status, body)) => {
                    let reason = format!("{status}: {}", String::from_utf8_lossy(&body).trim());
                    warn!(url = %url, reason = %reason, "Host rejected request");
                    failures.push(HostError::new(host.as_str(), reason));
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Host request failed");
                    failures.push(HostError::new(host.as_str(), e.to_string()));
                }
            }
        }

        Err(HttpError::AllHostsFailed(failures))
    }

    async fn try_host(
        &self,
        url: &str,
        request: &HostRequest,
    ) -> Result<(StatusCode, Vec<u8>), reqwest::Error> {
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        Ok((status, body.to_vec()))
    }
}

impl Default for MultiHostClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}
