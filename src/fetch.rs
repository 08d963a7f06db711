//! External Fetch Adapter
//!
//! One request to one remote endpoint per call. Every failure is folded into a
//! coarse [`FetchError`] so commands can pick user-facing text without caring
//! which HTTP library produced it. No retries happen here.

use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Coarse classification of a failed remote call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("request rejected with status {0}")]
    ClientError(u16),

    #[error("remote server error {0}")]
    ServerError(u16),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),
}

impl FetchError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedResponse(detail.into())
    }

    /// Map an HTTP status to a classification (only for non-2xx statuses)
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_server_error() {
            Self::ServerError(status.as_u16())
        } else {
            Self::ClientError(status.as_u16())
        }
    }

    /// Short hint suitable for appending to a user-facing failure message
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Timeout => "the service took too long to answer",
            Self::ClientError(_) => "the service rejected the request",
            Self::ServerError(_) => "the service is having problems",
            Self::MalformedResponse(_) => "the service returned an unexpected answer",
            Self::NetworkUnreachable(_) => "the service could not be reached",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if let Some(status) = e.status() {
            Self::from_status(status)
        } else if e.is_decode() || e.is_body() {
            Self::MalformedResponse(e.to_string())
        } else {
            Self::NetworkUnreachable(e.to_string())
        }
    }
}

/// Describes a single remote endpoint
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub method: Method,
    pub url: String,
    pub timeout: Duration,
}

impl Endpoint {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            timeout,
        }
    }

    pub fn post(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            timeout,
        }
    }

    /// Same method and timeout, different URL (used when a path is appended to an API base)
    pub fn with_url(&self, url: impl Into<String>) -> Self {
        Self {
            method: self.method.clone(),
            url: url.into(),
            timeout: self.timeout,
        }
    }
}

/// Request parameters
#[derive(Debug, Clone, Default)]
pub enum RequestParams {
    #[default]
    None,
    Query(Vec<(String, String)>),
    Json(serde_json::Value),
}

impl RequestParams {
    pub fn query<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::Query(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Successful raw response
#[derive(Debug, Clone)]
pub struct RawResult {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResult {
    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|e| FetchError::malformed(e.to_string()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Require an optional response field, reporting its absence as malformed
pub fn require<T>(value: Option<T>, field: &str) -> Result<T, FetchError> {
    value.ok_or_else(|| FetchError::malformed(format!("missing field `{}`", field)))
}

/// Thin HTTP adapter shared by every command
#[derive(Clone)]
pub struct FetchClient {
    client: Client,
}

impl Default for FetchClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(concat!("astralbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    /// Perform one request and return the full body on 2xx
    pub async fn invoke(
        &self,
        endpoint: &Endpoint,
        params: &RequestParams,
    ) -> Result<RawResult, FetchError> {
        let response = self.send(endpoint, params).await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();

        debug!("{} {} -> {} ({} bytes)", endpoint.method, endpoint.url, status, body.len());
        Ok(RawResult { status, body })
    }

    /// Perform one request and decode the JSON body
    pub async fn json<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        params: &RequestParams,
    ) -> Result<T, FetchError> {
        self.invoke(endpoint, params).await?.json()
    }

    /// Open a GET response for streaming consumption (binary downloads)
    pub async fn open(&self, url: &str, timeout: Duration) -> Result<Response, FetchError> {
        self.send(&Endpoint::get(url, timeout), &RequestParams::None).await
    }

    async fn send(&self, endpoint: &Endpoint, params: &RequestParams) -> Result<Response, FetchError> {
        let mut request = self
            .client
            .request(endpoint.method.clone(), &endpoint.url)
            .timeout(endpoint.timeout);

        request = match params {
            RequestParams::None => request,
            RequestParams::Query(pairs) => request.query(pairs),
            RequestParams::Json(body) => request.json(body),
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            debug!("{} {} failed with {}", endpoint.method, endpoint.url, status);
            return Err(FetchError::from_status(status));
        }

        Ok(response)
    }
}
