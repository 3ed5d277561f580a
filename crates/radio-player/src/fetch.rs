//! HTTP GET shim used by the metadata poller.
//!
//! Two transports behind one [`HttpGet`] contract:
//!
//! ```text
//!   Platform::Web     → reqwest (async, in-process)
//!   Platform::Native  → ureq on the blocking pool (the bridged call)
//! ```
//!
//! The native transport decides the body shape from the response
//! content-type.  When text was asked for but the bridge produced JSON, the
//! JSON is serialised back to text so callers always get what they asked for.
//! Nothing here retries; the next poll tick is the retry.
use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use radio_proto::metadata::{self, ParseError, ParsedMetadata};
use radio_proto::protocol::Platform;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("native request failed: {0}")]
    Bridge(String),

    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    Text,
    #[default]
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub response_type: ResponseType,
}

impl GetOptions {
    pub fn text() -> Self {
        Self {
            response_type: ResponseType::Text,
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Text(String),
    Json(Value),
}

impl Body {
    pub fn into_text(self) -> String {
        match self {
            Body::Text(text) => text,
            Body::Json(value) => value.to_string(),
        }
    }

    /// Coerce a transport result into the shape the caller requested.
    fn into_requested(self, response_type: ResponseType) -> Result<Body, FetchError> {
        match (response_type, self) {
            (ResponseType::Text, body) => Ok(Body::Text(body.into_text())),
            (ResponseType::Json, Body::Json(value)) => Ok(Body::Json(value)),
            (ResponseType::Json, Body::Text(text)) => Ok(Body::Json(serde_json::from_str(&text)?)),
        }
    }
}

#[async_trait]
pub trait HttpGet: Send + Sync {
    async fn get(&self, url: &str, options: &GetOptions) -> Result<Body, FetchError>;
}

pub struct HttpShim {
    platform: Platform,
    client: reqwest::Client,
    agent: ureq::Agent,
}

impl HttpShim {
    pub fn for_platform(platform: Platform) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();
        Ok(Self {
            platform,
            client,
            agent,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    async fn web_get(&self, url: &str, options: &GetOptions) -> Result<Body, FetchError> {
        let mut request = self.client.get(url).query(&options.params);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        match options.response_type {
            ResponseType::Text => Ok(Body::Text(response.text().await?)),
            ResponseType::Json => Ok(Body::Json(response.json::<Value>().await?)),
        }
    }

    async fn native_get(&self, url: &str, options: &GetOptions) -> Result<Body, FetchError> {
        let agent = self.agent.clone();
        let url = url.to_string();
        let owned = options.clone();
        let body =
            tokio::task::spawn_blocking(move || bridged_get(&agent, &url, &owned)).await??;
        body.into_requested(options.response_type)
    }
}

#[async_trait]
impl HttpGet for HttpShim {
    async fn get(&self, url: &str, options: &GetOptions) -> Result<Body, FetchError> {
        debug!("fetch: GET {} via {}", url, self.platform);
        match self.platform {
            Platform::Web => self.web_get(url, options).await,
            Platform::Native => self.native_get(url, options).await,
        }
    }
}

/// Blocking request.  The body is JSON when the server says so, text
/// otherwise.
fn bridged_get(agent: &ureq::Agent, url: &str, options: &GetOptions) -> Result<Body, FetchError> {
    let mut request = agent.get(url);
    for (name, value) in &options.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    for (name, value) in &options.params {
        request = request.query(name.as_str(), value.as_str());
    }

    let mut response = request.call().map_err(|e| match e {
        ureq::Error::StatusCode(code) => FetchError::Status(code),
        other => FetchError::Bridge(other.to_string()),
    })?;

    let is_json = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
    let text = response
        .body_mut()
        .read_to_string()
        .map_err(|e| FetchError::Bridge(e.to_string()))?;

    if is_json {
        if let Ok(value) = serde_json::from_str::<Value>(&text) {
            return Ok(Body::Json(value));
        }
    }
    Ok(Body::Text(text))
}

// ── now playing ───────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("malformed metadata: {0}")]
    Parse(#[from] ParseError),
}

/// One poll: GET the stats document as text and parse it.
pub async fn fetch_now_playing(
    http: &dyn HttpGet,
    url: &str,
) -> Result<ParsedMetadata, MetadataError> {
    let body = http.get(url, &GetOptions::text()).await?;
    Ok(metadata::parse(&body.into_text())?)
}
