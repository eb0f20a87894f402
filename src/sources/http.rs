//! `reqwest` implementations of the source and forwarder traits.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{ChannelFetcher, FeedFetcher, Forwarder, SourceError};
use crate::types::{ChannelMessage, FeedItem};

/// HTTP connect timeout for every client.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Request timeout for source fetches.
const FETCH_TIMEOUT_SECS: u64 = 30;

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "failed to build HTTP client with timeouts, using default");
            reqwest::Client::default()
        })
}

async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    source: &str,
    url: &str,
) -> Result<T, SourceError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| SourceError::Request {
            source_name: source.to_owned(),
            detail: e.to_string(),
        })?;
    if !resp.status().is_success() {
        return Err(SourceError::Status {
            source_name: source.to_owned(),
            status: resp.status().as_u16(),
        });
    }
    resp.json::<T>().await.map_err(|e| SourceError::Decode {
        source_name: source.to_owned(),
        detail: e.to_string(),
    })
}

/// Feed fetched as a JSON array of [`FeedItem`] from one URL.
pub struct HttpFeedFetcher {
    client: reqwest::Client,
    name: String,
    url: String,
}

impl HttpFeedFetcher {
    /// Create a fetcher for the feed at `url`.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            client: build_client(Duration::from_secs(FETCH_TIMEOUT_SECS)),
            name: name.into(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self) -> Result<Vec<FeedItem>, SourceError> {
        let items: Vec<FeedItem> = get_json(&self.client, &self.name, &self.url).await?;
        debug!(source = %self.name, count = items.len(), "fetched feed");
        Ok(items)
    }
}

/// Client for a sidecar bridge exposing channels over HTTP.
///
/// `GET {base}/channels` returns a JSON array of channel ids and
/// `GET {base}/channels/{id}/messages?limit=N` the newest messages.
pub struct HttpChannelFetcher {
    client: reqwest::Client,
    name: String,
    base_url: String,
}

impl HttpChannelFetcher {
    /// Create a fetcher for the bridge at `base_url`.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: build_client(Duration::from_secs(FETCH_TIMEOUT_SECS)),
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Returns the base URL of the bridge.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChannelFetcher for HttpChannelFetcher {
    async fn channels(&self) -> Result<Vec<String>, SourceError> {
        let url = format!("{}/channels", self.base_url);
        get_json(&self.client, &self.name, &url).await
    }

    async fn fetch(&self, channel: &str, limit: usize) -> Result<Vec<ChannelMessage>, SourceError> {
        let url = messages_url(&self.name, &self.base_url, channel, limit)?;
        let messages: Vec<ChannelMessage> =
            get_json(&self.client, &self.name, url.as_str()).await?;
        debug!(source = %self.name, channel, count = messages.len(), "fetched channel");
        Ok(messages)
    }
}

/// URL of a channel's newest messages, with the channel id as one
/// percent-encoded path segment.
///
/// # Errors
///
/// Returns [`SourceError::Request`] if `base_url` is not a valid base URL.
pub fn messages_url(
    source_name: &str,
    base_url: &str,
    channel: &str,
    limit: usize,
) -> Result<reqwest::Url, SourceError> {
    let invalid = |detail: String| SourceError::Request {
        source_name: source_name.to_owned(),
        detail,
    };
    let mut url =
        reqwest::Url::parse(base_url).map_err(|e| invalid(format!("invalid base url {base_url}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| invalid(format!("base url {base_url} cannot take a path")))?
        .pop_if_empty()
        .extend(["channels", channel, "messages"]);
    url.query_pairs_mut()
        .append_pair("limit", &limit.to_string());
    Ok(url)
}

/// Forwards text to the downstream agent's webhook as `{"text": ...}`.
pub struct WebhookForwarder {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl WebhookForwarder {
    /// Create a forwarder posting to `url` within `timeout`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            url: url.into(),
            token: None,
        }
    }

    /// Authenticate every request with a bearer token.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }
}

impl std::fmt::Debug for WebhookForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookForwarder")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[async_trait]
impl Forwarder for WebhookForwarder {
    async fn send(&self, text: &str) -> Result<(), SourceError> {
        let body = serde_json::json!({ "text": text });
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let resp = request.send().await.map_err(|e| SourceError::Request {
            source_name: "forward".to_owned(),
            detail: e.to_string(),
        })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body_text = resp.text().await.unwrap_or_default();
            warn!(%status, "downstream forward failed: {body_text}");
            return Err(SourceError::Status {
                source_name: "forward".to_owned(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
