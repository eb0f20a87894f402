//! External sources polled for new items, and the downstream forwarder.
//!
//! Fetchers and the forwarder are traits so poll jobs can be driven by
//! in-memory fakes in tests; [`http`] holds the production implementations.

pub mod http;
pub mod jobs;

use async_trait::async_trait;

use crate::types::{ChannelMessage, FeedItem};

pub use http::{HttpChannelFetcher, HttpFeedFetcher, WebhookForwarder};
pub use jobs::{ChannelPoll, FeedPoll};

/// Errors from fetching or forwarding.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Transport-level failure.
    #[error("request to {source_name} failed: {detail}")]
    Request {
        /// Source or forwarder name.
        source_name: String,
        /// Error detail.
        detail: String,
    },
    /// The remote answered with a non-success status.
    #[error("{source_name} returned HTTP {status}")]
    Status {
        /// Source or forwarder name.
        source_name: String,
        /// HTTP status code.
        status: u16,
    },
    /// The response body could not be decoded.
    #[error("invalid response from {source_name}: {detail}")]
    Decode {
        /// Source or forwarder name.
        source_name: String,
        /// Error detail.
        detail: String,
    },
}

/// A feed-style source returning recent items with opaque ids.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the current window of items.
    async fn fetch(&self) -> Result<Vec<FeedItem>, SourceError>;
}

/// A per-conversation source with monotonically increasing message ids.
#[async_trait]
pub trait ChannelFetcher: Send + Sync {
    /// List the channels currently available.
    async fn channels(&self) -> Result<Vec<String>, SourceError>;

    /// Fetch up to `limit` recent messages of one channel.
    async fn fetch(&self, channel: &str, limit: usize) -> Result<Vec<ChannelMessage>, SourceError>;
}

/// Delivers rendered text to the downstream consumer.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Send one message. An `Err` means it was not delivered.
    async fn send(&self, text: &str) -> Result<(), SourceError>;
}
