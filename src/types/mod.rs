//! Item types shared by sources, dedup engines and forwarders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An entry fetched from a feed-style source (ID-set dedup).
///
/// Identifiers are opaque strings; feeds are not assumed to order them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Source-assigned identifier, unique within the feed.
    pub id: String,
    /// Text body of the entry.
    pub text: String,
    /// When the entry was published.
    pub timestamp: DateTime<Utc>,
    /// Author or sender display name.
    #[serde(default)]
    pub author: Option<String>,
}

impl FeedItem {
    /// Render the entry as downstream message text.
    pub fn render(&self, source: &str) -> String {
        match self.author.as_deref() {
            Some(author) if !author.is_empty() => {
                format!("[{source}] {author}: {}", self.text)
            }
            _ => format!("[{source}] {}", self.text),
        }
    }
}

/// A message fetched from a per-conversation source (cursor dedup).
///
/// Ids increase monotonically within one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Per-channel message id.
    pub id: i64,
    /// Channel or dialog the message belongs to.
    pub channel: String,
    /// Message body.
    pub text: String,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
    /// Sender display name.
    #[serde(default)]
    pub sender: Option<String>,
}

impl ChannelMessage {
    /// Render the message as downstream message text.
    pub fn render(&self, source: &str) -> String {
        let sender = self.sender.as_deref().unwrap_or("unknown");
        format!("[{source}/{}] {sender}: {}", self.channel, self.text)
    }
}
