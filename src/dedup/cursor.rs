//! Per-channel last-seen cursor with a content fingerprint.
//!
//! A message is new when its id is past the channel's cursor, or when it
//! sits exactly on the cursor but its text changed (an in-place edit of
//! the most recent message). Anything older than the cursor is ignored.

use std::collections::HashMap;

use tracing::debug;

use crate::types::ChannelMessage;

/// Order-sensitive rolling hash of a message body.
///
/// `h = h * 31 + unit` over UTF-16 code units with 32-bit wraparound.
/// Cheap to compute and stable across runs; collisions only cost a missed
/// edit notification at the boundary id.
pub fn fingerprint(text: &str) -> i32 {
    text.encode_utf16().fold(0_i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    })
}

/// Last forwarded position in one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Id of the last forwarded message.
    pub last_id: i64,
    /// Fingerprint of that message's text.
    pub fingerprint: i32,
}

/// Cursor dedup engine across all channels of one source.
///
/// A channel is either unknown, observed without a position (its first
/// batch was empty), or observed with a [`Cursor`]. Observed channels
/// without a position report every message as new.
#[derive(Debug, Clone, Default)]
pub struct CursorDedup {
    cursors: HashMap<String, Option<Cursor>>,
}

impl CursorDedup {
    /// Create an engine with no cursors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cursor for a channel, if one exists.
    pub fn cursor(&self, channel: &str) -> Option<Cursor> {
        self.cursors.get(channel).copied().flatten()
    }

    /// Whether a channel has been observed, with or without a cursor.
    pub fn is_observed(&self, channel: &str) -> bool {
        self.cursors.contains_key(channel)
    }

    /// Mark a channel as observed without moving its cursor.
    pub fn observe(&mut self, channel: &str) {
        self.cursors.entry(channel.to_owned()).or_insert(None);
    }

    /// Whether `message` must be forwarded relative to the channel cursor.
    ///
    /// Channels without a cursor report every message as new; callers that
    /// want cold-start suppression use [`CursorDedup::prime`] first.
    pub fn is_new(&self, channel: &str, message: &ChannelMessage) -> bool {
        match self.cursor(channel) {
            None => true,
            Some(cursor) => {
                message.id > cursor.last_id
                    || (message.id == cursor.last_id
                        && fingerprint(&message.text) != cursor.fingerprint)
            }
        }
    }

    /// Sort `batch` ascending by id and keep only new messages.
    pub fn select(&self, channel: &str, mut batch: Vec<ChannelMessage>) -> Vec<ChannelMessage> {
        batch.sort_by_key(|message| message.id);
        batch.retain(|message| self.is_new(channel, message));
        batch
    }

    /// Observe a channel's first batch, setting the cursor to its newest
    /// message.
    ///
    /// An empty batch still marks the channel observed, so the first message
    /// that arrives later is forwarded. Returns whether a cursor was set.
    pub fn prime(&mut self, channel: &str, batch: &[ChannelMessage]) -> bool {
        let Some(newest) = batch.iter().max_by_key(|message| message.id) else {
            debug!(channel, "observed empty channel");
            self.observe(channel);
            return false;
        };
        debug!(channel, last_id = newest.id, "primed channel cursor");
        self.commit(channel, newest);
        true
    }

    /// Advance the cursor after `message` was forwarded.
    pub fn commit(&mut self, channel: &str, message: &ChannelMessage) {
        self.cursors.insert(
            channel.to_owned(),
            Some(Cursor {
                last_id: message.id,
                fingerprint: fingerprint(&message.text),
            }),
        );
    }

    /// Number of observed channels.
    pub fn channel_count(&self) -> usize {
        self.cursors.len()
    }
}
