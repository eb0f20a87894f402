//! Poll jobs wiring fetch → dedup → forward → commit.
//!
//! An item is committed to its dedup engine only after the forwarder
//! accepted it, so a failed forward is retried on the next run.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{ChannelFetcher, FeedFetcher, Forwarder};
use crate::dedup::{CursorDedup, IdSetDedup};
use crate::poller::PollJob;

/// Feed source with ID-set dedup.
pub struct FeedPoll {
    name: String,
    fetcher: Arc<dyn FeedFetcher>,
    forwarder: Arc<dyn Forwarder>,
    dedup: Mutex<IdSetDedup>,
}

impl FeedPoll {
    /// Create a job for the feed `name` with the given seen-set bounds.
    pub fn new(
        name: impl Into<String>,
        fetcher: Arc<dyn FeedFetcher>,
        forwarder: Arc<dyn Forwarder>,
        seen_cap: usize,
        seen_keep: usize,
    ) -> Self {
        Self {
            name: name.into(),
            fetcher,
            forwarder,
            dedup: Mutex::new(IdSetDedup::new(seen_cap, seen_keep)),
        }
    }

    /// Source name used in rendered messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of ids currently remembered.
    pub async fn seen_len(&self) -> usize {
        self.dedup.lock().await.seen().len()
    }
}

#[async_trait]
impl PollJob for FeedPoll {
    async fn poll(&self) -> anyhow::Result<()> {
        let mut dedup = self.dedup.lock().await;
        let batch = self.fetcher.fetch().await?;
        let fresh = dedup.select(&batch);
        if fresh.is_empty() {
            debug!(source = %self.name, fetched = batch.len(), "no new feed items");
            return Ok(());
        }

        let mut sent = 0_usize;
        for item in &fresh {
            match self.forwarder.send(&item.render(&self.name)).await {
                Ok(()) => {
                    dedup.commit(&item.id);
                    sent = sent.saturating_add(1);
                }
                Err(e) => {
                    warn!(source = %self.name, id = %item.id, error = %e, "forward failed, will retry");
                }
            }
        }

        let failed = fresh.len().saturating_sub(sent);
        info!(source = %self.name, sent, failed, "forwarded feed items");
        if failed > 0 {
            bail!("{failed} of {} items from {} were not forwarded", fresh.len(), self.name);
        }
        Ok(())
    }
}

/// Multi-channel source with per-channel cursor dedup.
///
/// Channels are polled independently: a failed fetch or forward in one
/// channel does not prevent the others from running. Channels seen on the
/// job's first run are primed without forwarding; channels that appear
/// later are new conversations and everything in them is forwarded.
pub struct ChannelPoll {
    name: String,
    fetcher: Arc<dyn ChannelFetcher>,
    forwarder: Arc<dyn Forwarder>,
    channel_ids: Option<Vec<String>>,
    batch_limit: usize,
    state: Mutex<ChannelState>,
}

#[derive(Debug, Default)]
struct ChannelState {
    dedup: CursorDedup,
    warmed_up: bool,
}

impl ChannelPoll {
    /// Create a job for the source `name`, fetching `batch_limit` per channel.
    pub fn new(
        name: impl Into<String>,
        fetcher: Arc<dyn ChannelFetcher>,
        forwarder: Arc<dyn Forwarder>,
        batch_limit: usize,
    ) -> Self {
        Self {
            name: name.into(),
            fetcher,
            forwarder,
            channel_ids: None,
            batch_limit,
            state: Mutex::new(ChannelState::default()),
        }
    }

    /// Poll a fixed channel list instead of asking the source.
    pub fn with_channels(mut self, channel_ids: Vec<String>) -> Self {
        self.channel_ids = Some(channel_ids);
        self
    }

    /// Number of channels observed so far.
    pub async fn channel_count(&self) -> usize {
        self.state.lock().await.dedup.channel_count()
    }

    async fn poll_channel(
        &self,
        dedup: &mut CursorDedup,
        channel: &str,
        cold_start: bool,
    ) -> anyhow::Result<()> {
        let batch = self.fetcher.fetch(channel, self.batch_limit).await?;

        if !dedup.is_observed(channel) {
            if cold_start {
                dedup.prime(channel, &batch);
                return Ok(());
            }
            debug!(source = %self.name, channel, "new channel discovered");
            dedup.observe(channel);
        }

        for message in dedup.select(channel, batch) {
            if let Err(e) = self.forwarder.send(&message.render(&self.name)).await {
                bail!("forward of message {} in {channel} failed: {e}", message.id);
            }
            dedup.commit(channel, &message);
            debug!(source = %self.name, channel, id = message.id, "forwarded message");
        }
        Ok(())
    }
}

#[async_trait]
impl PollJob for ChannelPoll {
    async fn poll(&self) -> anyhow::Result<()> {
        let channels = match &self.channel_ids {
            Some(ids) => ids.clone(),
            None => self.fetcher.channels().await?,
        };

        let mut state = self.state.lock().await;
        let cold_start = !state.warmed_up;
        state.warmed_up = true;
        let mut failures = Vec::new();
        for channel in &channels {
            if let Err(e) = self.poll_channel(&mut state.dedup, channel, cold_start).await {
                warn!(source = %self.name, channel = %channel, error = %e, "channel poll failed");
                failures.push(channel.clone());
            }
        }

        if !failures.is_empty() {
            bail!("{} channel(s) of {} failed: {}", failures.len(), self.name, failures.join(", "));
        }
        Ok(())
    }
}
