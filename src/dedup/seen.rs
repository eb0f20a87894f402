//! Size-bounded seen-id set for feed-style sources.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::types::FeedItem;

/// Default number of ids retained before trimming.
pub const DEFAULT_SEEN_CAP: usize = 1000;

/// Default number of ids kept after a trim.
pub const DEFAULT_SEEN_KEEP: usize = 500;

/// Set of seen item ids with a hard cap.
///
/// Once the set grows past `cap` it is trimmed to the `keep` most recently
/// inserted ids. Retention is lossy: an id dropped by a trim is treated as
/// new if the source ever returns it again.
#[derive(Debug, Clone)]
pub struct SeenItemSet {
    ids: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
    keep: usize,
}

impl SeenItemSet {
    /// Create an empty set. `keep` is clamped to `cap`.
    pub fn new(cap: usize, keep: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            cap,
            keep: keep.min(cap),
        }
    }

    /// Record an id. Returns `false` if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_owned());
        self.order.push_back(id.to_owned());

        if self.order.len() > self.cap {
            let before = self.order.len();
            while self.order.len() > self.keep {
                if let Some(oldest) = self.order.pop_front() {
                    self.ids.remove(&oldest);
                }
            }
            debug!(before, after = self.order.len(), "trimmed seen-id set");
        }
        true
    }

    /// Whether the id has been recorded (and not trimmed away).
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Number of ids currently retained.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SeenItemSet {
    fn default() -> Self {
        Self::new(DEFAULT_SEEN_CAP, DEFAULT_SEEN_KEEP)
    }
}

/// ID-set dedup engine for one feed.
///
/// The first batch after construction only primes the set: nothing is
/// forwarded, so a restart never replays the feed's backlog.
#[derive(Debug, Clone, Default)]
pub struct IdSetDedup {
    seen: SeenItemSet,
    primed: bool,
}

impl IdSetDedup {
    /// Create an engine with the given retention bounds.
    pub fn new(cap: usize, keep: usize) -> Self {
        Self {
            seen: SeenItemSet::new(cap, keep),
            primed: false,
        }
    }

    /// Select the items of `batch` that must be forwarded, oldest first.
    ///
    /// On the first call every id is absorbed into the seen set and the
    /// result is empty. Later calls return unseen items sorted by timestamp;
    /// items sharing a timestamp keep their fetch order. Duplicates inside
    /// one batch are returned once.
    pub fn select(&mut self, batch: &[FeedItem]) -> Vec<FeedItem> {
        if !self.primed {
            for item in batch {
                self.seen.insert(&item.id);
            }
            self.primed = true;
            debug!(absorbed = batch.len(), "primed seen-id set from first fetch");
            return Vec::new();
        }

        let mut fresh: Vec<FeedItem> = Vec::new();
        for item in batch {
            if !self.seen.contains(&item.id) && !fresh.iter().any(|f| f.id == item.id) {
                fresh.push(item.clone());
            }
        }
        fresh.sort_by_key(|item| item.timestamp);
        fresh
    }

    /// Mark an item as forwarded.
    pub fn commit(&mut self, id: &str) {
        self.seen.insert(id);
    }

    /// Whether the first batch has been absorbed.
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Read access to the underlying seen set.
    pub fn seen(&self) -> &SeenItemSet {
        &self.seen
    }
}
