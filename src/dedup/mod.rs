//! Deduplication engines deciding which fetched items are new.
//!
//! Both engines follow the same discipline: selection never mutates what
//! counts as "seen"; an item is committed only after its forward succeeded,
//! so a failed forward is retried on the next poll (at-least-once delivery).
//!
//! - [`seen::IdSetDedup`] for feed-style sources with opaque ids.
//! - [`cursor::CursorDedup`] for per-channel sources with increasing ids.

pub mod cursor;
pub mod seen;

pub use cursor::{fingerprint, CursorDedup};
pub use seen::{IdSetDedup, SeenItemSet};
