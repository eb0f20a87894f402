//! Tests for per-channel cursor dedup.

use chrono::{DateTime, Utc};
use switchboard::dedup::{fingerprint, CursorDedup};
use switchboard::types::ChannelMessage;

fn msg(id: i64, text: &str) -> ChannelMessage {
    ChannelMessage {
        id,
        channel: "ops".to_owned(),
        text: text.to_owned(),
        timestamp: DateTime::<Utc>::UNIX_EPOCH,
        sender: Some("ana".to_owned()),
    }
}

fn ids(messages: &[ChannelMessage]) -> Vec<i64> {
    messages.iter().map(|m| m.id).collect()
}

#[test]
fn channel_without_cursor_reports_everything_new() {
    let dedup = CursorDedup::new();
    assert!(!dedup.is_observed("ops"));
    let fresh = dedup.select("ops", vec![msg(3, "c"), msg(1, "a"), msg(2, "b")]);
    assert_eq!(ids(&fresh), vec![1, 2, 3]);
}

#[test]
fn selects_messages_past_cursor_in_id_order() {
    let mut dedup = CursorDedup::new();
    dedup.commit("ops", &msg(10, "ten"));

    let fresh = dedup.select(
        "ops",
        vec![msg(9, "nine"), msg(11, "eleven"), msg(12, "twelve"), msg(10, "ten")],
    );
    assert_eq!(ids(&fresh), vec![11, 12]);
}

#[test]
fn edit_of_boundary_message_is_detected() {
    let mut dedup = CursorDedup::new();
    dedup.commit("ops", &msg(10, "deploy at 5"));

    assert!(!dedup.is_new("ops", &msg(10, "deploy at 5")));
    assert!(dedup.is_new("ops", &msg(10, "deploy at 6")));
    // Edits to older messages are not tracked.
    assert!(!dedup.is_new("ops", &msg(9, "changed")));
}

#[test]
fn prime_sets_cursor_from_newest_message() {
    let mut dedup = CursorDedup::new();
    assert!(dedup.prime("ops", &[msg(4, "d"), msg(7, "g"), msg(5, "e")]));

    let cursor = dedup.cursor("ops").expect("cursor");
    assert_eq!(cursor.last_id, 7);
    assert_eq!(cursor.fingerprint, fingerprint("g"));
    assert!(dedup.select("ops", vec![msg(7, "g")]).is_empty());
}

#[test]
fn prime_on_empty_batch_marks_channel_observed() {
    let mut dedup = CursorDedup::new();
    assert!(!dedup.prime("ops", &[]));
    assert!(dedup.is_observed("ops"));
    assert!(dedup.cursor("ops").is_none());
    assert_eq!(dedup.channel_count(), 1);

    // The first message after an empty start is new.
    assert_eq!(ids(&dedup.select("ops", vec![msg(1, "first")])), vec![1]);
}

#[test]
fn observe_keeps_existing_cursor() {
    let mut dedup = CursorDedup::new();
    dedup.commit("ops", &msg(5, "e"));
    dedup.observe("ops");
    assert_eq!(dedup.cursor("ops").map(|c| c.last_id), Some(5));
}

#[test]
fn cursors_are_per_channel() {
    let mut dedup = CursorDedup::new();
    dedup.commit("ops", &msg(100, "x"));
    dedup.commit("dev", &msg(2, "y"));

    assert!(dedup.is_new("dev", &msg(3, "z")));
    assert!(!dedup.is_new("ops", &msg(3, "z")));
    assert_eq!(dedup.channel_count(), 2);
}
