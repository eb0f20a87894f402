//! Switchboard: bridges messaging and vault platforms to one downstream agent.
//!
//! The crate keeps vendored tool servers alive ([`supervisor`]), drives a
//! stateful password-vault CLI through a serialized queue ([`vault`]), and
//! polls external sources on a schedule ([`poller`], [`sources`]),
//! forwarding every new item exactly once ([`dedup`]). The
//! [`orchestrator`] owns all of it and reports [`health`].
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod logging;

pub mod dedup;
pub mod poller;
pub mod sources;
pub mod supervisor;
pub mod types;
pub mod vault;

pub mod health;
pub mod orchestrator;
