//! # NTBridge Notice
//!
//! The host pushes full snapshots of mutable collections (group rosters,
//! the contact list) rather than deltas. This crate holds the last snapshot
//! per scope and publishes a [`Notice`](ntbridge_core::Notice) for each
//! change it can reconstruct.
//!
//! Synthesis is best-effort: transitions hidden by out-of-order or skipped
//! snapshots are lost.

pub mod contacts;
pub mod payload;
pub mod roster;
pub mod synthesizer;

pub use contacts::ContactBook;
pub use roster::{DiffPolicy, Roster};
pub use synthesizer::{SNAPSHOT_COMMANDS, Synthesizer};
