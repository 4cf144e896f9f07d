//! # NTBridge Core
//!
//! Frame, notice, record, and error types for the NTBridge host bridge.
//! This crate has **no runtime machinery**: it defines the domain model the
//! interceptor, correlator, synthesizer, and identity store are written against.
//!
//! ## Layout
//!
//! - [`frame`]: what crosses the host channel (calls, events, call tokens)
//! - [`channel`]: the host boundary traits the interceptor wraps
//! - [`event`]: synthesized notices and their bus
//! - [`message`]: message identity records
//! - [`member`]: roster and contact values
//! - [`identity`]: the local account

pub mod error;
pub mod frame;
pub mod channel;
pub mod commands;
pub mod event;
pub mod message;
pub mod member;
pub mod identity;

// Re-export key types at crate root for ergonomics
pub use error::{CallError, Error, HostError, ObserverError, SnapshotError, StoreError};
pub use frame::{CallFrame, CallToken, EventFrame, FrameHeader, InboundFrame};
pub use channel::{FrameSink, HostChannel, NullSink};
pub use event::{Notice, NoticeBus};
pub use message::{ChatType, MessageRecord, Peer};
pub use member::{Friend, Group, GroupMember, MemberRole};
pub use identity::SelfAccount;
