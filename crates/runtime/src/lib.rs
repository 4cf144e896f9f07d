//! # NTBridge Runtime
//!
//! [`Bridge`] wires one host channel to the interceptor, correlator, identity
//! store and notice synthesizer, installs the standing hooks, and owns every
//! background task until [`Bridge::shutdown`].
//!
//! ## Standing hooks
//!
//! - [`feed`]: message events allocate or update identities; self-status
//!   events track whether the account is online
//! - [`keep_active`]: recent contacts are activated once, deactivated chats
//!   are re-activated
//!
//! [`capabilities`] holds the host calls built on the correlator.

pub mod bridge;
pub mod capabilities;
pub mod feed;
pub mod keep_active;

pub use bridge::Bridge;
