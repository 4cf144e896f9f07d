//! # NTBridge Hook
//!
//! The bridge's only contact with the host process.
//!
//! - [`Interceptor`] taps the host channel's outbound call path and inbound
//!   frame path, offering traffic to registered observers without altering it
//! - [`Correlator`] turns "issue a call, then wait for some later event" into
//!   an ordinary awaitable request with a typed payload and a deadline

pub mod correlator;
pub mod interceptor;

pub use correlator::{Correlated, Correlator, EventWait};
pub use interceptor::{Interceptor, NameFilter, ObserverHandle, ObserverResult};
