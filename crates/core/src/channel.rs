//! Host channel boundary: the two paths the bridge taps.
//!
//! The host exchanges calls and events with its own listeners over a single
//! bidirectional channel. [`HostChannel`] is the outbound path (callers → host)
//! and [`FrameSink`] is the host's own inbound consumer (host → listeners).
//! Both are supplied by whoever embeds the bridge; the interceptor wraps them.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HostError;
use crate::frame::{CallFrame, InboundFrame};

/// The outbound path into the host.
#[async_trait]
pub trait HostChannel: Send + Sync {
    /// Human-readable channel name (used in logs).
    fn name(&self) -> &str;

    /// Invoke a host method and return the host's immediate return value.
    ///
    /// A non-zero host status surfaces as [`HostError`] and is passed back to
    /// the caller unchanged.
    async fn invoke(&self, call: CallFrame) -> std::result::Result<Value, HostError>;
}

/// The host's own consumers of inbound frames.
///
/// The interceptor forwards every frame here exactly as received.
pub trait FrameSink: Send + Sync {
    fn forward(&self, frame: &InboundFrame);
}

/// A sink that drops frames, for embedders with no downstream consumer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn forward(&self, _frame: &InboundFrame) {}
}
