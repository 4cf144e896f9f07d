//! Error types for the NTBridge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all NTBridge operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Correlator / host call errors ---
    #[error("Call error: {0}")]
    Call(#[from] CallError),

    // --- Identity store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Observer errors ---
    #[error("Observer error: {0}")]
    Observer(#[from] ObserverError),

    // --- Snapshot diff errors ---
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

// --- Bounded context errors ---

/// A failure reported by the host itself for a call it received.
///
/// The bridge never interprets these; they are handed back to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("host returned status {status}: {message}")]
pub struct HostError {
    pub status: i32,
    pub message: String,
}

impl HostError {
    pub fn new(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error("Timed out after {timeout_ms}ms waiting for {command}")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("Host call {method} failed: {source}")]
    Host {
        method: String,
        #[source]
        source: HostError,
    },

    #[error("Channel closed while waiting for {0}")]
    ChannelClosed(String),

    #[error("Payload for {command} could not be decoded: {reason}")]
    Payload { command: String, reason: String },
}

impl CallError {
    /// Whether this error is a correlation timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. })
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store not initialized yet, retry later")]
    NotReady,

    #[error("No mapping for {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted entry at {key}: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("Short id cursor exhausted at {0}")]
    CursorExhausted(i32),
}

impl StoreError {
    /// Whether the caller should retry or queue the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::NotReady)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum ObserverError {
    #[error("Observer for {target} failed: {reason}")]
    Failed { target: String, reason: String },

    #[error("Observer for {target} panicked")]
    Panicked { target: String },
}

#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    #[error("Malformed {command} snapshot: {reason}")]
    Malformed { command: String, reason: String },
}
