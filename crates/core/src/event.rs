//! Synthesized notices: discrete changes reconstructed from host snapshots.
//!
//! The host only pushes full snapshots; the synthesizer diffs them and
//! publishes one [`Notice`] per detected change. Consumers (the protocol
//! translator) subscribe to the [`NoticeBus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::member::MemberRole;

/// All notices the synthesizer can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// A member present in the held roster is absent from the new one
    MemberLeft {
        group_code: String,
        uin: String,
        timestamp: DateTime<Utc>,
    },

    /// A member's group card changed
    CardChanged {
        group_code: String,
        uin: String,
        before: String,
        after: String,
        timestamp: DateTime<Utc>,
    },

    /// A member's role changed
    RoleChanged {
        group_code: String,
        uin: String,
        before: MemberRole,
        after: MemberRole,
        timestamp: DateTime<Utc>,
    },

    /// A contact appeared that the held list did not have
    ContactAdded {
        uin: String,
        uid: String,
        timestamp: DateTime<Utc>,
    },
}

impl Notice {
    /// The scope the notice belongs to: a group code, or `"contacts"`.
    pub fn scope(&self) -> &str {
        match self {
            Notice::MemberLeft { group_code, .. }
            | Notice::CardChanged { group_code, .. }
            | Notice::RoleChanged { group_code, .. } => group_code,
            Notice::ContactAdded { .. } => "contacts",
        }
    }

    /// The identifier of the affected member or contact.
    pub fn subject(&self) -> &str {
        match self {
            Notice::MemberLeft { uin, .. }
            | Notice::CardChanged { uin, .. }
            | Notice::RoleChanged { uin, .. }
            | Notice::ContactAdded { uin, .. } => uin,
        }
    }
}

/// A broadcast-based bus for synthesized notices.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct NoticeBus {
    sender: broadcast::Sender<Arc<Notice>>,
}

impl NoticeBus {
    /// Create a new notice bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a notice to all subscribers.
    pub fn publish(&self, notice: Notice) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(notice));
    }

    /// Subscribe to receive notices.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Notice>> {
        self.sender.subscribe()
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new(256)
    }
}
