//! Message identity records and chat peers.
//!
//! A message can be addressed three ways: by its long host id (authoritative),
//! by the compact short id the external protocol uses, and by the host's
//! sequence id (reusable over time). [`MessageRecord`] carries all three plus
//! whatever else the host told us about the message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::member::merge_fields;

/// Chat kinds as numbered by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ChatType {
    #[default]
    Friend,
    Group,
    Temp,
    Other(i64),
}

impl From<i64> for ChatType {
    fn from(value: i64) -> Self {
        match value {
            1 => ChatType::Friend,
            2 => ChatType::Group,
            100 => ChatType::Temp,
            other => ChatType::Other(other),
        }
    }
}

impl From<ChatType> for i64 {
    fn from(kind: ChatType) -> Self {
        match kind {
            ChatType::Friend => 1,
            ChatType::Group => 2,
            ChatType::Temp => 100,
            ChatType::Other(v) => v,
        }
    }
}

/// A chat the host can address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub chat_type: ChatType,
    pub peer_uid: String,
    #[serde(default)]
    pub guild_id: String,
}

impl Peer {
    pub fn new(chat_type: ChatType, peer_uid: impl Into<String>) -> Self {
        Self {
            chat_type,
            peer_uid: peer_uid.into(),
            guild_id: String::new(),
        }
    }
}

/// One observed message and its identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Long host identifier
    pub msg_id: String,

    /// Compact identifier, assigned by the identity store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_short_id: Option<i32>,

    /// Host sequence identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_seq: Option<String>,

    /// The rest of the host payload
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl MessageRecord {
    pub fn new(msg_id: impl Into<String>) -> Self {
        Self {
            msg_id: msg_id.into(),
            msg_short_id: None,
            msg_seq: None,
            fields: Map::new(),
        }
    }

    pub fn with_seq(mut self, seq: impl Into<String>) -> Self {
        self.msg_seq = Some(seq.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Merge a newer partial view into a copy of this record.
    ///
    /// The short id is never taken from `newer`; it is stable once assigned.
    /// Absent or null fields in `newer` leave known values untouched.
    pub fn merged(&self, newer: &MessageRecord) -> MessageRecord {
        let mut out = self.clone();
        if let Some(seq) = &newer.msg_seq {
            out.msg_seq = Some(seq.clone());
        }
        merge_fields(&mut out.fields, &newer.fields);
        out
    }
}
