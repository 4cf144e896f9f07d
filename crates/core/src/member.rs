//! Roster and contact value types as pushed by the host.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role of a member inside a group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum MemberRole {
    #[default]
    Normal,
    Admin,
    Owner,
    Other(i64),
}

impl MemberRole {
    /// Admins and owners see membership changes through group notices.
    pub fn is_privileged(self) -> bool {
        matches!(self, MemberRole::Admin | MemberRole::Owner)
    }
}

impl From<i64> for MemberRole {
    fn from(value: i64) -> Self {
        match value {
            2 => MemberRole::Normal,
            3 => MemberRole::Admin,
            4 => MemberRole::Owner,
            other => MemberRole::Other(other),
        }
    }
}

impl From<MemberRole> for i64 {
    fn from(role: MemberRole) -> Self {
        match role {
            MemberRole::Normal => 2,
            MemberRole::Admin => 3,
            MemberRole::Owner => 4,
            MemberRole::Other(v) => v,
        }
    }
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberRole::Normal => write!(f, "member"),
            MemberRole::Admin => write!(f, "admin"),
            MemberRole::Owner => write!(f, "owner"),
            MemberRole::Other(v) => write!(f, "role({v})"),
        }
    }
}

/// A group member as carried in roster snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    #[serde(default)]
    pub uid: String,

    pub uin: String,

    #[serde(default)]
    pub nick: String,

    #[serde(default)]
    pub card_name: String,

    #[serde(default)]
    pub role: MemberRole,

    /// Every other field the host sends, kept so merges lose nothing
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GroupMember {
    pub fn new(uin: impl Into<String>, card_name: impl Into<String>, role: MemberRole) -> Self {
        let uin = uin.into();
        Self {
            uid: format!("u_{uin}"),
            uin,
            nick: String::new(),
            card_name: card_name.into(),
            role,
            extra: Map::new(),
        }
    }

    /// Fold a newer view of the same member into this one.
    pub fn merge(&mut self, newer: &GroupMember) {
        if !newer.uid.is_empty() {
            self.uid = newer.uid.clone();
        }
        if !newer.nick.is_empty() {
            self.nick = newer.nick.clone();
        }
        self.card_name = newer.card_name.clone();
        self.role = newer.role;
        merge_fields(&mut self.extra, &newer.extra);
    }
}

/// A group the local account belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub group_code: String,

    #[serde(default)]
    pub group_name: String,

    #[serde(default)]
    pub member_count: u32,

    #[serde(default)]
    pub max_member: u32,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A contact (friend) entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    #[serde(default)]
    pub uid: String,

    pub uin: String,

    #[serde(default)]
    pub nick: String,

    #[serde(default)]
    pub remark: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Friend {
    pub fn new(uid: impl Into<String>, uin: impl Into<String>, nick: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            uin: uin.into(),
            nick: nick.into(),
            remark: String::new(),
            extra: Map::new(),
        }
    }

    pub fn merge(&mut self, newer: &Friend) {
        if !newer.uid.is_empty() {
            self.uid = newer.uid.clone();
        }
        if !newer.nick.is_empty() {
            self.nick = newer.nick.clone();
        }
        if !newer.remark.is_empty() {
            self.remark = newer.remark.clone();
        }
        merge_fields(&mut self.extra, &newer.extra);
    }
}

/// Merge `newer` into `target`, skipping nulls so partial updates never erase.
pub fn merge_fields(target: &mut Map<String, Value>, newer: &Map<String, Value>) {
    for (key, value) in newer {
        if !value.is_null() {
            target.insert(key.clone(), value.clone());
        }
    }
}
