//! Wire shapes of the snapshot events the synthesizer consumes.
//!
//! The host is not consistent about layout: member collections arrive either
//! as a uid-keyed map or a plain list, member-info changes arrive either as an
//! object or as positional fields, and the contact list has two generations.

use ntbridge_core::error::SnapshotError;
use ntbridge_core::frame::EventFrame;
use ntbridge_core::member::{Friend, GroupMember};
use serde::Deserialize;
use std::collections::HashMap;

/// A member collection, in either layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MemberSet {
    ByUid(HashMap<String, GroupMember>),
    List(Vec<GroupMember>),
}

impl MemberSet {
    pub fn into_members(self) -> Vec<GroupMember> {
        match self {
            MemberSet::ByUid(map) => map.into_values().collect(),
            MemberSet::List(list) => list,
        }
    }
}

/// A full roster snapshot for one group.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterPayload {
    #[serde(default)]
    group_code: Option<String>,

    /// `<groupCode>_groupMemberList_<window>`
    #[serde(default)]
    scene_id: Option<String>,

    infos: MemberSet,
}

/// A partial member update for one group.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MemberUpdatePayload {
    Object {
        #[serde(rename = "groupCode")]
        group_code: String,
        members: MemberSet,
    },
    Positional(String, i64, MemberSet),
}

#[derive(Debug, Clone, Deserialize)]
struct SimpleInfo {
    #[serde(rename = "coreInfo")]
    core_info: Friend,
}

#[derive(Debug, Clone, Deserialize)]
struct Category {
    #[serde(rename = "buddyList", default)]
    buddy_list: Vec<Friend>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ContactsPayload {
    Simple {
        #[serde(rename = "userSimpleInfos")]
        user_simple_infos: HashMap<String, SimpleInfo>,
    },
    Categories {
        data: Vec<Category>,
    },
}

fn malformed(event: &EventFrame, reason: impl ToString) -> SnapshotError {
    SnapshotError::Malformed {
        command: event.command.clone(),
        reason: reason.to_string(),
    }
}

/// Decode a roster snapshot into `(group_code, members)`.
pub fn roster(event: &EventFrame) -> Result<(String, Vec<GroupMember>), SnapshotError> {
    let payload: RosterPayload = event.decode().map_err(|e| malformed(event, e))?;
    let group_code = payload
        .group_code
        .filter(|g| !g.is_empty())
        .or_else(|| {
            payload
                .scene_id
                .as_deref()
                .and_then(|scene| scene.split('_').next())
                .filter(|g| !g.is_empty())
                .map(str::to_string)
        })
        .ok_or_else(|| malformed(event, "no group code or scene id"))?;
    Ok((group_code, payload.infos.into_members()))
}

/// Decode a partial member update into `(group_code, members)`.
pub fn member_update(event: &EventFrame) -> Result<(String, Vec<GroupMember>), SnapshotError> {
    let payload: MemberUpdatePayload = event.decode().map_err(|e| malformed(event, e))?;
    Ok(match payload {
        MemberUpdatePayload::Object {
            group_code,
            members,
        } => (group_code, members.into_members()),
        MemberUpdatePayload::Positional(group_code, _change_type, members) => {
            (group_code, members.into_members())
        }
    })
}

/// Decode either contact-list layout into a flat list.
pub fn contacts(event: &EventFrame) -> Result<Vec<Friend>, SnapshotError> {
    let payload: ContactsPayload = event.decode().map_err(|e| malformed(event, e))?;
    Ok(match payload {
        ContactsPayload::Simple { user_simple_infos } => user_simple_infos
            .into_values()
            .map(|info| info.core_info)
            .collect(),
        ContactsPayload::Categories { data } => {
            data.into_iter().flat_map(|c| c.buddy_list).collect()
        }
    })
}
