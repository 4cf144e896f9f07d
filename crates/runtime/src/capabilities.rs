//! Host capabilities built on the correlator.
//!
//! Each wrapper knows which method to call and which event carries its
//! answer; the correlator does the rest.

use ntbridge_core::commands::{method, receive};
use ntbridge_core::error::CallError;
use ntbridge_core::member::{Group, GroupMember};
use ntbridge_core::message::Peer;
use ntbridge_hook::{Correlator, EventWait};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

/// `(updateType, groupList)`
type GroupListUpdate = (i64, Vec<Group>);

/// `(groupCode, changeType, members by uid)`
type MemberInfoChange = (String, i64, HashMap<String, GroupMember>);

/// Every group the account is in, as pushed by the next group-list update.
pub async fn get_groups(
    correlator: &Correlator,
    force_refresh: bool,
    timeout: Option<Duration>,
) -> Result<Vec<Group>, CallError> {
    let mut wait = EventWait::<GroupListUpdate>::new(receive::GROUPS);
    if let Some(timeout) = timeout {
        wait = wait.timeout(timeout);
    }
    let resolved = correlator
        .call_and_await(method::GET_GROUP_LIST, vec![json!(force_refresh)], wait)
        .await?;
    Ok(resolved.payload.1)
}

/// One member's info, fetched on demand.
///
/// The host answers with a member-info broadcast that may also carry other
/// groups' changes; only the one naming this group and uid resolves the call.
pub async fn get_group_member(
    correlator: &Correlator,
    group_code: &str,
    uid: &str,
    force_refresh: bool,
    timeout: Option<Duration>,
) -> Result<GroupMember, CallError> {
    let wanted_group = group_code.to_string();
    let wanted_uid = uid.to_string();
    let mut wait = EventWait::<MemberInfoChange>::new(receive::GROUP_MEMBER_INFO_UPDATE)
        .matching(move |(group, _, members)| *group == wanted_group && members.contains_key(&wanted_uid));
    if let Some(timeout) = timeout {
        wait = wait.timeout(timeout);
    }

    let resolved = correlator
        .call_and_await(
            method::GET_MEMBER_INFO,
            vec![json!(group_code), json!([uid]), json!(force_refresh)],
            wait,
        )
        .await?;
    let (_, _, mut members) = resolved.payload;
    members.remove(uid).ok_or_else(|| CallError::Payload {
        command: receive::GROUP_MEMBER_INFO_UPDATE.to_string(),
        reason: format!("member {uid} missing from matched payload"),
    })
}

/// Ask the host to treat `peer` as an active chat so its events keep flowing.
pub async fn activate_chat(correlator: &Correlator, peer: &Peer) -> Result<Value, CallError> {
    correlator
        .call(method::ACTIVATE_CHAT, vec![json!({"peer": peer, "cnt": 20}), Value::Null])
        .await
}
