//! Group roster state and diffing.

use chrono::Utc;
use ntbridge_core::event::Notice;
use ntbridge_core::member::{GroupMember, MemberRole};
use std::collections::BTreeMap;

/// The last full roster seen for one group, keyed by uin.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    members: BTreeMap<String, GroupMember>,
}

/// How a new snapshot should be diffed against the held one.
#[derive(Debug, Clone, Copy)]
pub struct DiffPolicy<'a> {
    pub self_uin: Option<&'a str>,
    /// Skip member-left synthesis when the local account is admin or owner.
    pub suppress_when_privileged: bool,
}

impl Roster {
    pub fn from_members(members: impl IntoIterator<Item = GroupMember>) -> Self {
        Self {
            members: members.into_iter().map(|m| (m.uin.clone(), m)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, uin: &str) -> Option<&GroupMember> {
        self.members.get(uin)
    }

    pub fn role_of(&self, uin: &str) -> Option<MemberRole> {
        self.members.get(uin).map(|m| m.role)
    }

    /// Diff a full snapshot against this roster, then replace it.
    pub fn apply_snapshot(
        &mut self,
        group_code: &str,
        next: Roster,
        policy: DiffPolicy<'_>,
    ) -> Vec<Notice> {
        let now = Utc::now();
        let mut notices = Vec::new();

        let privileged = policy
            .self_uin
            .and_then(|uin| self.role_of(uin).or_else(|| next.role_of(uin)))
            .is_some_and(MemberRole::is_privileged);
        let report_left = !(policy.suppress_when_privileged && privileged);

        for (uin, held) in &self.members {
            match next.members.get(uin) {
                None => {
                    if report_left && policy.self_uin != Some(uin.as_str()) {
                        notices.push(Notice::MemberLeft {
                            group_code: group_code.to_string(),
                            uin: uin.clone(),
                            timestamp: now,
                        });
                    }
                }
                Some(current) => field_changes(group_code, held, current, &mut notices),
            }
        }

        *self = next;
        notices
    }

    /// Fold a partial update into the roster. Only members already held are
    /// compared and merged; a partial update never implies anyone left.
    pub fn apply_update(&mut self, group_code: &str, updates: Vec<GroupMember>) -> Vec<Notice> {
        let mut notices = Vec::new();
        for update in updates {
            if let Some(held) = self.members.get_mut(&update.uin) {
                field_changes(group_code, held, &update, &mut notices);
                held.merge(&update);
            }
        }
        notices
    }
}

fn field_changes(group_code: &str, held: &GroupMember, current: &GroupMember, out: &mut Vec<Notice>) {
    let now = Utc::now();
    if held.card_name != current.card_name {
        out.push(Notice::CardChanged {
            group_code: group_code.to_string(),
            uin: current.uin.clone(),
            before: held.card_name.clone(),
            after: current.card_name.clone(),
            timestamp: now,
        });
    }
    if held.role != current.role {
        out.push(Notice::RoleChanged {
            group_code: group_code.to_string(),
            uin: current.uin.clone(),
            before: held.role,
            after: current.role,
            timestamp: now,
        });
    }
}
