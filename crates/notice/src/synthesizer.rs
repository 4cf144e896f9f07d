//! The synthesizer: owns held snapshots and turns new ones into notices.

use ntbridge_config::NoticeConfig;
use ntbridge_core::commands::receive;
use ntbridge_core::event::{Notice, NoticeBus};
use ntbridge_core::frame::EventFrame;
use ntbridge_core::identity::SelfAccount;
use ntbridge_core::member::{Friend, GroupMember, MemberRole};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::contacts::ContactBook;
use crate::payload;
use crate::roster::{DiffPolicy, Roster};

/// Commands the synthesizer consumes.
pub const SNAPSHOT_COMMANDS: [&str; 3] = [
    receive::GROUP_MEMBER_LIST,
    receive::GROUP_MEMBER_INFO_UPDATE,
    receive::FRIENDS,
];

pub struct Synthesizer {
    account: Arc<SelfAccount>,
    suppress_when_privileged: bool,
    bus: Arc<NoticeBus>,
    rosters: RwLock<HashMap<String, Roster>>,
    contacts: RwLock<ContactBook>,
}

impl Synthesizer {
    pub fn new(account: Arc<SelfAccount>, bus: Arc<NoticeBus>, config: &NoticeConfig) -> Self {
        Self {
            account,
            suppress_when_privileged: config.suppress_when_privileged,
            bus,
            rosters: RwLock::new(HashMap::new()),
            contacts: RwLock::new(ContactBook::default()),
        }
    }

    pub fn bus(&self) -> &Arc<NoticeBus> {
        &self.bus
    }

    fn publish(&self, notices: &[Notice]) {
        for notice in notices {
            info!(notice = ?notice, scope = notice.scope(), subject = notice.subject(), "Notice synthesized");
            self.bus.publish(notice.clone());
        }
    }

    /// Diff a full roster snapshot for `group_code` and replace the held one.
    ///
    /// The first snapshot of a group is the baseline and yields nothing.
    pub async fn apply_roster_snapshot(
        &self,
        group_code: &str,
        members: Vec<GroupMember>,
    ) -> Vec<Notice> {
        let next = Roster::from_members(members);
        let self_uin = self.account.uin();
        let notices = {
            let mut rosters = self.rosters.write().await;
            match rosters.get_mut(group_code) {
                Some(held) => held.apply_snapshot(
                    group_code,
                    next,
                    DiffPolicy {
                        self_uin: self_uin.as_deref(),
                        suppress_when_privileged: self.suppress_when_privileged,
                    },
                ),
                None => {
                    debug!(group_code, members = next.len(), "Roster baseline recorded");
                    rosters.insert(group_code.to_string(), next);
                    Vec::new()
                }
            }
        };
        self.publish(&notices);
        notices
    }

    /// Fold a partial member update into the held roster of `group_code`.
    pub async fn apply_member_update(
        &self,
        group_code: &str,
        members: Vec<GroupMember>,
    ) -> Vec<Notice> {
        let notices = {
            let mut rosters = self.rosters.write().await;
            match rosters.get_mut(group_code) {
                Some(held) => held.apply_update(group_code, members),
                None => {
                    debug!(group_code, "Member update for a group with no held roster");
                    Vec::new()
                }
            }
        };
        self.publish(&notices);
        notices
    }

    /// Merge a contact snapshot.
    pub async fn apply_contacts(&self, friends: Vec<Friend>) -> Vec<Notice> {
        let notices = self.contacts.write().await.apply(friends);
        self.publish(&notices);
        notices
    }

    /// Route one event. Malformed snapshots are logged and change nothing.
    pub async fn handle(&self, event: &EventFrame) -> Vec<Notice> {
        let outcome = match event.command.as_str() {
            receive::GROUP_MEMBER_LIST => match payload::roster(event) {
                Ok((group, members)) => Ok(self.apply_roster_snapshot(&group, members).await),
                Err(e) => Err(e),
            },
            receive::GROUP_MEMBER_INFO_UPDATE => match payload::member_update(event) {
                Ok((group, members)) => Ok(self.apply_member_update(&group, members).await),
                Err(e) => Err(e),
            },
            receive::FRIENDS => match payload::contacts(event) {
                Ok(friends) => Ok(self.apply_contacts(friends).await),
                Err(e) => Err(e),
            },
            _ => Ok(Vec::new()),
        };
        outcome.unwrap_or_else(|e| {
            warn!(error = %e, "Snapshot ignored");
            Vec::new()
        })
    }

    /// Consume the event stream until it closes.
    pub fn spawn(self: &Arc<Self>, mut events: broadcast::Receiver<Arc<EventFrame>>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if SNAPSHOT_COMMANDS.contains(&event.command.as_str()) {
                            this.handle(&event).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Synthesizer fell behind, snapshots lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub async fn is_friend(&self, uid: &str) -> bool {
        self.contacts.read().await.contains_uid(uid)
    }

    pub async fn contact_count(&self) -> usize {
        self.contacts.read().await.len()
    }

    pub async fn member(&self, group_code: &str, uin: &str) -> Option<GroupMember> {
        self.rosters
            .read()
            .await
            .get(group_code)
            .and_then(|r| r.get(uin).cloned())
    }

    /// The local account's role in `group_code`, if its roster is held.
    pub async fn self_role(&self, group_code: &str) -> Option<MemberRole> {
        let uin = self.account.uin()?;
        self.rosters.read().await.get(group_code)?.role_of(&uin)
    }

    pub async fn roster_len(&self, group_code: &str) -> Option<usize> {
        self.rosters.read().await.get(group_code).map(Roster::len)
    }
}
