//! Keep chats active.
//!
//! The host only pushes message events for chats it considers active. Two
//! hooks keep that set populated: newly seen recent contacts get activated
//! once, and a chat the host deactivates is re-activated after a short delay.
//! A contact whose activation fails, or whose chat the host deactivates, is
//! forgotten so a later recent-contact update activates it again.

use ntbridge_core::commands::{method, receive};
use ntbridge_core::frame::CallFrame;
use ntbridge_core::message::{ChatType, Peer};
use ntbridge_hook::{Correlator, NameFilter, ObserverHandle};
use ntbridge_notice::Synthesizer;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::capabilities::activate_chat;

/// Delay before re-activating a chat the host just deactivated.
pub const REACTIVATE_DELAY: Duration = Duration::from_secs(1);

/// Activated contacts remembered before the set starts over.
const MAX_TRACKED: usize = 4096;

type Activated = Arc<Mutex<HashSet<String>>>;

fn tracked(activated: &Activated) -> std::sync::MutexGuard<'_, HashSet<String>> {
    activated.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentContacts {
    #[serde(default)]
    changed_recent_contact_lists: Vec<RecentContactList>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentContactList {
    #[serde(default)]
    changed_list: Vec<ChangedContact>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangedContact {
    id: String,
    chat_type: ChatType,
}

/// The peer uid of a delete-active-chat call: either a bare string or an
/// object carrying `peerUid`.
fn deleted_peer_uid(call: &CallFrame) -> Option<String> {
    match call.args.first()? {
        Value::String(uid) => Some(uid.clone()),
        other => other.get("peerUid")?.as_str().map(str::to_string),
    }
}

/// Numeric peers are groups, known contacts are friends, the rest are temp.
pub async fn classify_peer(peer_uid: &str, synthesizer: &Synthesizer) -> ChatType {
    if !peer_uid.is_empty() && peer_uid.bytes().all(|b| b.is_ascii_digit()) {
        ChatType::Group
    } else if synthesizer.is_friend(peer_uid).await {
        ChatType::Friend
    } else {
        ChatType::Temp
    }
}

/// Register both hooks. The correlator is held weakly so the registrations
/// do not keep it alive.
pub fn install(
    correlator: &Arc<Correlator>,
    synthesizer: Arc<Synthesizer>,
    delay: Duration,
) -> Vec<ObserverHandle> {
    let interceptor = correlator.interceptor().clone();
    let mut handles = Vec::new();
    let activated: Activated = Arc::new(Mutex::new(HashSet::new()));

    let weak: Weak<Correlator> = Arc::downgrade(correlator);
    let forget = activated.clone();
    handles.push(interceptor.on_call(
        NameFilter::new([method::DELETE_ACTIVE_CHAT]),
        move |call| {
            let correlator = weak.clone();
            let synthesizer = synthesizer.clone();
            let forget = forget.clone();
            async move {
                let Some(peer_uid) = deleted_peer_uid(&call) else {
                    return Ok(());
                };
                tracked(&forget).remove(&peer_uid);
                let chat_type = classify_peer(&peer_uid, &synthesizer).await;
                tokio::time::sleep(delay).await;
                let Some(correlator) = correlator.upgrade() else {
                    return Ok(());
                };
                let peer = Peer::new(chat_type, peer_uid);
                let ret = activate_chat(&correlator, &peer).await?;
                info!(peer = %peer.peer_uid, chat_type = ?peer.chat_type, result = %ret, "Chat re-activated");
                Ok(())
            }
        },
    ));

    let weak: Weak<Correlator> = Arc::downgrade(correlator);
    handles.push(interceptor.on_event(
        NameFilter::new([receive::RECENT_CONTACT]),
        move |event| {
            let correlator = weak.clone();
            let activated = activated.clone();
            async move {
                let payload: RecentContacts = event.decode()?;
                let Some(correlator) = correlator.upgrade() else {
                    return Ok(());
                };
                // Claimed up front so a concurrent update does not activate
                // the same contact twice; released again on failure.
                let fresh: Vec<ChangedContact> = {
                    let mut seen = tracked(&activated);
                    if seen.len() >= MAX_TRACKED {
                        debug!(tracked = seen.len(), "Activated contact set reset");
                        seen.clear();
                    }
                    payload
                        .changed_recent_contact_lists
                        .into_iter()
                        .flat_map(|list| list.changed_list)
                        .filter(|contact| seen.insert(contact.id.clone()))
                        .collect()
                };
                let mut first_error = None;
                for contact in fresh {
                    let peer = Peer::new(contact.chat_type, contact.id);
                    match activate_chat(&correlator, &peer).await {
                        Ok(_) => debug!(peer = %peer.peer_uid, "Recent contact activated"),
                        Err(e) => {
                            tracked(&activated).remove(&peer.peer_uid);
                            warn!(peer = %peer.peer_uid, error = %e, "Recent contact activation failed");
                            first_error.get_or_insert(e);
                        }
                    }
                }
                match first_error {
                    Some(e) => Err(e.into()),
                    None => Ok(()),
                }
            }
        },
    ));

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntbridge_config::NoticeConfig;
    use ntbridge_core::event::NoticeBus;
    use ntbridge_core::identity::SelfAccount;
    use ntbridge_core::member::Friend;
    use serde_json::json;

    #[test]
    fn deleted_peer_from_either_shape() {
        let bare = CallFrame::new(method::DELETE_ACTIVE_CHAT, vec![json!("u_abc")]);
        assert_eq!(deleted_peer_uid(&bare).as_deref(), Some("u_abc"));

        let object = CallFrame::new(method::DELETE_ACTIVE_CHAT, vec![json!({"peerUid": "123"})]);
        assert_eq!(deleted_peer_uid(&object).as_deref(), Some("123"));

        assert_eq!(deleted_peer_uid(&CallFrame::new(method::DELETE_ACTIVE_CHAT, vec![])), None);
    }

    #[tokio::test]
    async fn peers_are_classified() {
        let synthesizer = Synthesizer::new(
            Arc::new(SelfAccount::new()),
            Arc::new(NoticeBus::default()),
            &NoticeConfig::default(),
        );
        synthesizer
            .apply_contacts(vec![Friend::new("u_friend", "5", "f")])
            .await;

        assert_eq!(classify_peer("123456", &synthesizer).await, ChatType::Group);
        assert_eq!(classify_peer("u_friend", &synthesizer).await, ChatType::Friend);
        assert_eq!(classify_peer("u_stranger", &synthesizer).await, ChatType::Temp);
        assert_eq!(classify_peer("", &synthesizer).await, ChatType::Temp);
    }
}
