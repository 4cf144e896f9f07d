//! The synthesizer driven from a raw event stream, as the bridge runs it.

use ntbridge_config::NoticeConfig;
use ntbridge_core::commands::receive;
use ntbridge_core::event::{Notice, NoticeBus};
use ntbridge_core::frame::EventFrame;
use ntbridge_core::identity::SelfAccount;
use ntbridge_core::member::MemberRole;
use ntbridge_notice::Synthesizer;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Harness {
    events: broadcast::Sender<Arc<EventFrame>>,
    notices: broadcast::Receiver<Arc<Notice>>,
    synthesizer: Arc<Synthesizer>,
}

fn harness(self_uin: &str, config: NoticeConfig) -> Harness {
    let (events, rx) = broadcast::channel(64);
    let bus = Arc::new(NoticeBus::new(64));
    let notices = bus.subscribe();
    let synthesizer = Arc::new(Synthesizer::new(
        Arc::new(SelfAccount::known(self_uin, format!("u_{self_uin}"))),
        bus,
        &config,
    ));
    synthesizer.spawn(rx);
    Harness {
        events,
        notices,
        synthesizer,
    }
}

impl Harness {
    fn push(&self, command: &str, payload: Value) {
        self.events
            .send(Arc::new(EventFrame::new(command, payload)))
            .unwrap();
    }

    fn roster(&self, group: &str, members: Value) {
        self.push(
            receive::GROUP_MEMBER_LIST,
            json!({"sceneId": format!("{group}_groupMemberList_MainWindow"), "infos": members}),
        );
    }

    async fn next_notice(&mut self) -> Arc<Notice> {
        tokio::time::timeout(Duration::from_secs(1), self.notices.recv())
            .await
            .expect("no notice within 1s")
            .unwrap()
    }

    async fn drain(&self) {
        // A marker snapshot on a throwaway group; once its roster is held
        // every earlier frame has been handled.
        self.roster("drain", json!([]));
        tokio::time::timeout(Duration::from_secs(1), async {
            while self.synthesizer.roster_len("drain").await.is_none() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn member_left_then_card_change() {
    let mut h = harness("100", NoticeConfig::default());

    h.roster("42", json!([{"uin": "A"}, {"uin": "B"}, {"uin": "C"}, {"uin": "100", "role": 2}]));
    h.roster("42", json!([{"uin": "A"}, {"uin": "C"}, {"uin": "100", "role": 2}]));

    let left = h.next_notice().await;
    assert!(matches!(&*left, Notice::MemberLeft { group_code, uin, .. } if group_code == "42" && uin == "B"));

    h.roster("42", json!([{"uin": "A", "cardName": "x"}, {"uin": "C"}, {"uin": "100"}]));
    let card = h.next_notice().await;
    assert!(matches!(&*card, Notice::CardChanged { uin, before, after, .. }
        if uin == "A" && before.is_empty() && after == "x"));

    h.drain().await;
    assert!(h.notices.try_recv().is_err());
}

#[tokio::test]
async fn privileged_self_sees_no_member_left() {
    let mut h = harness("100", NoticeConfig::default());
    h.roster("42", json!([{"uin": "A"}, {"uin": "B"}, {"uin": "100", "role": 3}]));
    h.roster("42", json!([{"uin": "A"}, {"uin": "100", "role": 3}]));
    h.drain().await;
    assert!(h.notices.try_recv().is_err());
    assert_eq!(h.synthesizer.self_role("42").await, Some(MemberRole::Admin));
}

#[tokio::test]
async fn role_change_from_partial_update() {
    let mut h = harness("100", NoticeConfig::default());
    h.roster("42", json!([{"uin": "A", "role": 2}]));
    h.push(
        receive::GROUP_MEMBER_INFO_UPDATE,
        json!(["42", 1, {"u_A": {"uid": "u_A", "uin": "A", "role": 3}}]),
    );
    let role = h.next_notice().await;
    assert!(matches!(
        &*role,
        Notice::RoleChanged {
            before: MemberRole::Normal,
            after: MemberRole::Admin,
            ..
        }
    ));
}

#[tokio::test]
async fn malformed_frames_do_not_stop_the_stream() {
    let mut h = harness("100", NoticeConfig::default());
    h.push(receive::FRIENDS, json!("not a contact list"));
    h.push(receive::GROUP_MEMBER_INFO_UPDATE, json!({"members": 3}));
    h.push(receive::FRIENDS, json!({"data": [{"buddyList": [{"uid": "u_1", "uin": "1"}]}]}));
    h.push(receive::FRIENDS, json!({"data": [{"buddyList": [{"uid": "u_2", "uin": "2"}]}]}));

    let added = h.next_notice().await;
    assert_eq!(added.subject(), "2");
    assert!(h.synthesizer.is_friend("u_1").await);
}
