//! Contact list state and diffing.

use chrono::Utc;
use ntbridge_core::event::Notice;
use ntbridge_core::member::Friend;
use std::collections::BTreeMap;

/// Every contact seen so far, keyed by uin. Contacts are never dropped.
#[derive(Debug, Clone, Default)]
pub struct ContactBook {
    friends: BTreeMap<String, Friend>,
    baseline: bool,
}

impl ContactBook {
    pub fn len(&self) -> usize {
        self.friends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.friends.is_empty()
    }

    pub fn contains_uid(&self, uid: &str) -> bool {
        self.friends.values().any(|f| f.uid == uid)
    }

    pub fn get(&self, uin: &str) -> Option<&Friend> {
        self.friends.get(uin)
    }

    /// Merge a contact snapshot. The first snapshot only establishes the
    /// baseline; after that each unseen uin yields one `ContactAdded`.
    pub fn apply(&mut self, snapshot: Vec<Friend>) -> Vec<Notice> {
        let now = Utc::now();
        let report = self.baseline;
        self.baseline = true;

        let mut notices = Vec::new();
        for friend in snapshot {
            match self.friends.get_mut(&friend.uin) {
                Some(held) => held.merge(&friend),
                None => {
                    if report {
                        notices.push(Notice::ContactAdded {
                            uin: friend.uin.clone(),
                            uid: friend.uid.clone(),
                            timestamp: now,
                        });
                    }
                    self.friends.insert(friend.uin.clone(), friend);
                }
            }
        }
        notices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_snapshot_is_baseline() {
        let mut book = ContactBook::default();
        let notices = book.apply(vec![Friend::new("u_1", "1", "one")]);
        assert!(notices.is_empty());
        assert_eq!(book.len(), 1);
        assert!(book.contains_uid("u_1"));
    }

    #[test]
    fn new_uin_is_added_and_existing_merged() {
        let mut book = ContactBook::default();
        book.apply(vec![Friend::new("u_1", "1", "one")]);

        let mut renamed = Friend::new("u_1", "1", "");
        renamed.remark = "bestie".into();
        let notices = book.apply(vec![renamed, Friend::new("u_2", "2", "two")]);

        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].subject(), "2");
        assert_eq!(notices[0].scope(), "contacts");
        let one = book.get("1").unwrap();
        assert_eq!(one.nick, "one");
        assert_eq!(one.remark, "bestie");
    }

    #[test]
    fn absent_contacts_are_kept() {
        let mut book = ContactBook::default();
        book.apply(vec![Friend::new("u_1", "1", "one"), Friend::new("u_2", "2", "two")]);
        let notices = book.apply(vec![Friend::new("u_2", "2", "two")]);
        assert!(notices.is_empty());
        assert_eq!(book.len(), 2);
    }
}
