//! The local account the bridge runs as.
//!
//! The host learns its own identity some time after start-up; components that
//! depend on it (the per-account store, self-suppression in roster diffs)
//! read it from a shared [`SelfAccount`].

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct AccountIds {
    uin: Option<String>,
    uid: Option<String>,
}

/// Shared, late-initialized identity of the local account.
#[derive(Debug, Default)]
pub struct SelfAccount {
    ids: RwLock<AccountIds>,
    online: AtomicBool,
}

impl SelfAccount {
    pub fn new() -> Self {
        Self::default()
    }

    /// An account whose identity is already known.
    pub fn known(uin: impl Into<String>, uid: impl Into<String>) -> Self {
        let account = Self::new();
        account.set_identity(uin, uid);
        account
    }

    pub fn set_identity(&self, uin: impl Into<String>, uid: impl Into<String>) {
        let mut ids = self.ids.write().unwrap_or_else(|e| e.into_inner());
        ids.uin = Some(uin.into());
        ids.uid = Some(uid.into());
    }

    pub fn uin(&self) -> Option<String> {
        self.ids.read().unwrap_or_else(|e| e.into_inner()).uin.clone()
    }

    pub fn uid(&self) -> Option<String> {
        self.ids.read().unwrap_or_else(|e| e.into_inner()).uid.clone()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}
