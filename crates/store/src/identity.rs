//! Message identity store: long id ↔ short id ↔ sequence id.
//!
//! Layout in the backing store:
//!
//! ```text
//! msg_id_<longId>        -> JSON MessageRecord
//! msg_short_id_<shortId> -> longId
//! msg_seq_id_<seqId>     -> longId
//! msg_current_short_id   -> decimal cursor
//! ```
//!
//! Short ids come from a persisted cursor. The cursor is advanced and written
//! back before an allocation returns, under the single writer lock, so two
//! allocations never share a value and a restart resumes where the last
//! successful allocation left off.
//!
//! Reads go through a cache keyed exactly like the store. The whole cache is
//! dropped on a fixed interval; the store stays the source of truth. Writers
//! always merge against the stored record, and a read that raced a write or
//! a clear does not repopulate the cache with what it read.

use ntbridge_core::error::StoreError;
use ntbridge_core::identity::SelfAccount;
use ntbridge_core::message::MessageRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::kv::{BackendOpener, KvStore};

pub const KEY_PREFIX_LONG_ID: &str = "msg_id_";
pub const KEY_PREFIX_SHORT_ID: &str = "msg_short_id_";
pub const KEY_PREFIX_SEQ_ID: &str = "msg_seq_id_";
pub const CURSOR_KEY: &str = "msg_current_short_id";

fn long_key(long_id: &str) -> String {
    format!("{KEY_PREFIX_LONG_ID}{long_id}")
}

fn short_key(short_id: i32) -> String {
    format!("{KEY_PREFIX_SHORT_ID}{short_id}")
}

fn seq_key(seq_id: &str) -> String {
    format!("{KEY_PREFIX_SEQ_ID}{seq_id}")
}

/// Persistent, cached, triple-indexed message identity store.
pub struct IdentityStore {
    backend: OnceCell<Arc<dyn KvStore>>,
    cache: RwLock<HashMap<String, Arc<MessageRecord>>>,
    /// Bumped under the cache lock by every write and clear.
    epoch: AtomicU64,
    /// Last persisted cursor value; `None` until first read from the store.
    /// Held for the duration of every mutation.
    writer: Mutex<Option<i32>>,
    short_id_floor: i32,
}

impl IdentityStore {
    /// A store whose backend is attached later (see [`IdentityStore::spawn_init`]).
    pub fn new(short_id_floor: i32) -> Self {
        Self {
            backend: OnceCell::new(),
            cache: RwLock::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            writer: Mutex::new(None),
            short_id_floor,
        }
    }

    /// A store that is ready immediately.
    pub fn with_backend(backend: Arc<dyn KvStore>, short_id_floor: i32) -> Self {
        let store = Self::new(short_id_floor);
        store.attach(backend);
        store
    }

    /// Attach the backing store. Returns `false` if one was already attached.
    pub fn attach(&self, backend: Arc<dyn KvStore>) -> bool {
        let name = backend.name().to_string();
        let attached = self.backend.set(backend).is_ok();
        if attached {
            info!(backend = %name, "Identity store ready");
        }
        attached
    }

    pub fn is_ready(&self) -> bool {
        self.backend.initialized()
    }

    fn backend(&self) -> Result<&Arc<dyn KvStore>, StoreError> {
        self.backend.get().ok_or(StoreError::NotReady)
    }

    /// Open the account's backing store once the account identity is known.
    ///
    /// Retries every `retry` until the uin is available and the open
    /// succeeds. Operations issued meanwhile fail with [`StoreError::NotReady`].
    pub fn spawn_init(
        self: &Arc<Self>,
        account: Arc<SelfAccount>,
        opener: Arc<dyn BackendOpener>,
        retry: Duration,
    ) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut attempts: u32 = 0;
            loop {
                let Some(this) = store.upgrade() else {
                    return;
                };
                if this.is_ready() {
                    return;
                }
                attempts += 1;
                match account.uin() {
                    None => debug!(attempts, "Identity store waiting for account identity"),
                    Some(uin) => match opener.open(&uin).await {
                        Ok(backend) => {
                            this.attach(backend);
                            info!(uin = %uin, attempts, "Identity store initialized");
                            return;
                        }
                        Err(e) => warn!(uin = %uin, error = %e, "Identity store open failed, retrying"),
                    },
                }
                drop(this);
                tokio::time::sleep(retry).await;
            }
        })
    }

    /// Clear the whole cache every `interval`.
    pub fn spawn_cache_eviction(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(this) = store.upgrade() else {
                    return;
                };
                let dropped = this.clear_cache().await;
                debug!(dropped, "Identity cache cleared");
            }
        })
    }

    /// Drop every cached entry. Returns how many keys were cached.
    pub async fn clear_cache(&self) -> usize {
        let mut cache = self.cache.write().await;
        let n = cache.len();
        cache.clear();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        n
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }

    // ── Reads ───────────────────────────────────────────────────────────

    async fn cached(&self, key: &str) -> Option<Arc<MessageRecord>> {
        self.cache.read().await.get(key).cloned()
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Cache a record read from the store at `epoch`, plus the index key it
    /// was reached through. Skipped if a write or clear landed since.
    async fn cache_read(&self, epoch: u64, record: &Arc<MessageRecord>, via: Option<String>) {
        let mut cache = self.cache.write().await;
        if self.epoch() != epoch {
            debug!(msg_id = %record.msg_id, "Store read raced a write, not cached");
            return;
        }
        Self::index_record(&mut cache, record);
        if let Some(key) = via {
            cache.insert(key, record.clone());
        }
    }

    /// Cache a record that was just persisted under the writer lock.
    async fn cache_written(&self, record: &Arc<MessageRecord>, previous_seq: Option<&str>) {
        let mut cache = self.cache.write().await;
        if let Some(old_seq) = previous_seq {
            if record.msg_seq.as_deref() != Some(old_seq) {
                let stale = seq_key(old_seq);
                if cache.get(&stale).is_some_and(|r| r.msg_id == record.msg_id) {
                    cache.remove(&stale);
                }
            }
        }
        Self::index_record(&mut cache, record);
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    fn index_record(cache: &mut HashMap<String, Arc<MessageRecord>>, record: &Arc<MessageRecord>) {
        cache.insert(long_key(&record.msg_id), record.clone());
        if let Some(short_id) = record.msg_short_id {
            cache.insert(short_key(short_id), record.clone());
        }
        if let Some(seq) = &record.msg_seq {
            cache.insert(seq_key(seq), record.clone());
        }
    }

    async fn lookup_long(&self, long_id: &str) -> Result<Arc<MessageRecord>, StoreError> {
        let key = long_key(long_id);
        if let Some(hit) = self.cached(&key).await {
            return Ok(hit);
        }

        let epoch = self.epoch();
        let record = self.load_long(long_id).await?;
        self.cache_read(epoch, &record, None).await;
        Ok(record)
    }

    /// Read a record straight from the store, bypassing the cache.
    async fn load_long(&self, long_id: &str) -> Result<Arc<MessageRecord>, StoreError> {
        let key = long_key(long_id);
        let raw = self
            .backend()?
            .get(&key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let record: MessageRecord =
            serde_json::from_str(&raw).map_err(|e| StoreError::Corrupted {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        Ok(Arc::new(record))
    }

    /// Resolve an index key (`msg_short_id_*` / `msg_seq_id_*`) to its record.
    async fn lookup_indexed(&self, key: String) -> Result<Arc<MessageRecord>, StoreError> {
        if let Some(hit) = self.cached(&key).await {
            return Ok(hit);
        }

        let epoch = self.epoch();
        let long_id = self
            .backend()?
            .get(&key)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let record = self.lookup_long(&long_id).await?;
        // The long lookup may have been a cache hit that never indexed this key.
        self.cache_read(epoch, &record, Some(key)).await;
        Ok(record)
    }

    /// Find a message by its long host id.
    pub async fn find_by_long(&self, long_id: &str) -> Result<Arc<MessageRecord>, StoreError> {
        self.lookup_long(long_id).await
    }

    /// Find a message by its short id.
    pub async fn find_by_short(&self, short_id: i32) -> Result<Arc<MessageRecord>, StoreError> {
        self.lookup_indexed(short_key(short_id)).await
    }

    /// Find the message currently holding a host sequence id.
    pub async fn find_by_sequence(&self, seq_id: &str) -> Result<Arc<MessageRecord>, StoreError> {
        self.lookup_indexed(seq_key(seq_id)).await
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Return the short id of `message`, allocating one if it was never seen.
    ///
    /// A known message has the given fields merged into its record instead.
    pub async fn allocate_or_find(&self, message: MessageRecord) -> Result<i32, StoreError> {
        let mut cursor = self.writer.lock().await;

        match self.load_long(&message.msg_id).await {
            Ok(existing) => {
                let merged = self.merge_locked(existing, &message).await?;
                return merged.msg_short_id.ok_or_else(|| StoreError::Corrupted {
                    key: long_key(&merged.msg_id),
                    reason: "record has no short id".into(),
                });
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let short_id = self.next_short_id(&mut cursor).await?;
        let mut record = message;
        record.msg_short_id = Some(short_id);
        let record = Arc::new(record);

        self.persist(&record).await?;
        self.cache_written(&record, None).await;
        info!(
            msg_id = %record.msg_id,
            short_id,
            seq = record.msg_seq.as_deref().unwrap_or(""),
            "Message identity allocated"
        );
        Ok(short_id)
    }

    /// Merge fields into a known record. Unknown messages are ignored.
    pub async fn update(&self, message: MessageRecord) -> Result<(), StoreError> {
        let _writer = self.writer.lock().await;

        match self.load_long(&message.msg_id).await {
            Ok(existing) => {
                self.merge_locked(existing, &message).await?;
                Ok(())
            }
            Err(StoreError::NotFound(key)) => {
                debug!(key = %key, "Update for a message never captured, ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Current cursor value, reading it from the store if not loaded yet.
    pub async fn current_short_id(&self) -> Result<i32, StoreError> {
        let mut cursor = self.writer.lock().await;
        self.load_cursor(&mut cursor).await
    }

    async fn load_cursor(&self, cursor: &mut Option<i32>) -> Result<i32, StoreError> {
        if let Some(current) = *cursor {
            return Ok(current);
        }
        let current = match self.backend()?.get(CURSOR_KEY).await? {
            Some(raw) => raw.trim().parse::<i32>().map_err(|e| StoreError::Corrupted {
                key: CURSOR_KEY.into(),
                reason: e.to_string(),
            })?,
            None => self.short_id_floor,
        };
        *cursor = Some(current);
        Ok(current)
    }

    /// Advance the cursor and persist it before handing the value out.
    async fn next_short_id(&self, cursor: &mut Option<i32>) -> Result<i32, StoreError> {
        let current = self.load_cursor(cursor).await?;
        let next = current
            .checked_add(1)
            .ok_or(StoreError::CursorExhausted(current))?;
        self.backend()?.put(CURSOR_KEY, &next.to_string()).await?;
        *cursor = Some(next);
        Ok(next)
    }

    /// Merge `newer` into the stored `existing`, persist, then swap it into
    /// the cache.
    ///
    /// Callers hold the writer lock. Readers see either the old or the new
    /// `Arc`, never a partially merged record, and a failed write leaves the
    /// cache untouched.
    async fn merge_locked(
        &self,
        existing: Arc<MessageRecord>,
        newer: &MessageRecord,
    ) -> Result<Arc<MessageRecord>, StoreError> {
        let merged = Arc::new(existing.merged(newer));
        self.persist(&merged).await?;
        self.cache_written(&merged, existing.msg_seq.as_deref()).await;
        debug!(msg_id = %merged.msg_id, "Message identity merged");
        Ok(merged)
    }

    async fn persist(&self, record: &MessageRecord) -> Result<(), StoreError> {
        let backend = self.backend()?;
        let json = serde_json::to_string(record).map_err(|e| StoreError::Corrupted {
            key: long_key(&record.msg_id),
            reason: e.to_string(),
        })?;
        backend.put(&long_key(&record.msg_id), &json).await?;
        if let Some(short_id) = record.msg_short_id {
            backend.put(&short_key(short_id), &record.msg_id).await?;
        }
        if let Some(seq) = &record.msg_seq {
            backend.put(&seq_key(seq), &record.msg_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryKv;
    use serde_json::json;

    const FLOOR: i32 = ntbridge_config::DEFAULT_SHORT_ID_FLOOR;

    fn ready_store() -> (IdentityStore, InMemoryKv) {
        let kv = InMemoryKv::new();
        (IdentityStore::with_backend(Arc::new(kv.clone()), FLOOR), kv)
    }

    fn msg(id: &str, seq: &str) -> MessageRecord {
        MessageRecord::new(id)
            .with_seq(seq)
            .with_field("peerUid", json!("1001"))
    }

    #[tokio::test]
    async fn allocate_twice_returns_same_short_id() {
        let (store, kv) = ready_store();
        let first = store.allocate_or_find(msg("m1", "10")).await.unwrap();
        let count_after_first = kv.count().await.unwrap();

        let second = store
            .allocate_or_find(MessageRecord::new("m1").with_field("recallTime", json!("99")))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first, FLOOR + 1);
        assert_eq!(store.current_short_id().await.unwrap(), FLOOR + 1);
        assert_eq!(kv.count().await.unwrap(), count_after_first);

        let record = store.find_by_long("m1").await.unwrap();
        assert_eq!(record.fields["recallTime"], json!("99"));
        assert_eq!(record.fields["peerUid"], json!("1001"));
    }

    #[tokio::test]
    async fn short_ids_increase_by_one() {
        let (store, _kv) = ready_store();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(
                store
                    .allocate_or_find(msg(&format!("m{i}"), &i.to_string()))
                    .await
                    .unwrap(),
            );
        }
        for pair in ids.windows(2) {
            assert_eq!(pair[1], pair[0] + 1);
        }
        assert_eq!(ids[0], FLOOR + 1);
    }

    #[tokio::test]
    async fn cursor_resumes_from_persisted_value() {
        let kv = InMemoryKv::new();
        kv.put(CURSOR_KEY, "41").await.unwrap();
        let store = IdentityStore::with_backend(Arc::new(kv), FLOOR);
        assert_eq!(store.allocate_or_find(msg("a", "1")).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn corrupted_cursor_is_reported() {
        let kv = InMemoryKv::new();
        kv.put(CURSOR_KEY, "not-a-number").await.unwrap();
        let store = IdentityStore::with_backend(Arc::new(kv), FLOOR);
        let err = store.allocate_or_find(msg("a", "1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn cursor_exhaustion_is_an_error_not_a_wrap() {
        let kv = InMemoryKv::new();
        kv.put(CURSOR_KEY, &i32::MAX.to_string()).await.unwrap();
        let store = IdentityStore::with_backend(Arc::new(kv), FLOOR);
        let err = store.allocate_or_find(msg("a", "1")).await.unwrap_err();
        assert!(matches!(err, StoreError::CursorExhausted(i32::MAX)));
    }

    #[tokio::test]
    async fn all_finders_agree() {
        let (store, _kv) = ready_store();
        let short_id = store.allocate_or_find(msg("m1", "77")).await.unwrap();
        store.clear_cache().await;

        let by_short = store.find_by_short(short_id).await.unwrap();
        let by_long = store.find_by_long("m1").await.unwrap();
        let by_seq = store.find_by_sequence("77").await.unwrap();

        assert_eq!(*by_short, *by_long);
        assert_eq!(*by_long, *by_seq);
        assert_eq!(by_short.msg_short_id, Some(short_id));
    }

    #[tokio::test]
    async fn short_lookup_populates_all_three_cache_keys() {
        let (store, _kv) = ready_store();
        let short_id = store.allocate_or_find(msg("m1", "77")).await.unwrap();
        store.clear_cache().await;

        store.find_by_short(short_id).await.unwrap();
        assert_eq!(store.cached_len().await, 3);
    }

    #[tokio::test]
    async fn missing_ids_are_not_found() {
        let (store, _kv) = ready_store();
        assert!(store.find_by_short(5).await.unwrap_err().is_not_found());
        assert!(store.find_by_long("nope").await.unwrap_err().is_not_found());
        assert!(store.find_by_sequence("9").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn operations_before_init_are_retryable() {
        let store = IdentityStore::new(FLOOR);
        assert!(!store.is_ready());
        let err = store.allocate_or_find(msg("m1", "1")).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.find_by_short(1).await.unwrap_err().is_retryable());
        assert!(store.update(msg("m1", "1")).await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn update_of_unknown_message_is_silent() {
        let (store, kv) = ready_store();
        store.update(msg("ghost", "3")).await.unwrap();
        assert_eq!(kv.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_moves_sequence_index() {
        let (store, _kv) = ready_store();
        store.allocate_or_find(msg("m1", "5")).await.unwrap();
        store.update(MessageRecord::new("m1").with_seq("6")).await.unwrap();

        assert_eq!(store.find_by_sequence("6").await.unwrap().msg_id, "m1");
        store.clear_cache().await;
        assert_eq!(store.find_by_sequence("6").await.unwrap().msg_id, "m1");
    }

    #[tokio::test]
    async fn reused_sequence_points_at_newest_message() {
        let (store, _kv) = ready_store();
        store.allocate_or_find(msg("old", "5")).await.unwrap();
        store.allocate_or_find(msg("new", "5")).await.unwrap();
        store.clear_cache().await;
        assert_eq!(store.find_by_sequence("5").await.unwrap().msg_id, "new");
    }

    #[tokio::test]
    async fn concurrent_allocations_never_collide() {
        let (store, _kv) = ready_store();
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .allocate_or_find(msg(&format!("m{}", i % 10), &i.to_string()))
                    .await
                    .unwrap()
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
        assert_eq!(store.current_short_id().await.unwrap(), FLOOR + 10);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_eviction_rereads_from_store() {
        let (store, kv) = ready_store();
        let store = Arc::new(store);
        let short_id = store.allocate_or_find(msg("m1", "1")).await.unwrap();
        let cached = store.find_by_short(short_id).await.unwrap();
        let reads_before = kv.reads();

        let _eviction = store.spawn_cache_eviction(Duration::from_secs(600));
        tokio::task::yield_now().await;

        tokio::time::advance(Duration::from_secs(599)).await;
        tokio::task::yield_now().await;
        store.find_by_short(short_id).await.unwrap();
        assert_eq!(kv.reads(), reads_before);

        tokio::time::advance(Duration::from_secs(2)).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.cached_len().await, 0);

        let fresh = store.find_by_short(short_id).await.unwrap();
        assert!(kv.reads() > reads_before);
        assert_eq!(*fresh, *cached);
    }

    /// Parks the first `get` of one key after it has read the value, until
    /// released.
    struct ParkedReadKv {
        inner: InMemoryKv,
        key: String,
        armed: std::sync::atomic::AtomicBool,
        parked: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    impl ParkedReadKv {
        fn new(inner: InMemoryKv, key: String) -> Self {
            Self {
                inner,
                key,
                armed: std::sync::atomic::AtomicBool::new(false),
                parked: tokio::sync::Notify::new(),
                release: tokio::sync::Notify::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl KvStore for ParkedReadKv {
        fn name(&self) -> &str {
            "parked"
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let value = self.inner.get(key).await?;
            if key == self.key && self.armed.swap(false, Ordering::SeqCst) {
                self.parked.notify_one();
                self.release.notified().await;
            }
            Ok(value)
        }

        async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.put(key, value).await
        }

        async fn count(&self) -> Result<usize, StoreError> {
            self.inner.count().await
        }
    }

    #[tokio::test]
    async fn slow_reader_does_not_undo_a_merge() {
        let kv = Arc::new(ParkedReadKv::new(InMemoryKv::new(), long_key("m1")));
        let store = Arc::new(IdentityStore::with_backend(kv.clone(), FLOOR));
        store.allocate_or_find(msg("m1", "5")).await.unwrap();
        store.clear_cache().await;

        // A reader fetches the pre-merge record, then stalls before caching it.
        kv.armed.store(true, Ordering::SeqCst);
        let reader = {
            let store = store.clone();
            tokio::spawn(async move { store.find_by_long("m1").await.unwrap() })
        };
        kv.parked.notified().await;

        store
            .update(MessageRecord::new("m1").with_field("recallTime", json!("99")))
            .await
            .unwrap();
        kv.release.notify_one();
        let stale = reader.await.unwrap();
        assert!(!stale.fields.contains_key("recallTime"));

        let cached = store.find_by_long("m1").await.unwrap();
        assert_eq!(cached.fields["recallTime"], json!("99"));

        store
            .update(MessageRecord::new("m1").with_field("elemId", json!("e1")))
            .await
            .unwrap();
        store.clear_cache().await;
        let stored = store.find_by_long("m1").await.unwrap();
        assert_eq!(stored.fields["recallTime"], json!("99"));
        assert_eq!(stored.fields["elemId"], json!("e1"));
        assert_eq!(stored.fields["peerUid"], json!("1001"));
    }

    #[tokio::test]
    async fn writer_merges_against_the_stored_record() {
        let (store, kv) = ready_store();
        store.allocate_or_find(msg("m1", "5")).await.unwrap();
        store.find_by_long("m1").await.unwrap();

        // Another handle on the same backend writes behind this store's cache.
        let other = IdentityStore::with_backend(Arc::new(kv.clone()), FLOOR);
        other
            .update(MessageRecord::new("m1").with_field("recallTime", json!("99")))
            .await
            .unwrap();

        store
            .update(MessageRecord::new("m1").with_field("elemId", json!("e1")))
            .await
            .unwrap();
        store.clear_cache().await;
        let stored = store.find_by_long("m1").await.unwrap();
        assert_eq!(stored.fields["recallTime"], json!("99"));
        assert_eq!(stored.fields["elemId"], json!("e1"));
    }

    /// Fails every `put` while `failing` is set.
    #[derive(Default)]
    struct FlakyKv {
        inner: InMemoryKv,
        failing: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl KvStore for FlakyKv {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Storage("disk full".into()));
            }
            self.inner.put(key, value).await
        }

        async fn count(&self) -> Result<usize, StoreError> {
            self.inner.count().await
        }
    }

    #[tokio::test]
    async fn failed_write_leaves_cache_untouched() {
        let kv = Arc::new(FlakyKv::default());
        let store = IdentityStore::with_backend(kv.clone(), FLOOR);
        store.allocate_or_find(msg("m1", "5")).await.unwrap();
        store.find_by_sequence("5").await.unwrap();

        kv.failing.store(true, Ordering::SeqCst);
        let err = store
            .update(
                MessageRecord::new("m1")
                    .with_seq("6")
                    .with_field("recallTime", json!("99")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Storage(_)));

        let cached = store.find_by_long("m1").await.unwrap();
        assert!(!cached.fields.contains_key("recallTime"));
        assert_eq!(store.find_by_sequence("5").await.unwrap().msg_id, "m1");
        assert!(store.find_by_sequence("6").await.unwrap_err().is_not_found());

        kv.failing.store(false, Ordering::SeqCst);
        store.clear_cache().await;
        assert!(!store.find_by_long("m1").await.unwrap().fields.contains_key("recallTime"));
    }

    #[tokio::test(start_paused = true)]
    async fn init_waits_for_account_identity() {
        let store = Arc::new(IdentityStore::new(FLOOR));
        let account = Arc::new(SelfAccount::new());
        let opener = Arc::new(crate::in_memory::MemoryOpener::new());
        let handle = store.spawn_init(account.clone(), opener, Duration::from_millis(300));

        tokio::time::advance(Duration::from_millis(900)).await;
        tokio::task::yield_now().await;
        assert!(!store.is_ready());

        account.set_identity("10001", "u_self");
        tokio::time::advance(Duration::from_millis(301)).await;
        handle.await.unwrap();
        assert!(store.is_ready());
        assert_eq!(store.allocate_or_find(msg("m1", "1")).await.unwrap(), FLOOR + 1);
    }
}
