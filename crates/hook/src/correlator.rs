//! Call/response correlation over the interceptor.
//!
//! The host answers some calls with a reply frame tagged with the call's
//! token, and others with an unrelated broadcast event that happens to carry
//! the result. [`Correlator::call_and_await`] covers the second shape:
//!
//! 1. register a waiter for the expected command (before the call goes out)
//! 2. issue the call
//! 3. an interceptor tap offers each event, inline and in arrival order, to
//!    every waiter on that command; each waiter decodes the payload into its
//!    own type and runs its own predicate
//! 4. the waiter resolves on its N-th match, or times out and is removed
//!
//! Offering inline means a waiter only ever sees events delivered after it
//! was registered, and a burst of traffic cannot push its frame out of a
//! buffer. Predicates run without the waiter table locked.
//!
//! [`Correlator::call_with_reply`] covers the token shape.

use ntbridge_core::error::CallError;
use ntbridge_core::frame::{CallFrame, CallToken, EventFrame};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::interceptor::{Interceptor, ObserverHandle};

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// What a call site waits for after issuing its call.
pub struct EventWait<T> {
    command: String,
    frames: usize,
    timeout: Option<Duration>,
    predicate: Predicate<T>,
}

impl<T> EventWait<T> {
    /// Wait for the first event with this command name.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            frames: 1,
            timeout: None,
            predicate: Box::new(|_| true),
        }
    }

    /// Resolve on the N-th matching event instead of the first.
    pub fn frames(mut self, n: usize) -> Self {
        self.frames = n.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Only count events whose decoded payload satisfies `predicate`.
    pub fn matching(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Box::new(predicate);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

/// A resolved correlation: the host's immediate return value plus the
/// payload that satisfied the wait.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlated<T> {
    pub call_result: Value,
    pub payload: T,
}

/// Offered each event for its command; returns `true` once resolved.
type Offer = Box<dyn FnMut(&EventFrame) -> bool + Send>;

struct Waiter {
    id: u64,
    offer: Arc<Mutex<Offer>>,
}

type Waiters = Arc<Mutex<HashMap<String, Vec<Waiter>>>>;

pub struct Correlator {
    interceptor: Arc<Interceptor>,
    waiters: Waiters,
    next_id: AtomicU64,
    default_timeout: Duration,
    tap: ObserverHandle,
    closed: AtomicBool,
}

impl Correlator {
    /// Tap the interceptor's inbound path.
    pub fn new(interceptor: Arc<Interceptor>, default_timeout: Duration) -> Self {
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let tap = {
            let waiters = waiters.clone();
            interceptor.add_tap(move |event| Self::offer(&waiters, event))
        };
        Self {
            interceptor,
            waiters,
            next_id: AtomicU64::new(1),
            default_timeout,
            tap,
            closed: AtomicBool::new(false),
        }
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Every inbound event, in arrival order, for consumers other than waiters.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EventFrame>> {
        self.interceptor.subscribe()
    }

    fn offer(waiters: &Waiters, event: &EventFrame) {
        let candidates: Vec<(u64, Arc<Mutex<Offer>>)> = match lock(waiters).get(&event.command) {
            Some(pending) => pending.iter().map(|w| (w.id, w.offer.clone())).collect(),
            None => return,
        };

        let resolved: Vec<u64> = candidates
            .into_iter()
            .filter_map(|(id, offer)| {
                let hit = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut offer = lock(&offer);
                    (*offer)(event)
                }))
                .unwrap_or_else(|_| {
                    warn!(command = %event.command, waiter = id, "Predicate panicked, treated as no match");
                    false
                });
                hit.then_some(id)
            })
            .collect();
        if resolved.is_empty() {
            return;
        }

        let mut waiters = lock(waiters);
        if let Some(pending) = waiters.get_mut(&event.command) {
            pending.retain(|w| !resolved.contains(&w.id));
            if pending.is_empty() {
                waiters.remove(&event.command);
            }
        }
    }

    fn register<T>(&self, wait: EventWait<T>) -> (u64, oneshot::Receiver<T>)
    where
        T: DeserializeOwned + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        let mut remaining = wait.frames;
        let predicate = wait.predicate;

        let offer: Offer = Box::new(move |event: &EventFrame| {
            if tx.is_none() {
                return true;
            }
            // Undecodable frames are simply not ours.
            let Ok(payload) = event.decode::<T>() else {
                return false;
            };
            if !predicate(&payload) {
                return false;
            }
            remaining -= 1;
            if remaining > 0 {
                return false;
            }
            if let Some(tx) = tx.take() {
                // Receiver gone means the caller already timed out.
                let _ = tx.send(payload);
            }
            true
        });

        lock(&self.waiters)
            .entry(wait.command)
            .or_default()
            .push(Waiter {
                id,
                offer: Arc::new(Mutex::new(offer)),
            });
        (id, rx)
    }

    fn unregister(&self, command: &str, id: u64) {
        let mut waiters = lock(&self.waiters);
        if let Some(pending) = waiters.get_mut(command) {
            pending.retain(|w| w.id != id);
            if pending.is_empty() {
                waiters.remove(command);
            }
        }
    }

    /// Number of waiters still pending across all commands.
    pub fn pending(&self) -> usize {
        lock(&self.waiters).values().map(Vec::len).sum()
    }

    /// Issue a call and wait for a matching broadcast event.
    pub async fn call_and_await<T>(
        &self,
        method: &str,
        args: Vec<Value>,
        wait: EventWait<T>,
    ) -> Result<Correlated<T>, CallError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let command = wait.command.clone();
        if self.closed.load(Ordering::Acquire) {
            return Err(CallError::ChannelClosed(command));
        }
        let timeout = wait.timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;
        let (id, rx) = self.register(wait);

        let call_result = match self.interceptor.call(CallFrame::new(method, args)).await {
            Ok(ret) => ret,
            Err(e) => {
                self.unregister(&command, id);
                return Err(e);
            }
        };

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(payload)) => Ok(Correlated {
                call_result,
                payload,
            }),
            Ok(Err(_)) => Err(CallError::ChannelClosed(command)),
            Err(_) => {
                // After this no later frame can reach the waiter.
                self.unregister(&command, id);
                debug!(method, command = %command, "Correlated call timed out");
                Err(CallError::Timeout {
                    command,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Issue a call with a fresh token and wait for the reply carrying it.
    ///
    /// The first event of the reply decodes into `T`.
    pub async fn call_with_reply<T>(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Correlated<T>, CallError>
    where
        T: DeserializeOwned,
    {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let token = CallToken::new();
        let rx = self.interceptor.expect_reply(token.clone());

        let call = CallFrame::new(method, args).with_token(token.clone());
        let call_result = match self.interceptor.call(call).await {
            Ok(ret) => ret,
            Err(e) => {
                self.interceptor.cancel_reply(&token);
                return Err(e);
            }
        };

        let reply = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(CallError::ChannelClosed(method.to_string())),
            Err(_) => {
                self.interceptor.cancel_reply(&token);
                return Err(CallError::Timeout {
                    command: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let event = reply.events.first().ok_or_else(|| CallError::Payload {
            command: method.to_string(),
            reason: "reply carried no events".into(),
        })?;
        let payload = event.decode::<T>().map_err(|e| CallError::Payload {
            command: event.command.clone(),
            reason: e.to_string(),
        })?;
        Ok(Correlated {
            call_result,
            payload,
        })
    }

    /// Fire-and-forget: issue the call and return the host's immediate value.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, CallError> {
        self.interceptor.call(CallFrame::new(method, args)).await
    }

    /// Detach from the interceptor and fail every pending waiter with
    /// `ChannelClosed`.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.interceptor.remove(self.tap);
        let dropped: usize = lock(&self.waiters).drain().map(|(_, w)| w.len()).sum();
        if dropped > 0 {
            debug!(dropped, "Correlator shut down with waiters pending");
        }
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        self.interceptor.remove(self.tap);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ntbridge_core::channel::{HostChannel, NullSink};
    use ntbridge_core::error::HostError;
    use ntbridge_core::frame::InboundFrame;
    use serde::Deserialize;
    use serde_json::json;

    struct MockHost {
        fail: bool,
    }

    #[async_trait]
    impl HostChannel for MockHost {
        fn name(&self) -> &str {
            "mock"
        }

        async fn invoke(&self, call: CallFrame) -> Result<Value, HostError> {
            if self.fail {
                return Err(HostError::new(1, format!("{} refused", call.method)));
            }
            Ok(json!({"result": 0, "errMsg": ""}))
        }
    }

    fn correlator() -> Arc<Correlator> {
        correlator_with_buffer(64)
    }

    fn correlator_with_buffer(event_buffer: usize) -> Arc<Correlator> {
        let interceptor = Arc::new(Interceptor::new(
            Arc::new(MockHost { fail: false }),
            Arc::new(NullSink),
            event_buffer,
        ));
        Arc::new(Correlator::new(interceptor, Duration::from_millis(5000)))
    }

    fn push(correlator: &Correlator, command: &str, payload: Value) {
        correlator
            .interceptor()
            .deliver(InboundFrame::events("ns-ntApi-2", vec![EventFrame::new(command, payload)]));
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct GroupInfo {
        group_code: String,
    }

    #[tokio::test]
    async fn resolves_with_call_result_and_payload() {
        let c = correlator();
        let task = {
            let c = c.clone();
            tokio::spawn(async move {
                c.call_and_await::<GroupInfo>(
                    "svc/getGroup",
                    vec![],
                    EventWait::new("evt/group").matching(|g: &GroupInfo| g.group_code == "42"),
                )
                .await
            })
        };
        settle().await;
        push(&c, "evt/group", json!({"groupCode": "42"}));

        let resolved = task.await.unwrap().unwrap();
        assert_eq!(resolved.payload.group_code, "42");
        assert_eq!(resolved.call_result["result"], json!(0));
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_deadline_not_before() {
        let c = correlator();
        let started = Instant::now();
        let task = {
            let c = c.clone();
            tokio::spawn(async move {
                c.call_and_await::<Value>(
                    "svc/x",
                    vec![],
                    EventWait::new("evt/x")
                        .timeout(Duration::from_millis(300))
                        .matching(|_| false),
                )
                .await
            })
        };
        settle().await;
        push(&c, "evt/x", json!(1));

        tokio::time::advance(Duration::from_millis(299)).await;
        settle().await;
        assert!(!task.is_finished());

        tokio::time::advance(Duration::from_millis(1)).await;
        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(c.pending(), 0);

        // A late match has nothing left to resolve.
        push(&c, "evt/x", json!(1));
        settle().await;
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test]
    async fn disjoint_predicates_resolve_independently() {
        let c = correlator();
        let spawn_wait = |code: &'static str| {
            let c = c.clone();
            tokio::spawn(async move {
                c.call_and_await::<GroupInfo>(
                    "svc/getGroup",
                    vec![json!(code)],
                    EventWait::new("evt/group").matching(move |g: &GroupInfo| g.group_code == code),
                )
                .await
            })
        };
        let a = spawn_wait("A");
        let b = spawn_wait("B");
        settle().await;
        assert_eq!(c.pending(), 2);

        push(&c, "evt/group", json!({"groupCode": "A"}));
        settle().await;
        assert!(a.is_finished());
        assert!(!b.is_finished());
        assert_eq!(c.pending(), 1);

        push(&c, "evt/group", json!({"groupCode": "B"}));
        assert_eq!(b.await.unwrap().unwrap().payload.group_code, "B");
        assert_eq!(a.await.unwrap().unwrap().payload.group_code, "A");
    }

    #[tokio::test]
    async fn one_frame_can_satisfy_many_waiters() {
        let c = correlator();
        let mut tasks = Vec::new();
        for _ in 0..3 {
            let c = c.clone();
            tasks.push(tokio::spawn(async move {
                c.call_and_await::<Value>("svc/x", vec![], EventWait::new("evt/shared"))
                    .await
            }));
        }
        settle().await;
        push(&c, "evt/shared", json!({"v": 7}));
        for t in tasks {
            assert_eq!(t.await.unwrap().unwrap().payload, json!({"v": 7}));
        }
    }

    #[tokio::test]
    async fn multi_field_payload_decodes_into_tuple() {
        let c = correlator();
        let task = {
            let c = c.clone();
            tokio::spawn(async move {
                c.call_and_await::<(String, Vec<u32>)>(
                    "svc/list",
                    vec![],
                    EventWait::new("evt/list").matching(|(kind, _)| kind == "full"),
                )
                .await
            })
        };
        settle().await;
        push(&c, "evt/list", json!(["partial", [1]]));
        push(&c, "evt/list", json!("not a tuple"));
        push(&c, "evt/list", json!(["full", [1, 2, 3]]));

        let resolved = task.await.unwrap().unwrap();
        assert_eq!(resolved.payload, ("full".to_string(), vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn resolves_on_nth_matching_frame() {
        let c = correlator();
        let task = {
            let c = c.clone();
            tokio::spawn(async move {
                c.call_and_await::<u32>("svc/x", vec![], EventWait::new("evt/n").frames(3))
                    .await
            })
        };
        settle().await;
        for n in 1..=3 {
            push(&c, "evt/n", json!(n));
        }
        assert_eq!(task.await.unwrap().unwrap().payload, 3);
    }

    #[tokio::test]
    async fn panicking_predicate_is_a_non_match() {
        let c = correlator();
        let task = {
            let c = c.clone();
            tokio::spawn(async move {
                c.call_and_await::<u32>(
                    "svc/x",
                    vec![],
                    EventWait::new("evt/p").matching(|n| {
                        assert!(*n != 0, "zero");
                        true
                    }),
                )
                .await
            })
        };
        settle().await;
        push(&c, "evt/p", json!(0));
        push(&c, "evt/p", json!(5));
        assert_eq!(task.await.unwrap().unwrap().payload, 5);
    }

    #[tokio::test]
    async fn host_failure_unregisters_waiter() {
        let interceptor = Arc::new(Interceptor::new(
            Arc::new(MockHost { fail: true }),
            Arc::new(NullSink),
            16,
        ));
        let c = Correlator::new(interceptor, Duration::from_millis(5000));
        let err = c
            .call_and_await::<Value>("svc/x", vec![], EventWait::new("evt/x"))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Host { .. }));
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test]
    async fn token_reply_is_routed_and_decoded() {
        let c = correlator();
        let (tx, mut tokens) = tokio::sync::mpsc::unbounded_channel();
        c.interceptor().on_call(
            crate::interceptor::NameFilter::new(["svc/getGroup"]),
            move |call| {
                let tx = tx.clone();
                async move {
                    if let Some(token) = call.token.clone() {
                        tx.send(token)?;
                    }
                    Ok(())
                }
            },
        );

        let task = {
            let c = c.clone();
            tokio::spawn(async move {
                c.call_with_reply::<GroupInfo>("svc/getGroup", vec![], None).await
            })
        };
        let token = tokens.recv().await.unwrap();
        assert_eq!(c.interceptor().pending_replies(), 1);

        // An unrelated event with the same command does not count as the reply.
        push(&c, "svc/getGroup", json!({"groupCode": "wrong"}));
        c.interceptor().deliver(InboundFrame::reply(
            "ns-ntApi-2",
            token,
            vec![EventFrame::new("svc/getGroup", json!({"groupCode": "9"}))],
        ));
        let resolved = task.await.unwrap().unwrap();
        assert_eq!(resolved.payload.group_code, "9");
        assert_eq!(c.interceptor().pending_replies(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn token_reply_after_timeout_is_dropped() {
        let c = correlator();
        let err = c
            .call_with_reply::<Value>("svc/slow", vec![], Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(c.interceptor().pending_replies(), 0);
    }

    #[tokio::test]
    async fn shutdown_fails_pending_waiters() {
        let c = correlator();
        let task = {
            let c = c.clone();
            tokio::spawn(async move {
                c.call_and_await::<Value>("svc/x", vec![], EventWait::new("evt/never"))
                    .await
            })
        };
        settle().await;
        c.shutdown();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CallError::ChannelClosed(_)));

        let err = c
            .call_and_await::<Value>("svc/x", vec![], EventWait::new("evt/never"))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::ChannelClosed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn event_delivered_before_the_call_is_ignored() {
        let c = correlator();
        // Still sitting in the event stream when the waiter registers.
        push(&c, "evt/group", json!({"groupCode": "42"}));

        let err = c
            .call_and_await::<GroupInfo>(
                "svc/getGroup",
                vec![],
                EventWait::new("evt/group").timeout(Duration::from_millis(300)),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test]
    async fn burst_larger_than_event_buffer_keeps_the_match() {
        let c = correlator_with_buffer(4);
        let task = {
            let c = c.clone();
            tokio::spawn(async move {
                c.call_and_await::<GroupInfo>(
                    "svc/getGroup",
                    vec![],
                    EventWait::new("evt/group").matching(|g: &GroupInfo| g.group_code == "42"),
                )
                .await
            })
        };
        settle().await;
        assert_eq!(c.pending(), 1);

        let mut burst = vec![EventFrame::new("evt/group", json!({"groupCode": "42"}))];
        burst.extend((0..16).map(|n| EventFrame::new("evt/other", json!(n))));
        c.interceptor().deliver(InboundFrame::events("ns-ntApi-2", burst));

        let resolved = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(resolved.payload.group_code, "42");
    }

    #[tokio::test]
    async fn predicate_may_call_back_into_the_correlator() {
        let c = correlator();
        let task = {
            let c = c.clone();
            let inner = c.clone();
            tokio::spawn(async move {
                c.call_and_await::<Value>(
                    "svc/x",
                    vec![],
                    EventWait::new("evt/reentrant").matching(move |_| inner.pending() == 1),
                )
                .await
            })
        };
        settle().await;

        let deliverer = c.clone();
        let delivered = tokio::task::spawn_blocking(move || {
            push(&deliverer, "evt/reentrant", json!(1));
        });
        tokio::time::timeout(Duration::from_secs(2), delivered)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.await.unwrap().unwrap().payload, json!(1));
        assert_eq!(c.pending(), 0);
    }

    #[tokio::test]
    async fn shutdown_detaches_the_tap() {
        let c = correlator();
        assert_eq!(c.interceptor().tap_count(), 1);
        c.shutdown();
        assert_eq!(c.interceptor().tap_count(), 0);
    }
}
