//! Channel interceptor: the single tap on the host's call and event paths.
//!
//! ```text
//!   caller ──call()──► [call observers] ──► HostChannel::invoke (unaltered)
//!
//!   host ──deliver()──► [event observers]
//!                       ├─► taps, synchronously (correlator)
//!                       ├─► raw event stream (synthesizer)
//!                       ├─► pending reply for the frame's call token
//!                       └─► FrameSink::forward (unaltered)
//! ```
//!
//! Neither path ever waits on an observer. Each observer invocation is its
//! own task; failures and panics are logged and dropped there. Taps are the
//! exception: they run inline, see every event exactly once in arrival order,
//! and must return without blocking.

use futures::FutureExt;
use futures::future::BoxFuture;
use ntbridge_core::channel::{FrameSink, HostChannel};
use ntbridge_core::error::{CallError, ObserverError};
use ntbridge_core::frame::{CallFrame, CallToken, EventFrame, InboundFrame};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

/// What an observer returns. Errors are logged, never propagated.
pub type ObserverResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Observer<T> = Arc<dyn Fn(Arc<T>) -> BoxFuture<'static, ObserverResult> + Send + Sync>;

type Tap = Arc<dyn Fn(&EventFrame) + Send + Sync>;

/// Identifies one observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(Uuid);

/// The method or command names an observer is interested in.
///
/// An entry ending in `*` matches every name with that prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameFilter(Vec<String>);

impl NameFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, name: &str) -> bool {
        self.0.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => pattern == name,
        })
    }
}

struct Registration<T> {
    handle: ObserverHandle,
    filter: NameFilter,
    observer: Observer<T>,
}

/// Wraps one host channel. Owns the host handle, so a channel is wrapped once.
pub struct Interceptor {
    host: Arc<dyn HostChannel>,
    sink: Arc<dyn FrameSink>,
    call_observers: RwLock<Vec<Registration<CallFrame>>>,
    event_observers: RwLock<Vec<Registration<EventFrame>>>,
    taps: RwLock<Vec<(ObserverHandle, Tap)>>,
    events: broadcast::Sender<Arc<EventFrame>>,
    replies: Mutex<HashMap<CallToken, oneshot::Sender<InboundFrame>>>,
    hook_log: bool,
}

impl Interceptor {
    pub fn new(host: Arc<dyn HostChannel>, sink: Arc<dyn FrameSink>, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            host,
            sink,
            call_observers: RwLock::new(Vec::new()),
            event_observers: RwLock::new(Vec::new()),
            taps: RwLock::new(Vec::new()),
            events,
            replies: Mutex::new(HashMap::new()),
            hook_log: false,
        }
    }

    /// Log every call and non-logger frame at debug level.
    pub fn with_hook_log(mut self, enabled: bool) -> Self {
        self.hook_log = enabled;
        self
    }

    // ── Registration ────────────────────────────────────────────────────

    /// Observe outbound calls whose method matches `methods`.
    pub fn on_call<F, Fut>(&self, methods: NameFilter, handler: F) -> ObserverHandle
    where
        F: Fn(Arc<CallFrame>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ObserverResult> + Send + 'static,
    {
        let handle = ObserverHandle(Uuid::new_v4());
        let observer: Observer<CallFrame> = Arc::new(move |call| handler(call).boxed());
        write(&self.call_observers).push(Registration {
            handle,
            filter: methods,
            observer,
        });
        handle
    }

    /// Observe inbound events whose command matches `commands`.
    pub fn on_event<F, Fut>(&self, commands: NameFilter, handler: F) -> ObserverHandle
    where
        F: Fn(Arc<EventFrame>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ObserverResult> + Send + 'static,
    {
        let handle = ObserverHandle(Uuid::new_v4());
        let observer: Observer<EventFrame> = Arc::new(move |event| handler(event).boxed());
        write(&self.event_observers).push(Registration {
            handle,
            filter: commands,
            observer,
        });
        handle
    }

    /// Offer every inbound event to `tap` inline, from within `deliver`.
    pub fn add_tap(&self, tap: impl Fn(&EventFrame) + Send + Sync + 'static) -> ObserverHandle {
        let handle = ObserverHandle(Uuid::new_v4());
        write(&self.taps).push((handle, Arc::new(tap)));
        handle
    }

    /// Remove a registration. Returns `false` if the handle was unknown.
    pub fn remove(&self, handle: ObserverHandle) -> bool {
        let mut taps = write(&self.taps);
        let before = taps.len();
        taps.retain(|(h, _)| *h != handle);
        if taps.len() != before {
            return true;
        }
        drop(taps);

        let mut calls = write(&self.call_observers);
        let before = calls.len();
        calls.retain(|r| r.handle != handle);
        if calls.len() != before {
            return true;
        }
        drop(calls);

        let mut events = write(&self.event_observers);
        let before = events.len();
        events.retain(|r| r.handle != handle);
        events.len() != before
    }

    /// Registered call and event observers. Taps are not counted.
    pub fn observer_count(&self) -> usize {
        read(&self.call_observers).len() + read(&self.event_observers).len()
    }

    pub fn tap_count(&self) -> usize {
        read(&self.taps).len()
    }

    // ── Outbound ────────────────────────────────────────────────────────

    /// Offer the call to call observers, then issue it to the host unaltered.
    pub async fn call(&self, call: CallFrame) -> Result<Value, CallError> {
        if self.hook_log {
            debug!(method = %call.method, args = call.args.len(), "Host call");
        }

        let shared = Arc::new(call.clone());
        for observer in matching(&self.call_observers, &call.method) {
            dispatch(call.method.clone(), observer, shared.clone());
        }

        let method = call.method.clone();
        self.host
            .invoke(call)
            .await
            .map_err(|source| CallError::Host { method, source })
    }

    // ── Inbound ─────────────────────────────────────────────────────────

    /// Route the reply frame carrying `token` to the returned receiver.
    pub fn expect_reply(&self, token: CallToken) -> oneshot::Receiver<InboundFrame> {
        let (tx, rx) = oneshot::channel();
        lock(&self.replies).insert(token, tx);
        rx
    }

    /// Forget a pending reply; a later frame with this token is only forwarded.
    pub fn cancel_reply(&self, token: &CallToken) -> bool {
        lock(&self.replies).remove(token).is_some()
    }

    pub fn pending_replies(&self) -> usize {
        lock(&self.replies).len()
    }

    /// Inbound path: tap the frame, then forward it unchanged to the host's
    /// own consumers. Never waits on observers or subscribers.
    pub fn deliver(&self, frame: InboundFrame) {
        if self.hook_log && !frame.is_logger() {
            debug!(
                channel = %frame.header.channel,
                token = frame.header.token.as_ref().map(|t| t.0.as_str()).unwrap_or(""),
                events = frame.events.len(),
                "Host frame"
            );
        }

        let taps: Vec<Tap> = read(&self.taps).iter().map(|(_, t)| t.clone()).collect();
        for event in &frame.events {
            let event = Arc::new(event.clone());
            for observer in matching(&self.event_observers, &event.command) {
                dispatch(event.command.clone(), observer, event.clone());
            }
            for tap in &taps {
                tap(&event);
            }
            // No subscriber is fine; the stream is best-effort.
            let _ = self.events.send(event);
        }

        if let Some(token) = &frame.header.token {
            if let Some(reply) = lock(&self.replies).remove(token) {
                if reply.send(frame.clone()).is_err() {
                    debug!(token = %token, "Reply arrived after its caller gave up");
                }
            }
        }

        self.sink.forward(&frame);
    }

    /// Raw stream of every inbound event, in arrival order.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EventFrame>> {
        self.events.subscribe()
    }
}

fn matching<T>(registry: &RwLock<Vec<Registration<T>>>, name: &str) -> Vec<Observer<T>> {
    read(registry)
        .iter()
        .filter(|r| r.filter.matches(name))
        .map(|r| r.observer.clone())
        .collect()
}

/// Run one observer invocation in its own task, isolating errors and panics.
fn dispatch<T: Send + Sync + 'static>(target: String, observer: Observer<T>, item: Arc<T>) {
    tokio::spawn(async move {
        let outcome = AssertUnwindSafe(async move { observer(item).await })
            .catch_unwind()
            .await;
        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => ObserverError::Failed {
                target,
                reason: e.to_string(),
            },
            Err(_) => ObserverError::Panicked { target },
        };
        warn!(error = %failure, "Observer failed");
    });
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
