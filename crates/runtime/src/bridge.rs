//! The bridge: one lifecycle-scoped owner for everything wired to a host.

use futures::Stream;
use ntbridge_config::{BridgeConfig, ConfigError};
use ntbridge_core::channel::{FrameSink, HostChannel};
use ntbridge_core::error::CallError;
use ntbridge_core::event::{Notice, NoticeBus};
use ntbridge_core::frame::InboundFrame;
use ntbridge_core::identity::SelfAccount;
use ntbridge_core::member::{Group, GroupMember};
use ntbridge_hook::{Correlator, Interceptor, ObserverHandle};
use ntbridge_notice::Synthesizer;
use ntbridge_store::{BackendOpener, IdentityStore, opener_for};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::{capabilities, feed, keep_active};

pub struct Bridge {
    config: BridgeConfig,
    account: Arc<SelfAccount>,
    interceptor: Arc<Interceptor>,
    correlator: Arc<Correlator>,
    store: Arc<IdentityStore>,
    synthesizer: Arc<Synthesizer>,
    notices: Arc<NoticeBus>,
    observers: Mutex<Vec<ObserverHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Bridge {
    /// Wire a host channel using the backend named in `config.store`.
    pub fn start(
        config: BridgeConfig,
        host: Arc<dyn HostChannel>,
        sink: Arc<dyn FrameSink>,
        account: Arc<SelfAccount>,
    ) -> Result<Self, ConfigError> {
        let opener = opener_for(&config.store);
        Self::start_with_opener(config, host, sink, account, opener)
    }

    /// Wire a host channel with an explicit identity-store backend opener.
    ///
    /// The identity store opens once `account` learns its uin; until then
    /// store operations fail with `NotReady`. An invalid `config` is rejected
    /// before anything is wired.
    pub fn start_with_opener(
        config: BridgeConfig,
        host: Arc<dyn HostChannel>,
        sink: Arc<dyn FrameSink>,
        account: Arc<SelfAccount>,
        opener: Arc<dyn BackendOpener>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let host_name = host.name().to_string();
        let interceptor = Arc::new(
            Interceptor::new(host, sink, config.call.event_buffer).with_hook_log(config.hook_log),
        );
        let correlator = Arc::new(Correlator::new(
            interceptor.clone(),
            config.call.default_timeout(),
        ));

        let store = Arc::new(IdentityStore::new(config.store.short_id_floor));
        let notices = Arc::new(NoticeBus::new(config.notice.bus_capacity));
        let synthesizer = Arc::new(Synthesizer::new(
            account.clone(),
            notices.clone(),
            &config.notice,
        ));

        let tasks = vec![
            store.spawn_init(account.clone(), opener, config.store.init_retry()),
            store.spawn_cache_eviction(config.store.cache_clear_interval()),
            synthesizer.spawn(correlator.subscribe()),
        ];

        let mut observers = feed::install(&interceptor, store.clone(), account.clone());
        if config.notice.keep_chats_active {
            observers.extend(keep_active::install(
                &correlator,
                synthesizer.clone(),
                keep_active::REACTIVATE_DELAY,
            ));
        }

        info!(
            host = %host_name,
            backend = %config.store.backend,
            observers = observers.len(),
            "Bridge started"
        );

        Ok(Self {
            config,
            account,
            interceptor,
            correlator,
            store,
            synthesizer,
            notices,
            observers: Mutex::new(observers),
            tasks: Mutex::new(tasks),
        })
    }

    /// Inbound entry point: hand every frame the host emits to the bridge.
    pub fn deliver(&self, frame: InboundFrame) {
        self.interceptor.deliver(frame);
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn account(&self) -> &Arc<SelfAccount> {
        &self.account
    }

    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    pub fn store(&self) -> &Arc<IdentityStore> {
        &self.store
    }

    pub fn synthesizer(&self) -> &Arc<Synthesizer> {
        &self.synthesizer
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Arc<Notice>> {
        self.notices.subscribe()
    }

    /// Synthesized notices as a stream. Notices missed by a slow consumer
    /// are skipped.
    pub fn notices(&self) -> impl Stream<Item = Arc<Notice>> + Send + 'static {
        BroadcastStream::new(self.notices.subscribe()).filter_map(|n| n.ok())
    }

    pub async fn get_groups(&self, force_refresh: bool) -> Result<Vec<Group>, CallError> {
        capabilities::get_groups(&self.correlator, force_refresh, None).await
    }

    pub async fn get_group_member(
        &self,
        group_code: &str,
        uid: &str,
        force_refresh: bool,
    ) -> Result<GroupMember, CallError> {
        capabilities::get_group_member(&self.correlator, group_code, uid, force_refresh, None).await
    }

    /// Remove every hook, stop background tasks and fail pending waiters.
    pub fn shutdown(&self) {
        let observers: Vec<ObserverHandle> = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in &observers {
            self.interceptor.remove(*handle);
        }

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in &tasks {
            task.abort();
        }

        self.correlator.shutdown();
        info!(observers = observers.len(), tasks = tasks.len(), "Bridge shut down");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        for task in self.tasks.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            task.abort();
        }
    }
}
