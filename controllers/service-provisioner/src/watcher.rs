//! Kubernetes resource watcher with a local cache.
//!
//! This module turns a `kube_runtime::watcher` stream into typed lifecycle
//! events (`Added`, `Updated`, `Deleted`) for a single registered handler,
//! while mirroring the collection into a `reflector::Store` keyed by
//! namespace/name.
//!
//! Two background tasks are spawned by [`Watcher::start`]:
//! - the sync loop consumes the watch stream, keeps the store current and
//!   replays the cache as `Updated` events every resync period
//! - the dispatcher delivers events to the handler one at a time
//!
//! The dispatcher stays closed until [`Watcher::wait_for_initial_sync`] has
//! returned true, so no handler ever observes a cache that has not completed
//! its first full list. Events seen before that are buffered in order.
//!
//! At most one resync replay is queued at a time. A tick that finds the
//! previous replay still undelivered is skipped, so a slow handler cannot
//! make the queue grow without bound.

use crate::error::ControllerError;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::{Api, Resource};
use kube_runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube_runtime::{watcher, WatchStreamExt};
use k8s_openapi::serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle event delivered to the registered handler.
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    /// Object appeared in the cache
    Added(Arc<K>),
    /// Object changed, or was replayed by a resync (`old` and `new` equal)
    Updated {
        /// Cached state before the change
        old: Arc<K>,
        /// State after the change
        new: Arc<K>,
    },
    /// Object disappeared from the cache (last known state)
    Deleted(Arc<K>),
}

/// Receives the lifecycle events of one watched collection.
///
/// Calls are made serially from a single dispatch task.
#[async_trait::async_trait]
pub trait EventHandler<K>: Send + Sync {
    /// Called when an object is added.
    async fn on_added(&self, resource: Arc<K>);
    /// Called when an object is updated and on every resync.
    async fn on_updated(&self, old: Arc<K>, new: Arc<K>);
    /// Called when an object is deleted.
    async fn on_deleted(&self, resource: Arc<K>);
    /// Called once per resync period after the replay, even when the cache
    /// is empty.
    async fn on_resync(&self) {}
}

/// Entry of the dispatch queue.
enum Dispatch<K> {
    Event(ResourceEvent<K>),
    /// End of a resync replay
    ResyncDone,
}

/// Raw watch stream consumed by [`Watcher::start`].
pub type WatchEvents<K> = BoxStream<'static, Result<watcher::Event<K>, watcher::Error>>;

/// Watch stream for `api`, retrying failed list/watch calls with the
/// watcher's default backoff.
pub fn watch_events<K>(api: Api<K>, config: watcher::Config) -> WatchEvents<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher(api, config).default_backoff().boxed()
}

/// Watches one resource collection and keeps a local cache of it.
pub struct Watcher<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
{
    resource_name: String,
    resync_period: Duration,
    store: Store<K>,
    writer: Option<Writer<K>>,
    dispatch_gate: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<K> Debug for Watcher<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("resource_name", &self.resource_name)
            .field("resync_period", &self.resync_period)
            .field("started", &self.writer.is_none())
            .field("synced", &self.has_synced())
            .finish_non_exhaustive()
    }
}

impl<K> Watcher<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
{
    /// Creates a watcher for `resource_name` objects that replays its cache
    /// every `resync_period`.
    pub fn new(resource_name: impl Into<String>, resync_period: Duration) -> Self {
        let (store, writer) = reflector::store();
        let (dispatch_gate, _) = watch::channel(false);
        Self {
            resource_name: resource_name.into(),
            resync_period,
            store,
            writer: Some(writer),
            dispatch_gate,
            tasks: Vec::new(),
        }
    }

    /// Read-through cache keyed by namespace/name.
    pub fn store(&self) -> Store<K> {
        self.store.clone()
    }

    /// Whether the initial sync completed and dispatch is open.
    pub fn has_synced(&self) -> bool {
        *self.dispatch_gate.borrow()
    }

    /// Starts the sync loop and the dispatcher in background tasks.
    ///
    /// Fails if the watcher was already started.
    pub fn start<H>(
        &mut self,
        events: WatchEvents<K>,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> Result<(), ControllerError>
    where
        H: EventHandler<K> + 'static,
    {
        let writer = self.writer.take().ok_or_else(|| {
            ControllerError::Watch(format!("{} watcher already started", self.resource_name))
        })?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let replay_pending = Arc::new(AtomicBool::new(false));

        let sync_loop = SyncLoop {
            resource_name: self.resource_name.clone(),
            resync_period: self.resync_period,
            store: self.store.clone(),
            writer,
            events_tx,
            replay_pending: Arc::clone(&replay_pending),
            relisted: None,
        };
        let dispatcher = Dispatcher {
            resource_name: self.resource_name.clone(),
            events: events_rx,
            handler,
            replay_pending,
        };
        self.tasks.push(tokio::spawn(sync_loop.run(events, cancel.clone())));
        self.tasks.push(tokio::spawn(dispatcher.run(self.dispatch_gate.subscribe(), cancel)));
        Ok(())
    }

    /// Waits until the cache completed one full list.
    ///
    /// Returns false if `cancel` fires first or the sync loop stopped before
    /// the list completed. On success, event dispatch is opened.
    pub async fn wait_for_initial_sync(&self, cancel: &CancellationToken) -> bool {
        let synced = tokio::select! {
            () = cancel.cancelled() => false,
            ready = self.store.wait_until_ready() => ready.is_ok(),
        };

        if synced {
            info!("{} cache synced ({} objects)", self.resource_name, self.store.state().len());
            self.dispatch_gate.send_replace(true);
        } else {
            warn!("{} cache did not sync", self.resource_name);
        }
        synced
    }

    /// Waits for the background tasks to exit. Cancel the token passed to
    /// [`Watcher::start`] first.
    pub async fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("{} watcher task panicked: {}", self.resource_name, e);
            }
        }
    }
}

/// State owned by the sync loop task.
struct SyncLoop<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
{
    resource_name: String,
    resync_period: Duration,
    store: Store<K>,
    writer: Writer<K>,
    events_tx: mpsc::UnboundedSender<Dispatch<K>>,
    /// Set while a resync replay is queued and not yet delivered
    replay_pending: Arc<AtomicBool>,
    /// Objects seen during an in-progress relist
    relisted: Option<HashSet<ObjectRef<K>>>,
}

impl<K> SyncLoop<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Send + Sync + 'static,
{
    async fn run(mut self, mut events: WatchEvents<K>, cancel: CancellationToken) {
        info!("Starting {} watcher", self.resource_name);

        let mut resync = tokio::time::interval_at(Instant::now() + self.resync_period, self.resync_period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("{} watcher stopped", self.resource_name);
                    break;
                }
                _ = resync.tick() => self.resync(),
                next = events.next() => match next {
                    Some(Ok(event)) => self.apply(event),
                    Some(Err(e)) => warn!("{} watch stream error: {}", self.resource_name, e),
                    None => {
                        error!("{} watch stream ended", self.resource_name);
                        break;
                    }
                },
            }
        }
    }

    /// Updates the cache with `event` and forwards the resulting lifecycle
    /// events. Lookups happen before the store is written so `old` is the
    /// previously cached state.
    fn apply(&mut self, event: watcher::Event<K>) {
        let mut emitted = Vec::new();

        match &event {
            watcher::Event::Init => {
                debug!("{} relist started", self.resource_name);
                self.relisted = Some(HashSet::new());
            }
            watcher::Event::InitApply(obj) => {
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(ObjectRef::from_obj(obj));
                }
                emitted.push(self.applied(obj));
            }
            watcher::Event::Apply(obj) => emitted.push(self.applied(obj)),
            watcher::Event::Delete(obj) => emitted.push(ResourceEvent::Deleted(Arc::new(obj.clone()))),
            watcher::Event::InitDone => {
                let seen = self.relisted.take().unwrap_or_default();
                emitted.extend(
                    self.store
                        .state()
                        .into_iter()
                        .filter(|cached| !seen.contains(&ObjectRef::from_obj(cached.as_ref())))
                        .map(ResourceEvent::Deleted),
                );
                debug!("{} relist complete ({} objects)", self.resource_name, seen.len());
            }
        }

        self.writer.apply_watcher_event(&event);
        for event in emitted {
            self.send(event);
        }
    }

    fn applied(&self, obj: &K) -> ResourceEvent<K> {
        let new = Arc::new(obj.clone());
        match self.store.get(&ObjectRef::from_obj(obj)) {
            Some(old) => ResourceEvent::Updated { old, new },
            None => ResourceEvent::Added(new),
        }
    }

    fn resync(&self) {
        if self.replay_pending.swap(true, Ordering::AcqRel) {
            debug!("Skipping {} resync, previous replay still queued", self.resource_name);
            return;
        }

        let cached = self.store.state();
        debug!("Resyncing {} cached {} objects", cached.len(), self.resource_name);
        for obj in cached {
            self.send(ResourceEvent::Updated {
                old: Arc::clone(&obj),
                new: obj,
            });
        }
        self.enqueue(Dispatch::ResyncDone);
    }

    fn send(&self, event: ResourceEvent<K>) {
        self.enqueue(Dispatch::Event(event));
    }

    fn enqueue(&self, entry: Dispatch<K>) {
        if self.events_tx.send(entry).is_err() {
            debug!("{} dispatcher gone, dropping event", self.resource_name);
        }
    }
}

/// Single delivery path from the queue to the handler.
struct Dispatcher<K, H: ?Sized> {
    resource_name: String,
    events: mpsc::UnboundedReceiver<Dispatch<K>>,
    handler: Arc<H>,
    replay_pending: Arc<AtomicBool>,
}

impl<K, H> Dispatcher<K, H>
where
    K: Send + Sync + 'static,
    H: EventHandler<K> + ?Sized,
{
    /// Delivers buffered events to the handler, one at a time, once the gate
    /// opens.
    ///
    /// A handler call in progress when `cancel` fires runs to completion; no
    /// further events are delivered.
    async fn run(mut self, mut gate: watch::Receiver<bool>, cancel: CancellationToken) {
        let opened = tokio::select! {
            () = cancel.cancelled() => false,
            opened = async { gate.wait_for(|open| *open).await.is_ok() } => opened,
        };
        if !opened {
            return;
        }
        debug!("{} event dispatch started", self.resource_name);

        loop {
            let entry = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                entry = self.events.recv() => match entry {
                    Some(entry) => entry,
                    None => break,
                },
            };

            match entry {
                Dispatch::Event(ResourceEvent::Added(obj)) => self.handler.on_added(obj).await,
                Dispatch::Event(ResourceEvent::Updated { old, new }) => self.handler.on_updated(old, new).await,
                Dispatch::Event(ResourceEvent::Deleted(obj)) => self.handler.on_deleted(obj).await,
                Dispatch::ResyncDone => {
                    self.handler.on_resync().await;
                    self.replay_pending.store(false, Ordering::Release);
                }
            }
        }
        debug!("{} event dispatch stopped", self.resource_name);
    }
}
