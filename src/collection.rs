//! Synchronized collection: an initial snapshot kept live by change events.

use crate::backend::DataBackend;
use crate::error::Result;
use crate::query::{ChangeFilter, FetchQuery};
use crate::state::{apply_event, Applied, InsertPolicy};
use crate::subscriptions::{
    ChangeEvent, ChangeKind, ChannelMessage, DropReason, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId,
};
use crate::types::{Record, RecordId, CREATED_AT_FIELD};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Collection configuration.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Field the initial snapshot is ordered by.
    pub order_by: String,

    /// Newest first when true.
    pub descending: bool,

    /// How Inserts treat ids already present.
    pub insert_policy: InsertPolicy,

    /// Change events buffered per subscription before the backend drops it.
    pub buffer_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            order_by: CREATED_AT_FIELD.to_string(),
            descending: true,
            insert_policy: InsertPolicy::Prepend,
            buffer_size: 1000,
        }
    }
}

/// Why a collection changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateReason {
    /// Initial snapshot replaced the data.
    Loaded { count: usize },
    /// Initial fetch failed; data kept, loading cleared.
    LoadFailed,
    /// A change event was applied.
    Event { kind: ChangeKind, applied: Applied },
    /// The consumer replaced the data.
    Replaced,
    /// The collection was re-pointed at another resource.
    ResourceChanged { resource: String },
}

/// Notification sent to watchers after every mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionUpdate {
    pub version: u64,
    pub reason: UpdateReason,
}

/// Point-in-time copy of a collection.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionSnapshot {
    pub resource: String,
    pub data: Vec<Record>,
    pub loading: bool,
    pub version: u64,
}

impl CollectionSnapshot {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Ids in collection order; rows without an id are skipped.
    pub fn ids(&self) -> Vec<RecordId> {
        self.data.iter().filter_map(Record::id).collect()
    }

    pub fn find(&self, id: &RecordId) -> Option<&Record> {
        self.data.iter().find(|r| r.id().as_ref() == Some(id))
    }

    /// Narrow every row into a caller-defined type.
    pub fn decode_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.data.iter().map(|r| r.decode::<T>()).collect()
    }
}

struct CollectionState {
    resource: String,
    data: Vec<Record>,
    loading: bool,
    version: u64,
}

impl CollectionState {
    fn snapshot(&self) -> CollectionSnapshot {
        CollectionSnapshot {
            resource: self.resource.clone(),
            data: self.data.clone(),
            loading: self.loading,
            version: self.version,
        }
    }
}

/// State shared between a collection and its workers.
struct Shared {
    state: Mutex<CollectionState>,
    changed: Condvar,
    watchers: Mutex<Vec<Sender<CollectionUpdate>>>,
}

impl Shared {
    /// Bump the version and wake everyone waiting on this collection.
    ///
    /// Must be called with `state` locked so watchers see updates in order.
    fn commit(&self, state: &mut CollectionState, reason: UpdateReason) {
        state.version += 1;
        let update = CollectionUpdate {
            version: state.version,
            reason,
        };

        self.watchers
            .lock()
            .retain(|watcher| watcher.send(update.clone()).is_ok());
        self.changed.notify_all();
    }
}

/// Per-mount flags shared with the worker.
#[derive(Default)]
struct MountToken {
    cancelled: AtomicBool,
    /// Set when the backend dropped the channel on its own.
    channel_lost: AtomicBool,
}

impl MountToken {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn is_channel_lost(&self) -> bool {
        self.channel_lost.load(Ordering::SeqCst)
    }
}

/// One acquire/release cycle: a subscription plus the worker draining it.
struct Mount {
    token: Arc<MountToken>,
    subscription: Option<SubscriptionId>,
}

/// Fetches the snapshot, then applies buffered and live events.
struct SyncWorker {
    backend: Arc<dyn DataBackend>,
    shared: Arc<Shared>,
    token: Arc<MountToken>,
    query: FetchQuery,
    policy: InsertPolicy,
    subscription: Option<SubscriptionHandle>,
}

impl SyncWorker {
    fn run(mut self) {
        let subscription = self.subscription.take();

        let fetched = self.backend.fetch_all(&self.query);
        if !self.apply_snapshot(fetched) {
            return;
        }

        let Some(handle) = subscription else {
            return;
        };

        // Events that arrived during the fetch are already queued here and
        // replay in arrival order.
        for message in handle.receiver.iter() {
            match message {
                ChannelMessage::Change(event) => {
                    if !self.apply_change(event) {
                        return;
                    }
                }
                ChannelMessage::Dropped { reason } => {
                    if reason != DropReason::Unsubscribed {
                        self.lose_channel(handle.id, Some(reason));
                    }
                    return;
                }
            }
        }

        // A full buffer swallows the overflow notice, so a disconnect the
        // mount did not ask for is a lost channel too.
        if self.token.is_cancelled() {
            debug!(resource = %self.query.resource, subscription = %handle.id, "change channel closed");
        } else {
            self.lose_channel(handle.id, None);
        }
    }

    fn lose_channel(&self, id: SubscriptionId, reason: Option<DropReason>) {
        self.token.channel_lost.store(true, Ordering::SeqCst);
        warn!(
            resource = %self.query.resource,
            subscription = %id,
            reason = ?reason,
            "change channel dropped; collection will no longer update"
        );
    }

    /// Returns false once the mount has been torn down.
    fn apply_snapshot(&self, fetched: Result<Vec<Record>>) -> bool {
        let mut state = self.shared.state.lock();
        if self.token.is_cancelled() {
            debug!(resource = %self.query.resource, "discarding fetch that finished after teardown");
            return false;
        }

        match fetched {
            Ok(records) => {
                let count = records.len();
                state.data = records;
                state.loading = false;
                self.shared
                    .commit(&mut state, UpdateReason::Loaded { count });
                info!(resource = %self.query.resource, count, "initial snapshot loaded");
            }
            Err(e) => {
                state.loading = false;
                self.shared.commit(&mut state, UpdateReason::LoadFailed);
                warn!(resource = %self.query.resource, error = %e, "initial fetch failed");
            }
        }

        true
    }

    /// Returns false once the mount has been torn down.
    fn apply_change(&self, event: ChangeEvent) -> bool {
        let mut state = self.shared.state.lock();
        if self.token.is_cancelled() {
            return false;
        }

        let kind = event.kind();
        match apply_event(&mut state.data, event, self.policy) {
            Ok(applied) if applied.changed() => {
                self.shared
                    .commit(&mut state, UpdateReason::Event { kind, applied });
            }
            Ok(_) => {
                debug!(resource = %self.query.resource, %kind, "no matching row; event ignored");
            }
            Err(e) => {
                warn!(resource = %self.query.resource, %kind, error = %e, "ignoring malformed change event");
            }
        }

        true
    }
}

/// A client-side mirror of one backend resource.
///
/// Opening a collection subscribes to the resource's change channel, then
/// fetches the full snapshot on a worker thread. Events that arrive while
/// the fetch is in flight are queued on the channel and applied after the
/// snapshot, so nothing is lost to the race; a row present in both the
/// snapshot and a queued Insert shows up twice under
/// [`InsertPolicy::Prepend`].
///
/// Failures never reach the consumer. A failed fetch clears `loading` and
/// keeps whatever data was there; a failed subscribe leaves the collection
/// static. Both are logged.
///
/// Dropping the collection (or calling [`SyncedCollection::close`]) releases
/// its subscription; a fetch that completes afterwards is discarded.
pub struct SyncedCollection {
    backend: Arc<dyn DataBackend>,
    config: SyncConfig,
    scope: Option<ChangeFilter>,
    shared: Arc<Shared>,
    mount: Option<Mount>,
}

impl SyncedCollection {
    /// Mirror every row of `resource`, starting from `initial`.
    pub fn open(
        backend: Arc<dyn DataBackend>,
        resource: impl Into<String>,
        initial: Vec<Record>,
        config: SyncConfig,
    ) -> Self {
        Self::open_scoped(backend, resource, None, initial, config)
    }

    /// Mirror the rows of `resource` passing `scope`. The same filter is
    /// applied server-side to the fetch and to the change channel.
    pub fn open_scoped(
        backend: Arc<dyn DataBackend>,
        resource: impl Into<String>,
        scope: Option<ChangeFilter>,
        initial: Vec<Record>,
        config: SyncConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(CollectionState {
                resource: resource.into(),
                data: initial,
                loading: true,
                version: 0,
            }),
            changed: Condvar::new(),
            watchers: Mutex::new(Vec::new()),
        });

        let mut collection = Self {
            backend,
            config,
            scope,
            shared,
            mount: None,
        };
        collection.mount();
        collection
    }

    // --- Reads ---

    pub fn data(&self) -> Vec<Record> {
        self.shared.state.lock().data.clone()
    }

    pub fn loading(&self) -> bool {
        self.shared.state.lock().loading
    }

    /// Mutation counter; bumps on every visible change.
    pub fn version(&self) -> u64 {
        self.shared.state.lock().version
    }

    pub fn resource(&self) -> String {
        self.shared.state.lock().resource.clone()
    }

    pub fn scope(&self) -> Option<&ChangeFilter> {
        self.scope.as_ref()
    }

    pub fn snapshot(&self) -> CollectionSnapshot {
        self.shared.state.lock().snapshot()
    }

    /// Whether a live subscription is currently held. False once the
    /// backend has dropped the channel.
    pub fn is_subscribed(&self) -> bool {
        self.subscription_id().is_some()
    }

    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.mount
            .as_ref()
            .filter(|m| !m.token.is_channel_lost())
            .and_then(|m| m.subscription)
    }

    // --- Consumer Writes ---

    /// Replace the local data. Later change events apply on top of it.
    pub fn set_data(&self, data: Vec<Record>) {
        self.update_data(|records| *records = data);
    }

    /// Mutate the local data in place.
    pub fn update_data<F>(&self, f: F)
    where
        F: FnOnce(&mut Vec<Record>),
    {
        let mut state = self.shared.state.lock();
        f(&mut state.data);
        self.shared.commit(&mut state, UpdateReason::Replaced);
    }

    // --- Change Notification ---

    /// Receive a [`CollectionUpdate`] after every mutation from now on.
    pub fn watch(&self) -> Receiver<CollectionUpdate> {
        let (sender, receiver) = unbounded();
        self.shared.watchers.lock().push(sender);
        receiver
    }

    /// Block until `predicate` holds for the collection or `timeout` passes.
    /// Returns whether the predicate held.
    pub fn wait_until<F>(&self, timeout: Duration, mut predicate: F) -> bool
    where
        F: FnMut(&CollectionSnapshot) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if predicate(&state.snapshot()) {
                return true;
            }
            if self.shared.changed.wait_until(&mut state, deadline).timed_out() {
                return predicate(&state.snapshot());
            }
        }
    }

    /// Block until the initial load finished (or failed).
    pub fn wait_loaded(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |snapshot| !snapshot.loading)
    }

    // --- Lifecycle ---

    /// Point the collection at another resource.
    ///
    /// The current subscription is released before the new one is opened.
    /// Data is kept until the new snapshot arrives; `loading` goes back to
    /// true. Same-name calls are no-ops.
    pub fn set_resource(&mut self, resource: impl Into<String>) {
        let resource = resource.into();
        if self.mount.is_some() && self.shared.state.lock().resource == resource {
            return;
        }

        self.teardown();
        {
            let mut state = self.shared.state.lock();
            state.resource = resource.clone();
            state.loading = true;
            self.shared
                .commit(&mut state, UpdateReason::ResourceChanged { resource });
        }
        self.mount();
    }

    /// Release the subscription. Data stays readable.
    pub fn close(&mut self) {
        self.teardown();
    }

    fn mount(&mut self) {
        let resource = self.resource();
        let token = Arc::new(MountToken::default());

        let subscription_config = SubscriptionConfig::resource(resource.clone())
            .with_filter(self.scope.clone())
            .with_buffer_size(self.config.buffer_size);

        let handle = match self.backend.subscribe(subscription_config) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(resource = %resource, error = %e, "subscribe failed; collection will not receive live changes");
                None
            }
        };
        let subscription = handle.as_ref().map(|h| h.id);

        let worker = SyncWorker {
            backend: Arc::clone(&self.backend),
            shared: Arc::clone(&self.shared),
            token: Arc::clone(&token),
            query: FetchQuery {
                resource: resource.clone(),
                order_by: self.config.order_by.clone(),
                descending: self.config.descending,
                filter: self.scope.clone(),
            },
            policy: self.config.insert_policy,
            subscription: handle,
        };

        let spawned = thread::Builder::new()
            .name(format!("sync-{}", resource))
            .spawn(move || worker.run());

        if let Err(e) = spawned {
            warn!(resource = %resource, error = %e, "failed to start sync worker");
            if let Some(id) = subscription {
                self.backend.unsubscribe(id);
            }
            self.mount = None;
            return;
        }

        debug!(resource = %resource, subscription = ?subscription, "mounted");
        self.mount = Some(Mount {
            token,
            subscription,
        });
    }

    fn teardown(&mut self) {
        let Some(mount) = self.mount.take() else {
            return;
        };

        // Cancel under the state lock so no worker mutation can interleave.
        {
            let _state = self.shared.state.lock();
            mount.token.cancelled.store(true, Ordering::SeqCst);
        }

        if let Some(id) = mount.subscription {
            self.backend.unsubscribe(id);
        }
        debug!(subscription = ?mount.subscription, "unmounted");
    }
}

impl Drop for SyncedCollection {
    fn drop(&mut self) {
        self.teardown();
    }
}
