//! In-process backend holding resource tables in memory.

use crate::error::{Result, SyncError};
use crate::query::FetchQuery;
use crate::subscriptions::{
    ChangeEvent, DropReason, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
    SubscriptionManager,
};
use crate::types::{compare_field_values, Record, RecordId};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use super::DataBackend;

/// Holds fetches pending while paused.
#[derive(Default)]
struct FetchGate {
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl FetchGate {
    fn wait(&self) {
        let mut paused = self.paused.lock();
        while *paused {
            self.resumed.wait(&mut paused);
        }
    }

    fn set(&self, paused: bool) {
        *self.paused.lock() = paused;
        if !paused {
            self.resumed.notify_all();
        }
    }
}

/// Memory-backed [`DataBackend`].
///
/// Writes go to per-resource tables and are broadcast as change events to
/// matching subscriptions, the way a hosted realtime service echoes table
/// changes. Failure injection and call counters make collection behavior
/// observable from tests and demos.
pub struct MemoryBackend {
    /// Rows per resource, in insertion order.
    tables: RwLock<HashMap<String, Vec<Record>>>,

    /// Live change channels.
    subscriptions: SubscriptionManager,

    /// When set, fetches fail with this message.
    fetch_failure: Mutex<Option<String>>,

    /// When set, subscribes fail with this message.
    subscribe_failure: Mutex<Option<String>>,

    gate: FetchGate,

    fetches_started: AtomicUsize,
    fetches_finished: AtomicUsize,
    subscribes: AtomicUsize,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            subscriptions: SubscriptionManager::new(),
            fetch_failure: Mutex::new(None),
            subscribe_failure: Mutex::new(None),
            gate: FetchGate::default(),
            fetches_started: AtomicUsize::new(0),
            fetches_finished: AtomicUsize::new(0),
            subscribes: AtomicUsize::new(0),
        }
    }

    // --- Table Writes ---

    /// Load rows without emitting change events.
    pub fn seed(&self, resource: &str, rows: impl IntoIterator<Item = Record>) {
        self.tables
            .write()
            .entry(resource.to_string())
            .or_default()
            .extend(rows);
    }

    /// Insert a row and broadcast it. Returns how many channels received it.
    pub fn insert(&self, resource: &str, record: Record) -> usize {
        self.tables
            .write()
            .entry(resource.to_string())
            .or_default()
            .push(record.clone());
        self.subscriptions
            .broadcast(resource, &ChangeEvent::insert(record))
    }

    /// Replace the row sharing `record`'s id and broadcast the update.
    ///
    /// Returns `None` when no such row exists (nothing is broadcast).
    pub fn update(&self, resource: &str, record: Record) -> Result<Option<usize>> {
        let id = record.require_id()?;
        {
            let mut tables = self.tables.write();
            let Some(row) = tables
                .get_mut(resource)
                .and_then(|rows| rows.iter_mut().find(|r| r.id().as_ref() == Some(&id)))
            else {
                return Ok(None);
            };
            *row = record.clone();
        }
        Ok(Some(
            self.subscriptions
                .broadcast(resource, &ChangeEvent::update(record)),
        ))
    }

    /// Remove a row by id and broadcast the delete carrying the old row.
    ///
    /// Returns `None` when no such row exists (nothing is broadcast).
    pub fn delete(&self, resource: &str, id: &RecordId) -> Option<usize> {
        let old = {
            let mut tables = self.tables.write();
            let rows = tables.get_mut(resource)?;
            let position = rows.iter().position(|r| r.id().as_ref() == Some(id))?;
            rows.remove(position)
        };
        Some(
            self.subscriptions
                .broadcast(resource, &ChangeEvent::delete_row(old)),
        )
    }

    /// Broadcast an event without touching the tables, as a transport would
    /// deliver it.
    pub fn emit(&self, resource: &str, event: ChangeEvent) -> usize {
        self.subscriptions.broadcast(resource, &event)
    }

    /// Current rows of a resource, in insertion order.
    pub fn rows(&self, resource: &str) -> Vec<Record> {
        self.tables
            .read()
            .get(resource)
            .cloned()
            .unwrap_or_default()
    }

    // --- Failure Injection ---

    pub fn fail_fetches(&self, message: Option<&str>) {
        *self.fetch_failure.lock() = message.map(str::to_string);
    }

    pub fn fail_subscriptions(&self, message: Option<&str>) {
        *self.subscribe_failure.lock() = message.map(str::to_string);
    }

    /// Hold every fetch pending until [`MemoryBackend::resume_fetches`].
    pub fn pause_fetches(&self) {
        self.gate.set(true);
    }

    pub fn resume_fetches(&self) {
        self.gate.set(false);
    }

    /// Close every live channel, as a dropped connection would.
    pub fn shutdown(&self) {
        self.subscriptions.close_all(DropReason::Closed);
    }

    // --- Introspection ---

    /// Fetches issued so far (including pending ones).
    pub fn fetch_count(&self) -> usize {
        self.fetches_started.load(Ordering::SeqCst)
    }

    /// Fetches that have returned, successfully or not.
    pub fn fetches_finished(&self) -> usize {
        self.fetches_finished.load(Ordering::SeqCst)
    }

    /// Subscribe attempts so far, including failed ones.
    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// Currently open channels.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    pub fn active_subscriptions_for(&self, resource: &str) -> usize {
        self.subscriptions.subscribers_for(resource)
    }

    fn load(&self, query: &FetchQuery) -> Result<Vec<Record>> {
        if let Some(message) = self.fetch_failure.lock().clone() {
            return Err(SyncError::Fetch {
                resource: query.resource.clone(),
                message,
            });
        }

        let mut rows: Vec<Record> = self
            .tables
            .read()
            .get(&query.resource)
            .map(|rows| {
                rows.iter()
                    .filter(|r| query.filter.as_ref().map_or(true, |f| f.matches(r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            let ordering = compare_field_values(a.get(&query.order_by), b.get(&query.order_by));
            if query.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        Ok(rows)
    }
}

impl DataBackend for MemoryBackend {
    fn fetch_all(&self, query: &FetchQuery) -> Result<Vec<Record>> {
        self.fetches_started.fetch_add(1, Ordering::SeqCst);
        self.gate.wait();

        let result = self.load(query);
        debug!(resource = %query.resource, ok = result.is_ok(), "fetch finished");

        self.fetches_finished.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn subscribe(&self, config: SubscriptionConfig) -> Result<SubscriptionHandle> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.subscribe_failure.lock().clone() {
            return Err(SyncError::Subscribe {
                resource: config.resource,
                message,
            });
        }

        Ok(self.subscriptions.subscribe(config))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}
