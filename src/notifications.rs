//! Per-user notification inbox built on [`SyncedCollection`].

use crate::backend::DataBackend;
use crate::collection::{CollectionSnapshot, SyncConfig, SyncedCollection};
use crate::query::ChangeFilter;
use crate::types::{resources, Record};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Notification feed configuration.
#[derive(Clone, Debug)]
pub struct NotificationConfig {
    /// Resource holding notifications.
    pub resource: String,

    /// Column naming the owning user.
    pub owner_field: String,

    /// Boolean column marking a notification as read.
    pub read_field: String,

    pub sync: SyncConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            resource: resources::NOTIFICATIONS.to_string(),
            owner_field: "user_id".to_string(),
            read_field: "read".to_string(),
            sync: SyncConfig::default(),
        }
    }
}

/// The signed-in user's notifications, kept live.
///
/// Without an owner the feed is idle: nothing is fetched or subscribed, the
/// data is empty and `loading` stays true until an owner is supplied.
pub struct NotificationFeed {
    backend: Arc<dyn DataBackend>,
    config: NotificationConfig,
    owner: Option<String>,
    collection: Option<SyncedCollection>,
}

impl NotificationFeed {
    /// Create a feed for `owner`. An empty owner counts as absent.
    pub fn new(
        backend: Arc<dyn DataBackend>,
        owner: Option<String>,
        config: NotificationConfig,
    ) -> Self {
        let mut feed = Self {
            backend,
            config,
            owner: None,
            collection: None,
        };
        feed.set_owner(owner);
        feed
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Re-scope the feed, e.g. on sign-in or sign-out.
    ///
    /// The previous owner's channel is released first and their rows are
    /// not carried over.
    pub fn set_owner(&mut self, owner: Option<String>) {
        let owner = owner.filter(|o| !o.is_empty());
        if owner == self.owner && (owner.is_none() || self.collection.is_some()) {
            return;
        }

        // Drop releases the old subscription before a new one is opened.
        self.collection = None;
        self.owner = owner;

        let Some(owner) = self.owner.clone() else {
            debug!("notification feed idle: no owner");
            return;
        };

        let scope = ChangeFilter::eq(self.config.owner_field.clone(), Value::String(owner));
        self.collection = Some(SyncedCollection::open_scoped(
            Arc::clone(&self.backend),
            self.config.resource.clone(),
            Some(scope),
            Vec::new(),
            self.config.sync.clone(),
        ));
    }

    pub fn is_idle(&self) -> bool {
        self.collection.is_none()
    }

    pub fn data(&self) -> Vec<Record> {
        self.collection
            .as_ref()
            .map(SyncedCollection::data)
            .unwrap_or_default()
    }

    pub fn loading(&self) -> bool {
        self.collection
            .as_ref()
            .map_or(true, SyncedCollection::loading)
    }

    pub fn snapshot(&self) -> CollectionSnapshot {
        match self.collection {
            Some(ref collection) => collection.snapshot(),
            None => CollectionSnapshot {
                resource: self.config.resource.clone(),
                data: Vec::new(),
                loading: true,
                version: 0,
            },
        }
    }

    /// Notifications whose read flag is not `true`.
    pub fn unread_count(&self) -> usize {
        self.data()
            .iter()
            .filter(|r| r.get(&self.config.read_field) != Some(&Value::Bool(true)))
            .count()
    }

    /// Underlying collection, when an owner is set.
    pub fn collection(&self) -> Option<&SyncedCollection> {
        self.collection.as_ref()
    }

    /// Block until `predicate` holds or `timeout` passes. An idle feed is
    /// checked once.
    pub fn wait_until<F>(&self, timeout: Duration, mut predicate: F) -> bool
    where
        F: FnMut(&CollectionSnapshot) -> bool,
    {
        match self.collection {
            Some(ref collection) => collection.wait_until(timeout, predicate),
            None => predicate(&self.snapshot()),
        }
    }
}
