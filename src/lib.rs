//! # Şantiye Sync
//!
//! Realtime synchronized collections for the construction-site dashboard.
//! A collection mirrors one backend resource (sites, personnel, materials,
//! daily reports, attendance, notifications) as an ordered list of records:
//! one initial snapshot, then every insert/update/delete the backend
//! streams, applied in arrival order.
//!
//! ## Core Concepts
//!
//! - **Records**: dynamic field maps identified by `id`
//! - **Change events**: Insert (prepend), Update (replace in place), Delete
//! - **Backends**: anything implementing [`DataBackend`]; [`MemoryBackend`]
//!   ships in-process
//! - **Collections**: [`SyncedCollection`] per consumer, released on drop
//! - **Notifications**: [`NotificationFeed`], a collection scoped to one user
//!
//! ## Example
//!
//! ```ignore
//! use santiye_sync::{MemoryBackend, Record, SyncConfig, SyncedCollection};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let sites = SyncedCollection::open(backend.clone(), "sites", Vec::new(), SyncConfig::default());
//! sites.wait_loaded(Duration::from_secs(1));
//!
//! backend.insert("sites", Record::with_id("A").with("name", "Kartal"));
//! let updates = sites.watch();
//! ```

pub mod backend;
pub mod collection;
pub mod error;
pub mod notifications;
pub mod query;
pub mod state;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use backend::{DataBackend, MemoryBackend};
pub use collection::{
    CollectionSnapshot, CollectionUpdate, SyncConfig, SyncedCollection, UpdateReason,
};
pub use error::{Result, SyncError};
pub use notifications::{NotificationConfig, NotificationFeed};
pub use query::{ChangeFilter, FetchQuery};
pub use state::{apply_event, Applied, InsertPolicy};
pub use subscriptions::{
    ChangeEvent, ChangeKind, ChannelMessage, DropReason, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
pub use types::*;
