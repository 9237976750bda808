//! Data backend seam.
//!
//! A [`DataBackend`] is the hosted database/realtime service a collection
//! mirrors. The sync layer only needs a bulk read and a change channel;
//! record shape is the backend's business beyond `id` and `created_at`.

mod memory;

pub use memory::MemoryBackend;

use crate::error::Result;
use crate::query::FetchQuery;
use crate::subscriptions::{SubscriptionConfig, SubscriptionHandle, SubscriptionId};
use crate::types::Record;

/// Remote source of records and change events.
///
/// Calls are blocking; collections make them from their own worker thread.
pub trait DataBackend: Send + Sync {
    /// Load every row of `query.resource` matching `query.filter`, ordered
    /// by `query.order_by`. Unknown resources yield no rows.
    fn fetch_all(&self, query: &FetchQuery) -> Result<Vec<Record>>;

    /// Open a change channel for `config.resource`, scoped by
    /// `config.filter`. Unknown resources yield a channel that never fires.
    fn subscribe(&self, config: SubscriptionConfig) -> Result<SubscriptionHandle>;

    /// Release a channel. The backend must drop its sending side so the
    /// handle's receiver disconnects.
    fn unsubscribe(&self, id: SubscriptionId);
}
