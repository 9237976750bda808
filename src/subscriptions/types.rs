//! Subscription types for live change events.

use crate::error::Result;
use crate::query::ChangeFilter;
use crate::types::{Record, RecordId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Resource whose changes are delivered.
    pub resource: String,

    /// Optional equality scope (e.g. `user_id=eq.42`).
    pub filter: Option<ChangeFilter>,

    /// Max buffered messages before dropping the subscriber.
    /// Default: 1000
    pub buffer_size: usize,
}

impl SubscriptionConfig {
    /// Subscribe to every change on a resource.
    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: Option<ChangeFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            resource: String::new(),
            filter: None,
            buffer_size: 1000,
        }
    }
}

/// Kind of a change event, for logging and update reasons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "INSERT"),
            ChangeKind::Update => write!(f, "UPDATE"),
            ChangeKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// A row-level change on one resource.
///
/// Serializes to the realtime wire shape:
/// `{"eventType": "UPDATE", "new": {...}}`. Extra payload keys such as
/// `schema`, `table` or `commit_timestamp` are ignored when decoding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "UPPERCASE")]
pub enum ChangeEvent {
    /// A row was inserted.
    Insert { new: Record },

    /// A row was replaced.
    Update { new: Record },

    /// A row was removed. `old` holds at least the row's `id`.
    Delete { old: Record },
}

impl ChangeEvent {
    pub fn insert(record: Record) -> Self {
        ChangeEvent::Insert { new: record }
    }

    pub fn update(record: Record) -> Self {
        ChangeEvent::Update { new: record }
    }

    /// Delete by id alone.
    pub fn delete(id: impl Into<serde_json::Value>) -> Self {
        ChangeEvent::Delete {
            old: Record::with_id(id),
        }
    }

    /// Delete carrying the full old row (needed for scoped channels).
    pub fn delete_row(old: Record) -> Self {
        ChangeEvent::Delete { old }
    }

    /// Decode a realtime payload.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(payload.clone())?)
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert { .. } => ChangeKind::Insert,
            ChangeEvent::Update { .. } => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// The row this event is about (new row, or old row for deletes).
    pub fn record(&self) -> &Record {
        match self {
            ChangeEvent::Insert { new } | ChangeEvent::Update { new } => new,
            ChangeEvent::Delete { old } => old,
        }
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record().id()
    }
}

/// Messages delivered on a subscription channel.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelMessage {
    /// A matching change.
    Change(ChangeEvent),

    /// Subscription was dropped; no further messages follow.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Backend shut the channel down.
    Closed,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle to one live change channel.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub resource: String,
    /// Channel to receive messages.
    pub receiver: crossbeam_channel::Receiver<ChannelMessage>,
}

impl SubscriptionHandle {
    /// Receive the next message (blocking).
    pub fn recv(&self) -> std::result::Result<ChannelMessage, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<ChannelMessage, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<ChannelMessage, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .finish()
    }
}
