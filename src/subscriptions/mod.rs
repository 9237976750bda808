//! Subscription system for live resource changes.
//!
//! This module provides in-process change channels:
//! - One channel per (resource, optional equality filter)
//! - Bounded buffers with slow-subscriber dropping
//! - Explicit lifecycle messages when a channel goes away
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new();
//!
//! let config = SubscriptionConfig::resource("notifications")
//!     .with_filter(Some(ChangeFilter::eq("user_id", "u-1")));
//! let handle = manager.subscribe(config);
//!
//! loop {
//!     match handle.recv() {
//!         Ok(ChannelMessage::Change(event)) => println!("{}: {:?}", event.kind(), event.record_id()),
//!         Ok(ChannelMessage::Dropped { reason }) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    ChangeEvent, ChangeKind, ChannelMessage, DropReason, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId,
};
