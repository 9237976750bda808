//! Subscription manager for fanning change events out to channels.

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::types::{
    ChangeEvent, ChannelMessage, DropReason, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId,
};

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<ChannelMessage>,
}

impl Subscription {
    /// Try to send a message. Returns false if the buffer is full or the
    /// receiver is gone (subscriber will be dropped).
    fn try_send(&self, message: ChannelMessage) -> bool {
        match self.sender.try_send(message) {
            Ok(()) => true,
            Err(crossbeam_channel::TrySendError::Full(_)) => false,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => false,
        }
    }

    /// Check if this subscription wants an event on `resource`.
    fn matches(&self, resource: &str, event: &ChangeEvent) -> bool {
        if self.config.resource != resource {
            return false;
        }

        match self.config.filter {
            Some(ref filter) => filter.matches(event.record()),
            None => true,
        }
    }
}

/// Manages subscriptions and broadcasts change events.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a channel for one resource.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));
        let resource = config.resource.clone();

        debug!(subscription = %id, resource = %resource, filter = ?config.filter, "subscribed");
        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle {
            id,
            resource,
            receiver,
        }
    }

    /// Unsubscribe and clean up. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            debug!(subscription = %id, resource = %sub.config.resource, "unsubscribed");
            // Best effort; the receiver may already be gone.
            let _ = sub.sender.try_send(ChannelMessage::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Drop every subscription, telling each subscriber why.
    pub fn close_all(&self, reason: DropReason) {
        let drained: Vec<_> = self.subscriptions.write().drain().collect();
        for (_, sub) in drained {
            let _ = sub.sender.try_send(ChannelMessage::Dropped {
                reason,
            });
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Count subscriptions on one resource.
    pub fn subscribers_for(&self, resource: &str) -> usize {
        self.subscriptions
            .read()
            .values()
            .filter(|sub| sub.config.resource == resource)
            .count()
    }

    /// Broadcast a change to every matching subscription.
    ///
    /// Returns how many subscribers received it. Subscribers that cannot
    /// take the message are dropped.
    pub fn broadcast(&self, resource: &str, event: &ChangeEvent) -> usize {
        let mut delivered = 0;
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if !sub.matches(resource, event) {
                    continue;
                }
                if sub.try_send(ChannelMessage::Change(event.clone())) {
                    delivered += 1;
                } else {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    warn!(subscription = %id, resource = %resource, "dropping slow subscriber");
                    // Buffer is full, so this usually fails; that's ok.
                    let _ = sub.sender.try_send(ChannelMessage::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }

        delivered
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
