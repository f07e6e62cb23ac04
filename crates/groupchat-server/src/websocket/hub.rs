//! Channel registry: live connections grouped by channel, with fan-out.
//!
//! One reader/writer lock guards every channel. Broadcast copies the target
//! bucket under the read lock and releases it before touching any mailbox, so
//! a slow consumer never holds up `add_client` or `remove_client`.

use std::collections::HashMap;
use std::sync::Arc;

use groupchat_core::constants::EVICTION_THRESHOLD;
use groupchat_core::{ChannelId, ConnectionId, PersistedMessage};
use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::connection::{ClientConnection, Delivery};
use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_EVICTIONS_TOTAL};

type Bucket = HashMap<ConnectionId, Arc<ClientConnection>>;

/// Per-call delivery tally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections in the snapshot.
    pub attempted: usize,
    /// Frames queued.
    pub delivered: usize,
    /// Frames dropped on a full mailbox.
    pub dropped: usize,
    /// Connections whose delivery loop had already exited.
    pub closed: usize,
    /// Connections evicted during this call.
    pub evicted: usize,
}

/// Maps channel id to its live connections.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<ChannelId, Bucket>>,
    eviction_threshold: u32,
}

impl ChannelRegistry {
    /// Empty registry with the default eviction threshold.
    pub fn new() -> Self {
        Self::with_eviction_threshold(EVICTION_THRESHOLD)
    }

    /// Empty registry evicting after `threshold` consecutive full mailboxes.
    pub fn with_eviction_threshold(threshold: u32) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            eviction_threshold: threshold.max(1),
        }
    }

    /// Register a connection in its channel, creating the bucket if needed.
    pub fn add_client(&self, connection: Arc<ClientConnection>) {
        let channel_id = connection.channel_id();
        let mut channels = self.channels.write();
        let bucket = channels.entry(channel_id).or_default();
        let _ = bucket.insert(connection.id.clone(), connection);
        debug!(%channel_id, members = bucket.len(), "client added");
    }

    /// Unregister a connection. Removing the last one drops the channel
    /// bucket. Returns whether anything was removed.
    pub fn remove_client(&self, channel_id: ChannelId, connection_id: &ConnectionId) -> bool {
        let mut channels = self.channels.write();
        let Some(bucket) = channels.get_mut(&channel_id) else {
            return false;
        };
        let removed = bucket.remove(connection_id).is_some();
        if bucket.is_empty() {
            let _ = channels.remove(&channel_id);
            debug!(%channel_id, "channel cleaned up (empty)");
        }
        removed
    }

    /// Serialize `message` once and offer it to every connection in the channel.
    pub fn broadcast(&self, channel_id: ChannelId, message: &PersistedMessage) -> BroadcastReport {
        match serde_json::to_string(message) {
            Ok(json) => self.broadcast_raw(channel_id, Arc::new(json)),
            Err(e) => {
                warn!(%channel_id, error = %e, "failed to serialize message");
                BroadcastReport::default()
            }
        }
    }

    /// Offer an already-serialized frame to every connection in the channel.
    ///
    /// Each recipient gets exactly one non-blocking attempt. A recipient whose
    /// mailbox has been full for `eviction_threshold` consecutive attempts is
    /// cancelled and unregistered.
    pub fn broadcast_raw(&self, channel_id: ChannelId, frame: Arc<String>) -> BroadcastReport {
        let recipients = self.snapshot(channel_id);
        let mut report = BroadcastReport {
            attempted: recipients.len(),
            ..BroadcastReport::default()
        };

        for conn in recipients {
            match conn.try_deliver(Arc::clone(&frame)) {
                Delivery::Queued => report.delivered += 1,
                Delivery::Full { consecutive } => {
                    report.dropped += 1;
                    counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                    if consecutive >= self.eviction_threshold {
                        if conn.close() {
                            report.evicted += 1;
                            counter!(WS_EVICTIONS_TOTAL).increment(1);
                            warn!(
                                %channel_id,
                                conn_id = %conn.id,
                                user_id = %conn.user_id(),
                                consecutive,
                                "evicting slow consumer"
                            );
                        }
                        let _ = self.remove_client(channel_id, &conn.id);
                    } else {
                        debug!(%channel_id, conn_id = %conn.id, consecutive, "mailbox full, frame dropped");
                    }
                }
                Delivery::Closed => report.closed += 1,
            }
        }

        debug!(
            %channel_id,
            attempted = report.attempted,
            delivered = report.delivered,
            dropped = report.dropped,
            evicted = report.evicted,
            "broadcast"
        );
        report
    }

    /// Copy of a channel's connections at this instant.
    pub fn snapshot(&self, channel_id: ChannelId) -> Vec<Arc<ClientConnection>> {
        self.channels
            .read()
            .get(&channel_id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Cancel and unregister every connection. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<ClientConnection>> = {
            let mut channels = self.channels.write();
            channels.drain().flat_map(|(_, bucket)| bucket.into_values()).collect()
        };
        drained.iter().filter(|conn| conn.close()).count()
    }

    /// Whether the channel currently has a bucket.
    pub fn has_channel(&self, channel_id: ChannelId) -> bool {
        self.channels.read().contains_key(&channel_id)
    }

    /// Whether a specific connection is registered in the channel.
    pub fn contains(&self, channel_id: ChannelId, connection_id: &ConnectionId) -> bool {
        self.channels
            .read()
            .get(&channel_id)
            .is_some_and(|bucket| bucket.contains_key(connection_id))
    }

    /// Number of channels with live connections.
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Number of live connections across all channels.
    pub fn connection_count(&self) -> usize {
        self.channels.read().values().map(HashMap::len).sum()
    }

    /// Number of live connections in one channel.
    pub fn channel_connection_count(&self, channel_id: ChannelId) -> usize {
        self.channels.read().get(&channel_id).map_or(0, HashMap::len)
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
