// =============================================================================
// Notification Hub — long-lived viewer connections keyed by user id
// =============================================================================
//
// Mirrors the Quote Hub topology: bounded per-sink buffers, eviction on
// overflow, presence queries under a read lock. A user may hold several
// connections (devices); user id 0 broadcasts to every connected sink.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::Notification;

/// Outbound notifications buffered per sink before eviction.
pub const SINK_BUFFER: usize = 256;

pub struct NotificationHub {
    /// user_id -> sink_id -> sender
    clients: RwLock<HashMap<i64, HashMap<Uuid, mpsc::Sender<Notification>>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Registry
    // -------------------------------------------------------------------------

    /// Register a viewer connection for `user_id`.
    pub fn register(&self, user_id: i64) -> (Uuid, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(SINK_BUFFER);
        let id = Uuid::new_v4();
        let devices = {
            let mut clients = self.clients.write();
            let sinks = clients.entry(user_id).or_default();
            sinks.insert(id, tx);
            sinks.len()
        };
        info!(user_id, sink = %id, devices, "notification viewer connected");
        (id, rx)
    }

    /// Remove one sink. Idempotent; the user entry disappears with its last
    /// device.
    pub fn unregister(&self, user_id: i64, sink_id: Uuid) {
        let mut clients = self.clients.write();
        if let Some(sinks) = clients.get_mut(&user_id) {
            if sinks.remove(&sink_id).is_some() {
                info!(user_id, sink = %sink_id, devices = sinks.len(), "notification viewer disconnected");
            }
            if sinks.is_empty() {
                clients.remove(&user_id);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Delivery
    // -------------------------------------------------------------------------

    /// Enqueue onto every sink of `user_id`; `user_id` 0 broadcasts to every
    /// connected sink. Returns the number of sinks reached — zero means the
    /// push was skipped (the persisted notification remains for later pull).
    pub fn send_to_user(&self, user_id: i64, notification: &Notification) -> usize {
        let mut delivered = 0;
        let mut stale: Vec<(i64, Uuid)> = Vec::new();

        {
            let clients = self.clients.read();
            if user_id == 0 {
                for (uid, sinks) in clients.iter() {
                    for (id, tx) in sinks.iter() {
                        if tx.try_send(notification.clone()).is_ok() {
                            delivered += 1;
                        } else {
                            stale.push((*uid, *id));
                        }
                    }
                }
            } else if let Some(sinks) = clients.get(&user_id) {
                for (id, tx) in sinks.iter() {
                    if tx.try_send(notification.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        stale.push((user_id, *id));
                    }
                }
            }
        }

        if !stale.is_empty() {
            let mut clients = self.clients.write();
            for (uid, id) in &stale {
                if let Some(sinks) = clients.get_mut(uid) {
                    sinks.remove(id);
                    if sinks.is_empty() {
                        clients.remove(uid);
                    }
                }
                warn!(user_id = uid, sink = %id, "notification sink evicted (buffer full or closed)");
            }
        }

        delivered
    }

    // -------------------------------------------------------------------------
    // Presence
    // -------------------------------------------------------------------------

    pub fn is_online(&self, user_id: i64) -> bool {
        self.clients
            .read()
            .get(&user_id)
            .map(|sinks| !sinks.is_empty())
            .unwrap_or(false)
    }

    pub fn online_user_count(&self) -> usize {
        self.clients.read().len()
    }

    pub fn device_count(&self, user_id: i64) -> usize {
        self.clients
            .read()
            .get(&user_id)
            .map(|sinks| sinks.len())
            .unwrap_or(0)
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
