// =============================================================================
// Quote Hub — raw-frame fan-out plus the canonical latest-price cache
// =============================================================================
//
// One upstream reader feeds the hub; every registered viewer receives every
// raw frame in upstream-arrival order through a bounded per-viewer buffer.
// A viewer whose buffer is full is evicted — a slow consumer never stalls
// the rest.
//
// The latest-price cache outlives upstream disconnects; staleness is judged
// at read time so a reconnect gap longer than the bound invalidates the
// price without any bookkeeping.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound frames buffered per viewer before eviction.
pub const VIEWER_BUFFER: usize = 256;

/// A parsed price older than this is no longer served as valid.
pub const STALE_AFTER_SECS: i64 = 300;

/// Read-side view of the price cache.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct LatestPrice {
    pub price: f64,
    /// Unix seconds of the last accepted parse, 0 when none yet.
    pub observed_at: i64,
    pub valid: bool,
}

#[derive(Default)]
struct PriceCache {
    price: f64,
    updated_at: Option<i64>,
}

pub struct QuoteHub {
    clients: RwLock<HashMap<Uuid, mpsc::Sender<String>>>,
    price: RwLock<PriceCache>,
    upstream_alive: AtomicBool,
}

impl QuoteHub {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            price: RwLock::new(PriceCache::default()),
            upstream_alive: AtomicBool::new(false),
        }
    }

    // -------------------------------------------------------------------------
    // Viewer registry
    // -------------------------------------------------------------------------

    /// Register a viewer and hand back its frame receiver.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(VIEWER_BUFFER);
        let id = Uuid::new_v4();
        let count = {
            let mut clients = self.clients.write();
            clients.insert(id, tx);
            clients.len()
        };
        info!(viewer = %id, viewers = count, "quote viewer connected");
        (id, rx)
    }

    /// Remove a viewer. Idempotent; dropping the sender releases the sink.
    pub fn unsubscribe(&self, id: Uuid) {
        let removed = self.clients.write().remove(&id).is_some();
        if removed {
            info!(viewer = %id, viewers = self.viewer_count(), "quote viewer disconnected");
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Offer a raw frame to every viewer without blocking. Full or closed
    /// sinks are evicted.
    pub fn broadcast(&self, frame: &str) {
        let mut stale: Vec<Uuid> = Vec::new();
        {
            let clients = self.clients.read();
            for (id, tx) in clients.iter() {
                if tx.try_send(frame.to_string()).is_err() {
                    stale.push(*id);
                }
            }
        }
        if !stale.is_empty() {
            let mut clients = self.clients.write();
            for id in &stale {
                clients.remove(id);
                warn!(viewer = %id, "quote viewer evicted (buffer full or closed)");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Latest price
    // -------------------------------------------------------------------------

    /// Cache a parsed price. Non-positive values are ignored.
    pub fn record_price(&self, price: f64) {
        self.record_price_at(price, Utc::now().timestamp());
    }

    pub(crate) fn record_price_at(&self, price: f64, observed_at: i64) {
        if price <= 0.0 {
            return;
        }
        let mut cache = self.price.write();
        cache.price = price;
        cache.updated_at = Some(observed_at);
    }

    /// Atomic read of the cached price. `valid` is false when nothing has
    /// been parsed yet, the value is non-positive, or the last update is
    /// older than the staleness bound.
    pub fn latest_price(&self) -> LatestPrice {
        let cache = self.price.read();
        let observed_at = cache.updated_at.unwrap_or(0);
        let fresh = cache
            .updated_at
            .map(|t| Utc::now().timestamp() - t <= STALE_AFTER_SECS)
            .unwrap_or(false);
        LatestPrice {
            price: cache.price,
            observed_at,
            valid: cache.price > 0.0 && fresh,
        }
    }

    // -------------------------------------------------------------------------
    // Upstream bridge
    // -------------------------------------------------------------------------

    pub fn set_upstream_alive(&self, alive: bool) {
        self.upstream_alive.store(alive, Ordering::Relaxed);
    }

    pub fn is_upstream_alive(&self) -> bool {
        self.upstream_alive.load(Ordering::Relaxed)
    }

    /// Drive the upstream connection loop. Invoked once at startup; runs
    /// until the process exits.
    pub async fn run(self: Arc<Self>, url: String) {
        super::upstream::run_upstream(self, url).await;
    }

    /// Handle one raw upstream frame: update the price cache when the frame
    /// carries one, then fan the frame out untouched. A malformed frame is
    /// logged and skipped without affecting other subscribers.
    pub fn handle_upstream_frame(&self, text: &str) {
        match super::upstream::extract_price(text) {
            Some(price) => {
                self.record_price(price);
                debug!(price, "latest price updated");
            }
            None => {
                debug!(len = text.len(), "upstream frame carried no price");
            }
        }
        self.broadcast(text);
    }
}

impl Default for QuoteHub {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
