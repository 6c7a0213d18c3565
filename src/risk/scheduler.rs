// =============================================================================
// Risk Scheduler — the periodic tick driving the risk pass
// =============================================================================
//
// One ticker task; at most one pass runs at a time and the next tick waits
// behind the in-flight one. The interval is re-read from the risk config on
// every cycle so admin changes apply on the next tick. A shutdown signal
// received mid-pass lets the pass finish; between ticks it returns
// immediately. A panicking pass is caught and logged — the scheduler
// survives.
// =============================================================================

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::quote::QuoteHub;
use crate::risk::service::RiskService;
use crate::store::Store;

pub struct RiskScheduler {
    store: Store,
    risk: RiskService,
    quote_hub: Arc<QuoteHub>,
}

impl RiskScheduler {
    pub fn new(store: Store, risk: RiskService, quote_hub: Arc<QuoteHub>) -> Self {
        Self {
            store,
            risk,
            quote_hub,
        }
    }

    /// Run until `shutdown` fires. Performs one pass immediately, then ticks
    /// at the configured interval.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("risk scheduler started");

        self.tick().await;

        loop {
            let interval = match self.store.risk_config().await {
                Ok(cfg) => cfg.price_update_interval_s.max(1) as u64,
                Err(e) => {
                    warn!(error = %e, "risk config load failed, using default interval");
                    15
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
                _ = shutdown.changed() => {
                    info!("risk scheduler stopping");
                    return;
                }
            }

            self.tick().await;

            // A signal that arrived during the pass stops us here, after the
            // in-flight tick completed.
            if *shutdown.borrow() {
                info!("risk scheduler stopping after in-flight pass");
                return;
            }
        }
    }

    /// One guarded pass: skip on stale price, catch panics, log timing.
    async fn tick(&self) {
        let latest = self.quote_hub.latest_price();
        if !latest.valid {
            warn!(
                price = latest.price,
                observed_at = latest.observed_at,
                "market price unavailable or stale, skipping risk pass"
            );
            return;
        }

        let started = Instant::now();
        match AssertUnwindSafe(self.risk.run_check(latest.price))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                info!(
                    price = latest.price,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "risk pass complete"
                );
            }
            Ok(Err(e)) => {
                error!(error = %e, "risk pass failed, retrying next tick");
            }
            Err(_) => {
                error!("risk pass panicked, scheduler continues");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::BalanceService;
    use crate::model::{PositionStatus, Role, Side};
    use crate::notify::NotificationService;
    use crate::store::testing::memory_store;
    use crate::trade::new_position_draft;

    async fn build(store: &Store) -> (RiskScheduler, Arc<QuoteHub>) {
        let balance = BalanceService::new(store.clone());
        let notifier = NotificationService::new(store.clone(), None);
        let risk = RiskService::new(store.clone(), balance, notifier);
        let hub = Arc::new(QuoteHub::new());
        (
            RiskScheduler::new(store.clone(), risk, hub.clone()),
            hub,
        )
    }

    #[tokio::test]
    async fn stale_price_tick_mutates_nothing() {
        let store = memory_store().await;
        let balance = BalanceService::new(store.clone());
        let user = store.create_user("600", Role::Customer).await.unwrap();
        balance.credit_deposit(user.id, 20000.0, 0, "").await.unwrap();
        let draft = new_position_draft(user.id, Side::Short, 500.0, 100.0, 10000.0);
        let position = balance.open_position(user.id, draft).await.unwrap();

        let (scheduler, hub) = build(&store).await;
        // A price old enough to be stale would otherwise force-close.
        hub.record_price_at(599.1, chrono::Utc::now().timestamp() - 301);
        scheduler.tick().await;

        let untouched = store.find_position(position.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, PositionStatus::Holding);
        // The mark was not even refreshed.
        assert_eq!(untouched.current_price, 500.0);
    }

    #[tokio::test]
    async fn valid_price_tick_runs_the_pass() {
        let store = memory_store().await;
        let balance = BalanceService::new(store.clone());
        let user = store.create_user("601", Role::Customer).await.unwrap();
        balance.credit_deposit(user.id, 20000.0, 0, "").await.unwrap();
        let draft = new_position_draft(user.id, Side::Short, 500.0, 100.0, 10000.0);
        let position = balance.open_position(user.id, draft).await.unwrap();

        let (scheduler, hub) = build(&store).await;
        hub.record_price(599.1);
        scheduler.tick().await;

        let closed = store.find_position(position.id).await.unwrap().unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
    }

    #[tokio::test]
    async fn shutdown_between_ticks_returns_promptly() {
        let store = memory_store().await;
        let (scheduler, _hub) = build(&store).await;
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(scheduler.run(rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop in time")
            .unwrap();
    }
}
