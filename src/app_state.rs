// =============================================================================
// AppState — shared service container injected into every handler
// =============================================================================
//
// Constructed once at startup. The hubs are process-wide singletons; every
// service holds cheap clones of the store handle and of each other, so the
// whole graph is wired here and nowhere else.
// =============================================================================

use std::sync::Arc;

use crate::balance::BalanceService;
use crate::config::AppConfig;
use crate::notify::{NotificationHub, NotificationService};
use crate::quote::QuoteHub;
use crate::review::{DepositService, SupplementService, WithdrawService};
use crate::risk::RiskService;
use crate::store::Store;
use crate::trade::TradeService;

pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    pub quote_hub: Arc<QuoteHub>,
    pub notify_hub: Arc<NotificationHub>,
    pub notifier: NotificationService,
    pub balance: BalanceService,
    pub trade: TradeService,
    pub deposits: DepositService,
    pub withdraws: WithdrawService,
    pub supplements: SupplementService,
    pub risk: RiskService,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        let quote_hub = Arc::new(QuoteHub::new());
        let notify_hub = Arc::new(NotificationHub::new());

        let notifier = NotificationService::new(store.clone(), Some(notify_hub.clone()));
        let balance = BalanceService::new(store.clone());
        let trade = TradeService::new(
            store.clone(),
            balance.clone(),
            notifier.clone(),
            quote_hub.clone(),
        );
        let deposits = DepositService::new(store.clone(), balance.clone(), notifier.clone());
        let withdraws = WithdrawService::new(store.clone(), balance.clone(), notifier.clone());
        let supplements = SupplementService::new(store.clone(), balance.clone(), notifier.clone());
        let risk = RiskService::new(store.clone(), balance.clone(), notifier.clone());

        Self {
            config,
            store,
            quote_hub,
            notify_hub,
            notifier,
            balance,
            trade,
            deposits,
            withdraws,
            supplements,
            risk,
        }
    }
}
