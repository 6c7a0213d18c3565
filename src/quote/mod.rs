// =============================================================================
// Quote fan-out — upstream subscription, latest-price cache, viewer fan-out
// =============================================================================

mod hub;
mod upstream;

pub use hub::{LatestPrice, QuoteHub, STALE_AFTER_SECS, VIEWER_BUFFER};
pub use upstream::run_upstream;
