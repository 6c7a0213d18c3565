// =============================================================================
// Risk engine — periodic revaluation, classification, force-close, top-up
// =============================================================================

mod auto_supplement;
mod scheduler;
mod service;

pub use auto_supplement::{required_supplement, AutoSupplementService};
pub use scheduler::RiskScheduler;
pub use service::{RiskService, RiskStatistics, RiskSweep};
