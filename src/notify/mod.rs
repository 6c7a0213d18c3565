// =============================================================================
// Notification bus — per-user push hub plus the persisting service layer
// =============================================================================

mod hub;
mod service;

pub use hub::{NotificationHub, SINK_BUFFER};
pub use service::NotificationService;
