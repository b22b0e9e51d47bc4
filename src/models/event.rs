use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: i64,
    pub kind: String,
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

/// An event produced by a state transition, emitted once the transaction
/// that produced it has committed.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEvent {
    pub kind: &'static str,
    pub entity_id: String,
    pub payload: serde_json::Value,
}

impl PendingEvent {
    pub fn new(kind: &'static str, entity_id: &str, payload: serde_json::Value) -> Self {
        Self {
            kind,
            entity_id: entity_id.to_string(),
            payload,
        }
    }
}

pub const BOOKING_CREATED: &str = "booking_created";
pub const BOOKING_CONFIRMED: &str = "booking_confirmed";
pub const BOOKING_COMPLETED: &str = "booking_completed";
pub const BOOKING_CANCELLED: &str = "booking_cancelled";
pub const SUBSCRIPTION_CREATED: &str = "subscription_created";
pub const SUBSCRIPTION_ACTIVATED: &str = "subscription_activated";
pub const SUBSCRIPTION_RENEWED: &str = "subscription_renewed";
pub const SUBSCRIPTION_STATUS_CHANGED: &str = "subscription_status_changed";
pub const INVOICE_REQUESTED: &str = "invoice_requested";
