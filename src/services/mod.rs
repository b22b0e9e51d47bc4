pub mod availability;
pub mod events;
pub mod invoicing;
pub mod payments;
pub mod quota;
pub mod reconciliation;
pub mod slots;
pub mod subscriptions;
