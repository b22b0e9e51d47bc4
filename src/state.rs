use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::db::Db;
use crate::models::DomainEvent;
use crate::services::invoicing::InvoiceIssuer;
use crate::services::payments::PaymentProvider;

pub struct AppState {
    pub db: Db,
    pub config: AppConfig,
    pub payments: Box<dyn PaymentProvider>,
    pub invoices: Box<dyn InvoiceIssuer>,
    pub events_tx: broadcast::Sender<DomainEvent>,
}
