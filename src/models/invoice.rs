use serde::Serialize;

use super::EntityRef;

#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: i64,
    pub provider_payment_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub amount_cents: i64,
    pub status: String,
    pub external_id: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub issued_at: Option<String>,
}

/// Handed to the invoicing collaborator once per approved payment.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InvoiceRequest {
    pub invoice_id: i64,
    pub provider_payment_id: String,
    pub entity: EntityRef,
    pub amount_cents: i64,
    pub customer_name: String,
    pub customer_email: String,
}
