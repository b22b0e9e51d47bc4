pub mod mercadopago;

use async_trait::async_trait;

use crate::models::{CheckoutRequest, CheckoutSession, ProviderPayment};

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Authoritative payment state. Webhook bodies are only a hint to call this.
    async fn fetch_payment(&self, payment_id: &str) -> anyhow::Result<ProviderPayment>;

    async fn create_checkout(&self, request: &CheckoutRequest) -> anyhow::Result<CheckoutSession>;
}
