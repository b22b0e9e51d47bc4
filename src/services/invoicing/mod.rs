pub mod http;

use async_trait::async_trait;

use crate::models::InvoiceRequest;

#[async_trait]
pub trait InvoiceIssuer: Send + Sync {
    /// Issues one invoice. Returns the issuer's id for it, if it reports one.
    async fn issue(&self, request: &InvoiceRequest) -> anyhow::Result<Option<String>>;
}
