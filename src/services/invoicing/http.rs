use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use super::InvoiceIssuer;
use crate::models::InvoiceRequest;

/// Posts invoice requests to the external invoicing service. With no URL
/// configured it only logs, which is the dev setup.
pub struct HttpInvoiceIssuer {
    url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpInvoiceIssuer {
    pub fn new(url: String, token: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("failed to build invoicing HTTP client")?;
        Ok(Self { url, token, client })
    }
}

#[async_trait]
impl InvoiceIssuer for HttpInvoiceIssuer {
    async fn issue(&self, request: &InvoiceRequest) -> anyhow::Result<Option<String>> {
        if self.url.is_empty() {
            tracing::info!(
                invoice_id = request.invoice_id,
                payment_id = %request.provider_payment_id,
                amount_cents = request.amount_cents,
                "invoicing service not configured, skipping issue"
            );
            return Ok(None);
        }

        let mut req = self.client.post(&self.url).json(request);
        if !self.token.is_empty() {
            req = req.bearer_auth(&self.token);
        }

        let resp = req.send().await.context("failed to call invoicing service")?;
        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse invoicing response")?;

        if !status.is_success() {
            anyhow::bail!("invoicing service error ({}): {}", status, data);
        }

        Ok(data["id"]
            .as_str()
            .map(|s| s.to_string())
            .or_else(|| data["id"].as_i64().map(|n| n.to_string())))
    }
}
