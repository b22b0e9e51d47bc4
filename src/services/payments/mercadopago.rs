use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::PaymentProvider;
use crate::models::{CheckoutRequest, CheckoutSession, PaymentMetadata, ProviderPayment};

const CURRENCY: &str = "ARS";

pub struct MercadoPagoProvider {
    api_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl MercadoPagoProvider {
    pub fn new(api_url: String, access_token: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build Mercado Pago HTTP client")?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token,
            client,
        })
    }
}

#[async_trait]
impl PaymentProvider for MercadoPagoProvider {
    async fn fetch_payment(&self, payment_id: &str) -> anyhow::Result<ProviderPayment> {
        let resp = self
            .client
            .get(format!("{}/v1/payments/{payment_id}", self.api_url))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .context("failed to call Mercado Pago payments API")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse Mercado Pago payment")?;

        if !status.is_success() {
            anyhow::bail!("Mercado Pago API error ({}): {}", status, data);
        }

        parse_payment(&data)
    }

    async fn create_checkout(&self, request: &CheckoutRequest) -> anyhow::Result<CheckoutSession> {
        let body = json!({
            "items": [{
                "title": request.title,
                "quantity": 1,
                "currency_id": CURRENCY,
                "unit_price": request.amount_cents as f64 / 100.0,
            }],
            "payer": { "email": request.payer_email },
            "external_reference": request.entity.external_reference(),
            "metadata": {
                "entity_type": request.entity.entity_type.as_str(),
                "entity_id": request.entity.entity_id,
            },
            "notification_url": request.notification_url,
        });

        let resp = self
            .client
            .post(format!("{}/checkout/preferences", self.api_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .context("failed to call Mercado Pago preferences API")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse Mercado Pago preference")?;

        if !status.is_success() {
            anyhow::bail!("Mercado Pago API error ({}): {}", status, data);
        }

        let preference_id = data["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing id in Mercado Pago preference"))?;
        let checkout_url = data["init_point"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing init_point in Mercado Pago preference"))?;

        Ok(CheckoutSession {
            preference_id: preference_id.to_string(),
            checkout_url: checkout_url.to_string(),
        })
    }
}

/// Extracts the fields reconciliation needs from a `/v1/payments/{id}` body.
fn parse_payment(data: &serde_json::Value) -> anyhow::Result<ProviderPayment> {
    let id = match &data["id"] {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => anyhow::bail!("missing id in Mercado Pago payment"),
    };
    let status = data["status"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing status in Mercado Pago payment {id}"))?;
    let amount = data["transaction_amount"].as_f64().unwrap_or(0.0);

    Ok(ProviderPayment {
        id,
        status: status.to_string(),
        external_reference: data["external_reference"]
            .as_str()
            .filter(|r| !r.is_empty())
            .map(|r| r.to_string()),
        metadata: serde_json::from_value::<PaymentMetadata>(data["metadata"].clone()).unwrap_or_default(),
        amount_cents: (amount * 100.0).round() as i64,
    })
}
