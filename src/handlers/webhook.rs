use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::db::{self, queries};
use crate::models::{WebhookData, WebhookEvent};
use crate::services::reconciliation::{self, ReconcileError};
use crate::state::AppState;

/// Checks Mercado Pago's `x-signature: ts=<ts>,v1=<hex>` header. The signed
/// manifest is `id:<data.id>;request-id:<x-request-id>;ts:<ts>;`.
fn validate_mercadopago_signature(
    secret: &str,
    signature_header: &str,
    request_id: &str,
    data_id: &str,
) -> bool {
    let mut ts = None;
    let mut v1 = None;
    for part in signature_header.split(',') {
        match part.trim().split_once('=') {
            Some(("ts", value)) => ts = Some(value.trim()),
            Some(("v1", value)) => v1 = Some(value.trim()),
            _ => {}
        }
    }
    let (Some(ts), Some(v1)) = (ts, v1) else {
        return false;
    };
    let Ok(expected) = hex::decode(v1) else {
        return false;
    };

    let manifest = format!("id:{};request-id:{request_id};ts:{ts};", data_id.to_lowercase());

    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(manifest.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// The provider sends the event in the JSON body; older notifications only
/// carry `type` and `data.id` in the query string.
fn parse_event(body: &[u8], params: &HashMap<String, String>) -> Option<WebhookEvent> {
    if let Ok(event) = serde_json::from_slice::<WebhookEvent>(body) {
        if !event.data.id.is_empty() {
            return Some(event);
        }
    }

    let id = params.get("data.id").or_else(|| params.get("id"))?;
    let kind = params
        .get("type")
        .or_else(|| params.get("topic"))
        .cloned()
        .unwrap_or_default();
    Some(WebhookEvent {
        kind,
        action: None,
        data: WebhookData { id: id.clone() },
    })
}

fn ack() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({"received": true})))
}

fn record_delivery(state: &AppState, event_type: &str, resource_id: Option<&str>, payload: &str) -> Option<i64> {
    let recorded = db::lock(&state.db)
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .and_then(|conn| queries::insert_webhook_delivery(&conn, event_type, resource_id, payload));
    match recorded {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::error!(error = %e, "failed to record webhook delivery");
            None
        }
    }
}

fn finish_delivery(state: &AppState, delivery_id: Option<i64>, outcome: &str, error: Option<&str>) {
    let Some(id) = delivery_id else {
        return;
    };
    let finished = db::lock(&state.db)
        .map_err(|e| anyhow::anyhow!(e.to_string()))
        .and_then(|conn| queries::finish_webhook_delivery(&conn, id, outcome, error));
    if let Err(e) = finished {
        tracing::error!(error = %e, delivery_id = id, "failed to update webhook delivery");
    }
}

// POST /webhooks/payments
//
// Always answers 200. Failures are recorded on the delivery row and logged.
pub async fn payments_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let payload = String::from_utf8_lossy(&body).to_string();

    let Some(event) = parse_event(&body, &params) else {
        tracing::warn!("unparseable payment webhook, ignoring");
        let id = record_delivery(&state, "unknown", None, &payload);
        finish_delivery(&state, id, "unparseable", None);
        return ack();
    };

    tracing::info!(kind = %event.kind, payment_id = %event.data.id, "incoming payment webhook");
    let delivery_id = record_delivery(&state, &event.kind, Some(&event.data.id), &payload);

    // Skip verification if the secret is empty (dev mode)
    if !state.config.mercadopago_webhook_secret.is_empty() {
        let signature = headers
            .get("x-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let request_id = headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if !validate_mercadopago_signature(
            &state.config.mercadopago_webhook_secret,
            signature,
            request_id,
            &event.data.id,
        ) {
            tracing::warn!(payment_id = %event.data.id, "invalid webhook signature, ignoring");
            finish_delivery(&state, delivery_id, "invalid_signature", None);
            return ack();
        }
    }

    if !event.is_payment() {
        tracing::info!(kind = %event.kind, "non-payment webhook, ignoring");
        finish_delivery(&state, delivery_id, "ignored", None);
        return ack();
    }

    match reconciliation::process_event(&state, &event).await {
        Ok(result) => finish_delivery(&state, delivery_id, result.outcome.as_str(), None),
        Err(e) => {
            let outcome = match &e {
                ReconcileError::ProviderUnavailable(_) => "provider_unavailable",
                ReconcileError::UnknownEntity(_) => "unknown_entity",
                ReconcileError::Storage(_) => "failed",
            };
            tracing::error!(error = %e, payment_id = %event.data.id, "payment webhook processing failed");
            finish_delivery(&state, delivery_id, outcome, Some(&e.to_string()));
        }
    }

    ack()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, manifest: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(manifest.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature() {
        let v1 = sign("s3cret", "id:123;request-id:req-1;ts:1700000000;");
        let header = format!("ts=1700000000,v1={v1}");
        assert!(validate_mercadopago_signature("s3cret", &header, "req-1", "123"));
    }

    #[test]
    fn test_signature_rejects_tampering() {
        let v1 = sign("s3cret", "id:123;request-id:req-1;ts:1700000000;");
        let header = format!("ts=1700000000,v1={v1}");
        assert!(!validate_mercadopago_signature("s3cret", &header, "req-1", "124"));
        assert!(!validate_mercadopago_signature("other", &header, "req-1", "123"));
        assert!(!validate_mercadopago_signature("s3cret", "ts=1700000000", "req-1", "123"));
        assert!(!validate_mercadopago_signature("s3cret", "ts=1,v1=zz", "req-1", "123"));
    }

    #[test]
    fn test_parse_event_from_query() {
        let mut params = HashMap::new();
        params.insert("type".to_string(), "payment".to_string());
        params.insert("data.id".to_string(), "555".to_string());

        let event = parse_event(b"", &params).unwrap();
        assert!(event.is_payment());
        assert_eq!(event.data.id, "555");
        assert!(parse_event(b"not json", &HashMap::new()).is_none());
    }
}
