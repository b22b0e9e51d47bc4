use serde::{Deserialize, Serialize};

use super::PaymentStatus;

/// Notification body posted by the payment provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookData {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
}

impl WebhookEvent {
    pub fn is_payment(&self) -> bool {
        self.kind == "payment" || self.action.as_deref().is_some_and(|a| a.starts_with("payment."))
    }
}

/// Payment as reported by the provider's REST API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPayment {
    pub id: String,
    pub status: String,
    pub external_reference: Option<String>,
    pub metadata: PaymentMetadata,
    pub amount_cents: i64,
}

impl ProviderPayment {
    pub fn mapped_status(&self) -> Option<PaymentStatus> {
        PaymentStatus::from_provider(&self.status)
    }
}

/// Entity coordinates attached to a payment at checkout creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentMetadata {
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Booking,
    Subscription,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Booking => "booking",
            EntityType::Subscription => "subscription",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "booking" => Some(EntityType::Booking),
            "subscription" => Some(EntityType::Subscription),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub entity_id: String,
}

impl EntityRef {
    pub fn booking(id: &str) -> Self {
        Self {
            entity_type: EntityType::Booking,
            entity_id: id.to_string(),
        }
    }

    pub fn subscription(id: &str) -> Self {
        Self {
            entity_type: EntityType::Subscription,
            entity_id: id.to_string(),
        }
    }

    /// `booking:<id>` / `subscription:<id>`, used as the provider's external reference.
    pub fn external_reference(&self) -> String {
        format!("{}:{}", self.entity_type.as_str(), self.entity_id)
    }

    pub fn from_metadata(metadata: &PaymentMetadata) -> Option<Self> {
        let entity_type = EntityType::parse(metadata.entity_type.as_deref()?)?;
        let entity_id = metadata.entity_id.as_deref().filter(|id| !id.is_empty())?;
        Some(Self {
            entity_type,
            entity_id: entity_id.to_string(),
        })
    }

    pub fn from_prefixed_reference(reference: &str) -> Option<Self> {
        let (kind, id) = reference.split_once(':')?;
        let entity_type = EntityType::parse(kind)?;
        if id.is_empty() {
            return None;
        }
        Some(Self {
            entity_type,
            entity_id: id.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub entity: EntityRef,
    pub title: String,
    pub amount_cents: i64,
    pub payer_email: String,
    pub notification_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub preference_id: String,
    pub checkout_url: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!("unexpected id: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_numeric_id() {
        let event: WebhookEvent =
            serde_json::from_str(r#"{"type":"payment","action":"payment.updated","data":{"id":123456}}"#)
                .unwrap();
        assert!(event.is_payment());
        assert_eq!(event.data.id, "123456");
    }

    #[test]
    fn test_webhook_non_payment() {
        let event: WebhookEvent =
            serde_json::from_str(r#"{"type":"merchant_order","data":{"id":"9"}}"#).unwrap();
        assert!(!event.is_payment());
    }

    #[test]
    fn test_entity_from_metadata() {
        let metadata = PaymentMetadata {
            entity_type: Some("subscription".to_string()),
            entity_id: Some("sub-1".to_string()),
        };
        assert_eq!(EntityRef::from_metadata(&metadata), Some(EntityRef::subscription("sub-1")));

        let partial = PaymentMetadata {
            entity_type: Some("booking".to_string()),
            entity_id: None,
        };
        assert_eq!(EntityRef::from_metadata(&partial), None);
    }

    #[test]
    fn test_prefixed_reference() {
        let entity = EntityRef::booking("bk-1");
        assert_eq!(entity.external_reference(), "booking:bk-1");
        assert_eq!(EntityRef::from_prefixed_reference("booking:bk-1"), Some(entity));
        assert_eq!(EntityRef::from_prefixed_reference("bk-1"), None);
        assert_eq!(EntityRef::from_prefixed_reference("invoice:1"), None);
    }
}
