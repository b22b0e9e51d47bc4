use std::env;
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    pub public_base_url: String,
    pub mercadopago_api_url: String,
    pub mercadopago_access_token: String,
    pub mercadopago_webhook_secret: String,
    pub invoice_service_url: String,
    pub invoice_service_token: String,
    pub utc_offset_hours: i32,
    pub claim_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "washbook.db".to_string()),
            admin_token: env::var("ADMIN_TOKEN").unwrap_or_else(|_| "changeme".to_string()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            mercadopago_api_url: env::var("MERCADOPAGO_API_URL")
                .unwrap_or_else(|_| "https://api.mercadopago.com".to_string()),
            mercadopago_access_token: env::var("MERCADOPAGO_ACCESS_TOKEN").unwrap_or_default(),
            mercadopago_webhook_secret: env::var("MERCADOPAGO_WEBHOOK_SECRET").unwrap_or_default(),
            invoice_service_url: env::var("INVOICE_SERVICE_URL").unwrap_or_default(),
            invoice_service_token: env::var("INVOICE_SERVICE_TOKEN").unwrap_or_default(),
            utc_offset_hours: env::var("BUSINESS_UTC_OFFSET_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|h: &i32| (-23..=23).contains(h))
                .unwrap_or(-3),
            claim_timeout: Duration::from_millis(
                env::var("CLAIM_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5000),
            ),
        }
    }

    /// Wall-clock time at the business location.
    pub fn business_now(&self) -> NaiveDateTime {
        let offset = FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix());
        Utc::now().with_timezone(&offset).naive_local()
    }

    pub fn business_today(&self) -> NaiveDate {
        self.business_now().date()
    }

    pub fn webhook_url(&self) -> String {
        format!("{}/webhooks/payments", self.public_base_url.trim_end_matches('/'))
    }
}
