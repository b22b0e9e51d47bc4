use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::services::quota::QuotaError;
use crate::services::slots::ClaimError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("horario no disponible, elegí otro")]
    SlotTaken,

    #[error("no te quedan lavados en tu suscripción, elegí otro medio de pago")]
    QuotaExhausted,

    #[error("subscription is not active: {0}")]
    SubscriptionInactive(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("operation timed out, outcome unknown")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{err:#}"))
    }
}

/// Malformed or incomplete request bodies are validation failures, reported
/// with the same JSON error body as every other error.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<ClaimError> for AppError {
    fn from(err: ClaimError) -> Self {
        match err {
            ClaimError::SlotTaken => AppError::SlotTaken,
            ClaimError::Quota(q) => q.into(),
            ClaimError::Storage(e) => e.into(),
            other => AppError::Validation(other.to_string()),
        }
    }
}

impl From<QuotaError> for AppError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::Exhausted => AppError::QuotaExhausted,
            QuotaError::NotFound(id) => AppError::NotFound(format!("subscription {id}")),
            QuotaError::Inactive(status) => {
                AppError::SubscriptionInactive(status.as_str().to_string())
            }
            QuotaError::Storage(e) => e.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::SlotTaken => StatusCode::CONFLICT,
            AppError::QuotaExhausted => StatusCode::CONFLICT,
            AppError::SubscriptionInactive(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTransition(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = match &self {
            AppError::SlotTaken => serde_json::json!({
                "error": self.to_string(),
                "slot_taken": true,
            }),
            AppError::QuotaExhausted => serde_json::json!({
                "error": self.to_string(),
                "quota_exhausted": true,
            }),
            AppError::Timeout => serde_json::json!({
                "error": self.to_string(),
                "outcome": "unknown",
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };
        (status, axum::Json(body)).into_response()
    }
}
