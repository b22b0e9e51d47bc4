use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::models::{Booking, BusinessHours, DomainEvent, Invoice, Subscription};
use crate::services::availability;
use crate::services::subscriptions::{self, LifecycleAction};
use crate::services::{events, slots};
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

// GET /api/admin/status
#[derive(Serialize)]
pub struct StatusResponse {
    today: String,
    upcoming_bookings: i64,
    pending_payment_bookings: i64,
    active_subscriptions: i64,
    pending_invoices: i64,
    failed_invoices: i64,
    failed_webhooks: i64,
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let today = state.config.business_today();
    let stats = {
        let conn = db::lock(&state.db)?;
        queries::get_dashboard_stats(&conn, &today)?
    };

    Ok(Json(StatusResponse {
        today: queries::fmt_date(&today),
        upcoming_bookings: stats.upcoming_bookings,
        pending_payment_bookings: stats.pending_payment_bookings,
        active_subscriptions: stats.active_subscriptions,
        pending_invoices: stats.pending_invoices,
        failed_invoices: stats.failed_invoices,
        failed_webhooks: stats.failed_webhooks,
    }))
}

// GET /api/admin/bookings
#[derive(Deserialize)]
pub struct BookingsQuery {
    pub status: Option<String>,
    pub date: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BookingsQuery>,
) -> Result<Json<Vec<Booking>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let date = query
        .date
        .as_deref()
        .map(availability::parse_date)
        .transpose()
        .map_err(AppError::Validation)?;

    let bookings = {
        let conn = db::lock(&state.db)?;
        queries::list_bookings(&conn, query.status.as_deref(), date.as_ref(), limit)?
    };

    Ok(Json(bookings))
}

// POST /api/admin/bookings/:id/:action
pub async fn booking_action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, action)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let now = state.config.business_now();
    let (event, washes_remaining) = {
        let mut conn = db::lock(&state.db)?;
        match action.as_str() {
            "confirm" => (slots::confirm_booking(&conn, &id, now)?, None),
            "complete" => (slots::complete_booking(&conn, &id, now)?, None),
            "cancel" => {
                let (_, restored, event) = slots::cancel_booking(&mut conn, &id, "admin", now)?;
                (event, restored.map(|q| q.washes_remaining))
            }
            other => return Err(AppError::NotFound(format!("booking action {other}"))),
        }
    };

    events::emit(&state, event);
    Ok(Json(serde_json::json!({
        "ok": true,
        "washes_remaining": washes_remaining,
    })))
}

// GET /api/admin/subscriptions
#[derive(Deserialize)]
pub struct SubscriptionsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_subscriptions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SubscriptionsQuery>,
) -> Result<Json<Vec<Subscription>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let subs = {
        let conn = db::lock(&state.db)?;
        queries::list_subscriptions(&conn, query.status.as_deref(), limit)?
    };

    Ok(Json(subs))
}

// POST /api/admin/subscriptions/:id/:action
pub async fn subscription_action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((id, action)): Path<(String, String)>,
) -> Result<Json<Subscription>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let now = state.config.business_now();
    let (sub, event) = {
        let mut conn = db::lock(&state.db)?;
        if action == "activate" {
            subscriptions::activate(&mut conn, &id, now)?
        } else {
            let action = LifecycleAction::parse(&action)
                .ok_or_else(|| AppError::NotFound(format!("subscription action {action}")))?;
            subscriptions::apply_action(&conn, &id, action, now)?
        }
    };

    events::emit(&state, event);
    Ok(Json(sub))
}

// GET /api/admin/invoices
#[derive(Deserialize)]
pub struct InvoicesQuery {
    pub limit: Option<i64>,
}

pub async fn get_invoices(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<InvoicesQuery>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let invoices = {
        let conn = db::lock(&state.db)?;
        queries::list_invoices(&conn, limit)?
    };

    Ok(Json(invoices))
}

// GET /api/admin/business-hours
pub async fn get_business_hours(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BusinessHours>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let hours = {
        let conn = db::lock(&state.db)?;
        queries::get_business_hours(&conn)?
    };
    Ok(Json(hours))
}

// POST /api/admin/business-hours
pub async fn update_business_hours(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<BusinessHours>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let hours = BusinessHours::from_json(&body).map_err(|e| AppError::Validation(e.to_string()))?;
    {
        let conn = db::lock(&state.db)?;
        queries::save_business_hours(&conn, &hours)?;
    }

    tracing::info!(days = hours.days.len(), closed_dates = hours.closed_dates.len(), "business hours updated");
    Ok(Json(hours))
}

// GET /api/admin/events (SSE)
#[derive(Deserialize)]
pub struct SseQuery {
    pub token: Option<String>,
    pub last_id: Option<i64>,
}

fn sse_event(event: &DomainEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default()
        .id(event.id.to_string())
        .event(event.kind.clone())
        .data(data)
}

pub async fn events_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Auth via query param (EventSource can't set headers)
    let token = query.token.as_deref().unwrap_or("");
    if token.is_empty() || token != state.config.admin_token {
        return Err(AppError::Unauthorized);
    }

    let last_id = query.last_id.unwrap_or(0);

    // Subscribe before the catch-up read so nothing falls between the two
    let rx = state.events_tx.subscribe();
    let catchup_events = {
        let conn = db::lock(&state.db)?;
        queries::get_domain_events_since(&conn, last_id)?
    };
    let newest_caught_up = catchup_events.last().map(|e| e.id).unwrap_or(last_id);

    let catchup_stream =
        tokio_stream::iter(catchup_events.into_iter().map(|event| Ok::<_, Infallible>(sse_event(&event))));

    let live_stream = BroadcastStream::new(rx).filter_map(move |result| match result {
        Ok(event) if event.id > newest_caught_up => Some(Ok(sse_event(&event))),
        Ok(_) => None,
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "event stream subscriber lagged");
            None
        }
    });

    let keepalive_stream = tokio_stream::StreamExt::map(
        tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(Duration::from_secs(30))),
        |_| Ok(Event::default().comment("keepalive")),
    );

    let combined = catchup_stream.chain(live_stream);
    let merged = StreamExt::merge(combined, keepalive_stream);

    Ok(Sse::new(merged))
}
