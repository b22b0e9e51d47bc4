use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::models::{
    Booking, BookingDraft, BookingStatus, CheckoutRequest, CheckoutSession, EntityRef, PaymentMethod,
    PaymentStatus,
};
use crate::services::{events, slots};
use crate::state::AppState;

#[derive(Serialize)]
pub struct CreatedBooking {
    booking_id: String,
    status: BookingStatus,
    payment_status: PaymentStatus,
    total_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    washes_remaining: Option<i64>,
}

// POST /bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BookingDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedBooking>), AppError> {
    let Json(draft) = payload?;
    let now = state.config.business_now();
    let today = now.date();

    let claimed = db::run_bounded(&state.db, state.config.claim_timeout, move |conn| {
        slots::claim_slot(conn, &draft, now, today).map_err(AppError::from)
    })
    .await?;

    events::emit(&state, claimed.created_event());

    let b = &claimed.booking;
    Ok((
        StatusCode::CREATED,
        Json(CreatedBooking {
            booking_id: b.id.clone(),
            status: b.status,
            payment_status: b.payment_status,
            total_cents: b.price.total_cents(),
            washes_remaining: claimed.quota.map(|q| q.washes_remaining),
        }),
    ))
}

// GET /bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let booking = {
        let conn = db::lock(&state.db)?;
        queries::get_booking_by_id(&conn, &id)?
    };
    booking
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

// POST /bookings/:id/checkout
pub async fn checkout_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CheckoutSession>, AppError> {
    let (booking, service_name) = {
        let conn = db::lock(&state.db)?;
        let booking = queries::get_booking_by_id(&conn, &id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {id}")))?;
        let service_name = queries::get_service(&conn, &booking.service_id)?
            .map(|s| s.name)
            .unwrap_or_else(|| booking.service_id.clone());
        (booking, service_name)
    };

    if booking.payment_method != PaymentMethod::Online {
        return Err(AppError::Validation(format!(
            "booking {id} is paid by {}",
            booking.payment_method.as_str()
        )));
    }
    if booking.status != BookingStatus::Pending
        || matches!(booking.payment_status, PaymentStatus::Approved | PaymentStatus::Refunded)
    {
        return Err(AppError::InvalidTransition(format!(
            "booking {id} is {} with payment {}",
            booking.status.as_str(),
            booking.payment_status.as_str()
        )));
    }

    let request = CheckoutRequest {
        entity: EntityRef::booking(&booking.id),
        title: format!(
            "Lavado {service_name} {} {}",
            booking.scheduled_date, booking.time_slot
        ),
        amount_cents: booking.price.total_cents(),
        payer_email: booking.customer_email.clone(),
        notification_url: state.config.webhook_url(),
    };

    let session = state.payments.create_checkout(&request).await.map_err(|e| {
        tracing::error!(error = %e, booking_id = %id, "checkout creation failed");
        AppError::ProviderUnavailable(e.to_string())
    })?;

    tracing::info!(booking_id = %id, preference_id = %session.preference_id, "checkout created");
    Ok(Json(session))
}
