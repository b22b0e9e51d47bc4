use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::event::{BOOKING_CANCELLED, BOOKING_COMPLETED, BOOKING_CONFIRMED, BOOKING_CREATED};
use crate::models::{
    Booking, BookingDraft, BookingStatus, PaymentMethod, PaymentStatus, PendingEvent,
    PriceBreakdown, SubscriptionPlan,
};
use crate::services::quota::{self, QuotaError, QuotaSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("horario no disponible, elegí otro")]
    SlotTaken,

    #[error("we are closed on {0}")]
    DayClosed(NaiveDate),

    #[error("{time} is not a bookable slot on {date}")]
    UnknownSlot { date: NaiveDate, time: String },

    #[error("cannot book a date in the past: {0}")]
    PastDate(NaiveDate),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for ClaimError {
    fn from(err: rusqlite::Error) -> Self {
        ClaimError::Storage(err.into())
    }
}

#[derive(Debug, Clone)]
pub struct ClaimedBooking {
    pub booking: Booking,
    pub quota: Option<QuotaSnapshot>,
}

impl ClaimedBooking {
    pub fn created_event(&self) -> PendingEvent {
        let b = &self.booking;
        PendingEvent::new(
            BOOKING_CREATED,
            &b.id,
            serde_json::json!({
                "date": b.scheduled_date,
                "time": b.time_slot,
                "customer_email": b.customer_email,
                "payment_method": b.payment_method.as_str(),
                "total_cents": b.price.total_cents(),
            }),
        )
    }
}

/// Claims `(draft.date, draft.time)` for a new pending booking.
///
/// The insert and, for subscription payments, the wash decrement share one
/// transaction. The partial unique index on live slots makes the
/// check-and-insert indivisible: a concurrent claim loses with `SlotTaken`
/// and its transaction rolls back untouched.
pub fn claim_slot(
    conn: &mut Connection,
    draft: &BookingDraft,
    now: NaiveDateTime,
    today: NaiveDate,
) -> Result<ClaimedBooking, ClaimError> {
    validate_draft(draft)?;

    let hours = queries::get_business_hours(conn)?;
    if draft.date < today {
        return Err(ClaimError::PastDate(draft.date));
    }
    if !hours.is_open(draft.date, today) {
        return Err(ClaimError::DayClosed(draft.date));
    }
    if !hours.offers_slot(draft.date, &draft.time) {
        return Err(ClaimError::UnknownSlot {
            date: draft.date,
            time: draft.time.clone(),
        });
    }

    let tx = conn.transaction()?;

    let plan = match (&draft.payment_method, &draft.subscription_id) {
        (PaymentMethod::Subscription, Some(sub_id)) => Some(subscription_plan_for(&tx, sub_id, draft)?),
        _ => None,
    };
    let price = price_draft(&tx, draft, plan.as_ref())?;

    let booking = Booking {
        id: uuid::Uuid::new_v4().to_string(),
        customer_name: draft.customer_name.trim().to_string(),
        customer_email: draft.customer_email.trim().to_lowercase(),
        customer_phone: draft.customer_phone.trim().to_string(),
        address: draft.address.trim().to_string(),
        service_id: draft.service_id.clone(),
        vehicle_type_id: draft.vehicle_type_id.clone(),
        addon_ids: dedup_addons(&draft.addon_ids),
        scheduled_date: draft.date,
        time_slot: draft.time.clone(),
        price,
        payment_method: draft.payment_method,
        payment_status: PaymentStatus::Pending,
        status: BookingStatus::Pending,
        subscription_id: plan.as_ref().and(draft.subscription_id.clone()),
        provider_payment_id: None,
        notes: draft.notes.clone().filter(|n| !n.trim().is_empty()),
        created_at: now,
        confirmed_at: None,
        updated_at: now,
    };

    match queries::insert_booking(&tx, &booking) {
        Ok(()) => {}
        Err(e) if queries::is_unique_violation(&e) => {
            tracing::info!(date = %draft.date, time = %draft.time, "slot already taken");
            return Err(ClaimError::SlotTaken);
        }
        Err(e) => return Err(e.into()),
    }

    let quota = match &booking.subscription_id {
        Some(sub_id) => Some(quota::consume_wash(&tx, sub_id, &now)?),
        None => None,
    };

    tx.commit()?;

    tracing::info!(
        booking_id = %booking.id,
        date = %booking.scheduled_date,
        time = %booking.time_slot,
        method = booking.payment_method.as_str(),
        "slot claimed"
    );

    Ok(ClaimedBooking { booking, quota })
}

fn validate_draft(draft: &BookingDraft) -> Result<(), ClaimError> {
    let required = [
        ("customer_name", &draft.customer_name),
        ("customer_email", &draft.customer_email),
        ("customer_phone", &draft.customer_phone),
        ("address", &draft.address),
        ("service_id", &draft.service_id),
        ("vehicle_type_id", &draft.vehicle_type_id),
        ("time", &draft.time),
    ];
    let missing: Vec<&str> = required
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();
    if !missing.is_empty() {
        return Err(ClaimError::Invalid(format!(
            "missing required fields: {}",
            missing.join(", ")
        )));
    }

    let email = draft.customer_email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => return Err(ClaimError::Invalid(format!("invalid email: {email}"))),
    }

    if draft.customer_phone.chars().filter(|c| c.is_ascii_digit()).count() < 6 {
        return Err(ClaimError::Invalid("invalid phone number".to_string()));
    }

    match (&draft.payment_method, &draft.subscription_id) {
        (PaymentMethod::Subscription, None) => Err(ClaimError::Invalid(
            "subscription_id is required for subscription payments".to_string(),
        )),
        (PaymentMethod::Subscription, Some(_)) => Ok(()),
        (_, Some(_)) => Err(ClaimError::Invalid(
            "subscription_id only applies to subscription payments".to_string(),
        )),
        (_, None) => Ok(()),
    }
}

/// Loads the plan behind a subscription and checks the draft fits it. Status
/// and remaining credit are left to the guarded decrement.
fn subscription_plan_for(
    conn: &Connection,
    subscription_id: &str,
    draft: &BookingDraft,
) -> Result<SubscriptionPlan, ClaimError> {
    let sub = queries::get_subscription(conn, subscription_id)?
        .ok_or_else(|| QuotaError::NotFound(subscription_id.to_string()))?;

    if !sub
        .customer_email
        .eq_ignore_ascii_case(draft.customer_email.trim())
    {
        return Err(ClaimError::Invalid(
            "subscription does not belong to this customer".to_string(),
        ));
    }

    let plan = queries::get_plan(conn, &sub.plan_id)?
        .ok_or_else(|| anyhow::anyhow!("plan {} missing for subscription {}", sub.plan_id, sub.id))?;

    if plan.service_id != draft.service_id || plan.vehicle_type_id != draft.vehicle_type_id {
        return Err(ClaimError::Invalid(format!(
            "plan {} covers service {} for vehicle {}",
            plan.id, plan.service_id, plan.vehicle_type_id
        )));
    }
    if !draft.addon_ids.is_empty() {
        return Err(ClaimError::Invalid(
            "addons are not included in subscription washes".to_string(),
        ));
    }
    Ok(plan)
}

/// Prices the draft from the catalog. Client-supplied amounts are never trusted.
pub fn price_draft(
    conn: &Connection,
    draft: &BookingDraft,
    plan: Option<&SubscriptionPlan>,
) -> Result<PriceBreakdown, ClaimError> {
    let service = queries::get_service(conn, &draft.service_id)?
        .ok_or_else(|| ClaimError::Invalid(format!("unknown service: {}", draft.service_id)))?;
    let vehicle = queries::get_vehicle_type(conn, &draft.vehicle_type_id)?.ok_or_else(|| {
        ClaimError::Invalid(format!("unknown vehicle type: {}", draft.vehicle_type_id))
    })?;

    if plan.is_some() {
        return Ok(PriceBreakdown::default());
    }

    let mut addons_cents = 0;
    for addon_id in dedup_addons(&draft.addon_ids) {
        let addon = queries::get_addon(conn, &addon_id)?
            .ok_or_else(|| ClaimError::Invalid(format!("unknown addon: {addon_id}")))?;
        addons_cents += addon.price_cents;
    }

    Ok(PriceBreakdown {
        base_cents: service.base_price_cents,
        vehicle_extra_cents: vehicle.extra_cents,
        addons_cents,
    })
}

fn dedup_addons(ids: &[String]) -> Vec<String> {
    ids.iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Cancels a live booking, freeing its slot and giving back the wash if it
/// was subscription-funded.
pub fn cancel_booking(
    conn: &mut Connection,
    id: &str,
    reason: &str,
    now: NaiveDateTime,
) -> Result<(Booking, Option<QuotaSnapshot>, PendingEvent), AppError> {
    let tx = conn.transaction()?;
    let booking = queries::get_booking_by_id(&tx, id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))?;

    if !queries::cancel_live_booking(&tx, id, &now)? {
        return Err(AppError::InvalidTransition(format!(
            "booking {id} is {}",
            booking.status.as_str()
        )));
    }
    let restored = quota::restore_for_booking(&tx, &booking, &now)?;
    tx.commit()?;

    tracing::info!(booking_id = id, reason, "booking cancelled");
    let event = PendingEvent::new(
        BOOKING_CANCELLED,
        id,
        serde_json::json!({ "reason": reason, "wash_restored": restored.is_some() }),
    );
    Ok((booking, restored, event))
}

/// Manual confirmation, for transfer and pay-later bookings.
pub fn confirm_booking(conn: &Connection, id: &str, now: NaiveDateTime) -> Result<PendingEvent, AppError> {
    let booking = queries::get_booking_by_id(conn, id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))?;
    if !queries::confirm_pending_booking(conn, id, &now)? {
        return Err(AppError::InvalidTransition(format!(
            "booking {id} is {}",
            booking.status.as_str()
        )));
    }
    tracing::info!(booking_id = id, "booking confirmed manually");
    Ok(PendingEvent::new(
        BOOKING_CONFIRMED,
        id,
        serde_json::json!({ "source": "admin" }),
    ))
}

pub fn complete_booking(conn: &Connection, id: &str, now: NaiveDateTime) -> Result<PendingEvent, AppError> {
    let booking = queries::get_booking_by_id(conn, id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))?;
    if !queries::complete_booking(conn, id, &now)? {
        return Err(AppError::InvalidTransition(format!(
            "booking {id} is {}",
            booking.status.as_str()
        )));
    }
    tracing::info!(booking_id = id, "booking completed");
    Ok(PendingEvent::new(BOOKING_COMPLETED, id, serde_json::json!({})))
}
