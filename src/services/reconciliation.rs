use std::sync::Arc;

use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::db::queries;
use crate::models::event::{
    BOOKING_CANCELLED, BOOKING_CONFIRMED, INVOICE_REQUESTED, SUBSCRIPTION_ACTIVATED,
    SUBSCRIPTION_RENEWED, SUBSCRIPTION_STATUS_CHANGED,
};
use crate::models::{
    Booking, BookingStatus, EntityRef, EntityType, InvoiceRequest, PaymentStatus, PendingEvent,
    ProviderPayment, Subscription, SubscriptionStatus, WebhookEvent,
};
use crate::services::events;
use crate::services::quota::{self, QuotaError, RenewalOutcome};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("no booking or subscription matches payment {0}")]
    UnknownEntity(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for ReconcileError {
    fn from(err: rusqlite::Error) -> Self {
        ReconcileError::Storage(err.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Provider status with no internal meaning.
    Ignored,
    Applied,
    /// Guard did not match: duplicate or stale delivery.
    NoOp,
    /// Money was taken but the booking or subscription can no longer honour it.
    NeedsManualRefund,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ignored => "ignored",
            Outcome::Applied => "applied",
            Outcome::NoOp => "noop",
            Outcome::NeedsManualRefund => "manual_refund",
        }
    }
}

#[derive(Debug)]
pub struct Reconciliation {
    pub outcome: Outcome,
    pub entity: Option<EntityRef>,
    pub events: Vec<PendingEvent>,
    pub invoice: Option<InvoiceRequest>,
}

impl Reconciliation {
    fn new(outcome: Outcome, entity: &EntityRef) -> Self {
        Self {
            outcome,
            entity: Some(entity.clone()),
            events: Vec::new(),
            invoice: None,
        }
    }
}

/// Finds the booking or subscription a payment belongs to: explicit
/// metadata, then a prefixed external reference, then a bare id lookup.
pub fn resolve_entity(conn: &Connection, payment: &ProviderPayment) -> Result<EntityRef, ReconcileError> {
    let explicit = EntityRef::from_metadata(&payment.metadata).or_else(|| {
        payment
            .external_reference
            .as_deref()
            .and_then(EntityRef::from_prefixed_reference)
    });
    if let Some(entity) = explicit {
        let exists = match entity.entity_type {
            EntityType::Booking => queries::booking_exists(conn, &entity.entity_id)?,
            EntityType::Subscription => queries::subscription_exists(conn, &entity.entity_id)?,
        };
        if !exists {
            return Err(ReconcileError::UnknownEntity(payment.id.clone()));
        }
        return Ok(entity);
    }

    let reference = payment
        .external_reference
        .as_deref()
        .ok_or_else(|| ReconcileError::UnknownEntity(payment.id.clone()))?;

    let entity = if queries::booking_exists(conn, reference)? {
        EntityRef::booking(reference)
    } else if queries::subscription_exists(conn, reference)? {
        EntityRef::subscription(reference)
    } else {
        return Err(ReconcileError::UnknownEntity(payment.id.clone()));
    };
    tracing::warn!(
        payment_id = %payment.id,
        reference,
        entity_type = entity.entity_type.as_str(),
        "payment carries no entity metadata, resolved by id lookup"
    );
    Ok(entity)
}

/// Applies one authoritative payment state in a single transaction. Safe to
/// call any number of times with the same payment.
pub fn apply_payment(
    conn: &mut Connection,
    payment: &ProviderPayment,
    now: NaiveDateTime,
) -> Result<Reconciliation, ReconcileError> {
    let Some(status) = payment.mapped_status() else {
        tracing::warn!(payment_id = %payment.id, status = %payment.status, "unmapped payment status, ignoring");
        return Ok(Reconciliation {
            outcome: Outcome::Ignored,
            entity: None,
            events: Vec::new(),
            invoice: None,
        });
    };

    let tx = conn.transaction()?;
    let entity = resolve_entity(&tx, payment)?;
    let result = match entity.entity_type {
        EntityType::Booking => apply_to_booking(&tx, &entity, payment, status, &now)?,
        EntityType::Subscription => apply_to_subscription(&tx, &entity, payment, status, &now)?,
    };
    tx.commit()?;

    tracing::info!(
        payment_id = %payment.id,
        status = status.as_str(),
        entity_type = entity.entity_type.as_str(),
        entity_id = %entity.entity_id,
        outcome = result.outcome.as_str(),
        "payment reconciled"
    );
    Ok(result)
}

fn apply_to_booking(
    conn: &Connection,
    entity: &EntityRef,
    payment: &ProviderPayment,
    status: PaymentStatus,
    now: &NaiveDateTime,
) -> Result<Reconciliation, ReconcileError> {
    let id = entity.entity_id.as_str();
    let booking = queries::get_booking_by_id(conn, id)?
        .ok_or_else(|| ReconcileError::UnknownEntity(payment.id.clone()))?;

    let mut result = Reconciliation::new(Outcome::NoOp, entity);
    match status {
        PaymentStatus::Approved => {
            if matches!(booking.payment_status, PaymentStatus::Approved | PaymentStatus::Refunded) {
                tracing::info!(booking_id = id, payment_id = %payment.id, "booking payment already settled");
                return Ok(result);
            }

            // Only a rejection-driven cancellation is reinstated by a later approval
            if booking.status == BookingStatus::Cancelled && booking.payment_status != PaymentStatus::Rejected {
                return unhonoured_approval(conn, result, payment, id, "booking was cancelled", now);
            }

            match queries::approve_booking_payment(conn, id, &payment.id, now) {
                Ok(0) => return Ok(result),
                Ok(_) => {}
                Err(e) if queries::is_unique_violation(&e) => {
                    return unhonoured_approval(conn, result, payment, id, "slot was taken", now);
                }
                Err(e) => return Err(e.into()),
            }

            result.outcome = Outcome::Applied;
            if booking.status != BookingStatus::Confirmed {
                result.events.push(PendingEvent::new(
                    BOOKING_CONFIRMED,
                    id,
                    serde_json::json!({ "source": "payment", "payment_id": payment.id }),
                ));
            }
            let amount = paid_amount(payment, booking.price.total_cents());
            queue_invoice(conn, &mut result, payment, amount, &booking.customer_name, &booking.customer_email, now)?;
        }
        PaymentStatus::Pending | PaymentStatus::InProcess => {
            if queries::mark_booking_payment_in_process(conn, id, &payment.id, now)? > 0 {
                result.outcome = Outcome::Applied;
            }
        }
        PaymentStatus::Rejected => {
            if queries::reject_booking_payment(conn, id, &payment.id, now)? > 0 {
                cancel_effects(conn, &mut result, &booking, "payment_rejected", now)?;
            }
        }
        PaymentStatus::Refunded => {
            if queries::refund_booking_payment(conn, id, &payment.id, now)? > 0 {
                if booking.status.blocks_capacity() {
                    cancel_effects(conn, &mut result, &booking, "payment_refunded", now)?;
                } else {
                    result.outcome = Outcome::Applied;
                }
            }
        }
    }
    Ok(result)
}

/// Records an approval the booking can no longer honour. No invoice is
/// queued; the charge has to be refunded by hand.
fn unhonoured_approval(
    conn: &Connection,
    mut result: Reconciliation,
    payment: &ProviderPayment,
    booking_id: &str,
    reason: &str,
    now: &NaiveDateTime,
) -> Result<Reconciliation, ReconcileError> {
    queries::record_booking_payment_approved(conn, booking_id, &payment.id, now)?;
    tracing::warn!(
        booking_id,
        payment_id = %payment.id,
        reason,
        "approved payment for a cancelled booking, refund manually"
    );
    result.outcome = Outcome::NeedsManualRefund;
    Ok(result)
}

fn cancel_effects(
    conn: &Connection,
    result: &mut Reconciliation,
    booking: &Booking,
    reason: &str,
    now: &NaiveDateTime,
) -> Result<(), ReconcileError> {
    let restored = quota::restore_for_booking(conn, booking, now)?;
    result.outcome = Outcome::Applied;
    result.events.push(PendingEvent::new(
        BOOKING_CANCELLED,
        &booking.id,
        serde_json::json!({ "reason": reason, "wash_restored": restored.is_some() }),
    ));
    Ok(())
}

fn apply_to_subscription(
    conn: &Connection,
    entity: &EntityRef,
    payment: &ProviderPayment,
    status: PaymentStatus,
    now: &NaiveDateTime,
) -> Result<Reconciliation, ReconcileError> {
    let id = entity.entity_id.as_str();
    let sub = queries::get_subscription(conn, id)?
        .ok_or_else(|| ReconcileError::UnknownEntity(payment.id.clone()))?;

    let mut result = Reconciliation::new(Outcome::NoOp, entity);
    match status {
        PaymentStatus::Approved => {
            let renewal = quota::renew_cycle(conn, id, &payment.id, payment.amount_cents, now)
                .map_err(|e| match e {
                    QuotaError::NotFound(_) => ReconcileError::UnknownEntity(payment.id.clone()),
                    QuotaError::Storage(e) => ReconcileError::Storage(e),
                    other => ReconcileError::Storage(other.into()),
                })?;

            let (kind, cycle_end) = match renewal {
                RenewalOutcome::Activated { cycle_end } => (SUBSCRIPTION_ACTIVATED, cycle_end),
                RenewalOutcome::Renewed { cycle_end } => (SUBSCRIPTION_RENEWED, cycle_end),
                RenewalOutcome::AlreadyProcessed => return Ok(result),
                RenewalOutcome::Skipped(status) => {
                    tracing::warn!(
                        subscription_id = id,
                        payment_id = %payment.id,
                        status = status.as_str(),
                        "approved payment for a subscription that cannot renew, refund manually"
                    );
                    result.outcome = Outcome::NeedsManualRefund;
                    return Ok(result);
                }
            };

            result.outcome = Outcome::Applied;
            result.events.push(PendingEvent::new(
                kind,
                id,
                serde_json::json!({ "payment_id": payment.id, "cycle_end": queries::fmt_ts(&cycle_end) }),
            ));
            let amount = paid_amount(payment, plan_price(conn, &sub)?);
            queue_invoice(conn, &mut result, payment, amount, &sub.customer_name, &sub.customer_email, now)?;
        }
        PaymentStatus::Pending | PaymentStatus::InProcess | PaymentStatus::Rejected => {
            if quota::advance_payment_status(conn, id, &payment.id, status, payment.amount_cents, now)? {
                tracing::info!(subscription_id = id, payment_id = %payment.id, status = status.as_str(), "subscription payment recorded");
                result.outcome = Outcome::Applied;
            }
        }
        PaymentStatus::Refunded => {
            if !quota::advance_payment_status(conn, id, &payment.id, status, payment.amount_cents, now)? {
                return Ok(result);
            }
            result.outcome = Outcome::Applied;
            let cancelled = queries::transition_subscription(
                conn,
                id,
                &[SubscriptionStatus::Pending, SubscriptionStatus::Active, SubscriptionStatus::Paused],
                SubscriptionStatus::Cancelled,
                now,
            )?;
            if cancelled {
                result.events.push(PendingEvent::new(
                    SUBSCRIPTION_STATUS_CHANGED,
                    id,
                    serde_json::json!({
                        "from": sub.status.as_str(),
                        "to": SubscriptionStatus::Cancelled.as_str(),
                        "reason": "payment_refunded",
                    }),
                ));
            }
        }
    }
    Ok(result)
}

fn plan_price(conn: &Connection, sub: &Subscription) -> anyhow::Result<i64> {
    Ok(queries::get_plan(conn, &sub.plan_id)?
        .map(|plan| plan.price_cents)
        .unwrap_or(0))
}

fn paid_amount(payment: &ProviderPayment, expected_cents: i64) -> i64 {
    if payment.amount_cents > 0 {
        payment.amount_cents
    } else {
        expected_cents
    }
}

/// Inserts the invoice row for this payment. Only the first insert yields a
/// request to issue, so redelivery never invoices twice.
fn queue_invoice(
    conn: &Connection,
    result: &mut Reconciliation,
    payment: &ProviderPayment,
    amount_cents: i64,
    customer_name: &str,
    customer_email: &str,
    now: &NaiveDateTime,
) -> Result<(), ReconcileError> {
    let Some(entity) = result.entity.clone() else {
        return Ok(());
    };
    let Some(invoice_id) = queries::insert_invoice_once(
        conn,
        &payment.id,
        entity.entity_type.as_str(),
        &entity.entity_id,
        amount_cents,
        now,
    )?
    else {
        tracing::info!(payment_id = %payment.id, "invoice already recorded for payment");
        return Ok(());
    };

    result.events.push(PendingEvent::new(
        INVOICE_REQUESTED,
        &entity.entity_id,
        serde_json::json!({ "invoice_id": invoice_id, "payment_id": payment.id, "amount_cents": amount_cents }),
    ));
    result.invoice = Some(InvoiceRequest {
        invoice_id,
        provider_payment_id: payment.id.clone(),
        entity,
        amount_cents,
        customer_name: customer_name.to_string(),
        customer_email: customer_email.to_string(),
    });
    Ok(())
}

/// Runs the full pipeline for one webhook notification: fetch the payment,
/// apply it, then emit events and issue the invoice with no lock held.
pub async fn process_event(
    state: &Arc<AppState>,
    event: &WebhookEvent,
) -> Result<Reconciliation, ReconcileError> {
    let payment = state
        .payments
        .fetch_payment(&event.data.id)
        .await
        .map_err(|e| ReconcileError::ProviderUnavailable(format!("{e:#}")))?;

    let now = state.config.business_now();
    let mut reconciliation = {
        let mut db = state
            .db
            .lock()
            .map_err(|_| anyhow::anyhow!("database lock poisoned"))?;
        apply_payment(&mut db, &payment, now)?
    };

    events::emit_all(state, std::mem::take(&mut reconciliation.events));

    if let Some(request) = &reconciliation.invoice {
        issue_invoice(state, request).await;
    }
    Ok(reconciliation)
}

async fn issue_invoice(state: &Arc<AppState>, request: &InvoiceRequest) {
    let issued = state.invoices.issue(request).await;
    let now = state.config.business_now();

    let recorded = match state.db.lock() {
        Ok(db) => match &issued {
            Ok(external_id) => queries::mark_invoice_issued(&db, request.invoice_id, external_id.as_deref(), &now),
            Err(e) => queries::mark_invoice_failed(&db, request.invoice_id, &format!("{e:#}")),
        },
        Err(_) => Err(anyhow::anyhow!("database lock poisoned")),
    };

    match issued {
        Ok(_) => tracing::info!(invoice_id = request.invoice_id, payment_id = %request.provider_payment_id, "invoice issued"),
        Err(e) => tracing::error!(
            error = %e,
            invoice_id = request.invoice_id,
            payment_id = %request.provider_payment_id,
            "invoice issuing failed"
        ),
    }
    if let Err(e) = recorded {
        tracing::error!(error = %e, invoice_id = request.invoice_id, "failed to record invoice status");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::{BookingDraft, PaymentMetadata, PaymentMethod};
    use crate::services::slots;
    use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};

    fn now() -> NaiveDateTime {
        Utc::now().naive_utc()
    }

    fn next_monday() -> NaiveDate {
        let mut d = Utc::now().date_naive() + Duration::days(2);
        while d.weekday() != Weekday::Mon {
            d += Duration::days(1);
        }
        d
    }

    fn claim(conn: &mut Connection, time: &str) -> Booking {
        let draft = BookingDraft {
            customer_name: "Lucía".to_string(),
            customer_email: "lucia@example.com".to_string(),
            customer_phone: "+54 9 11 5555 0000".to_string(),
            address: "Av. Corrientes 1234".to_string(),
            service_id: "exterior".to_string(),
            vehicle_type_id: "auto".to_string(),
            addon_ids: vec![],
            date: next_monday(),
            time: time.to_string(),
            payment_method: PaymentMethod::Online,
            subscription_id: None,
            notes: None,
        };
        slots::claim_slot(conn, &draft, now(), Utc::now().date_naive())
            .unwrap()
            .booking
    }

    fn payment(id: &str, status: &str, entity: &EntityRef) -> ProviderPayment {
        ProviderPayment {
            id: id.to_string(),
            status: status.to_string(),
            external_reference: Some(entity.external_reference()),
            metadata: PaymentMetadata {
                entity_type: Some(entity.entity_type.as_str().to_string()),
                entity_id: Some(entity.entity_id.clone()),
            },
            amount_cents: 1_200_000,
        }
    }

    fn booking(conn: &Connection, id: &str) -> Booking {
        queries::get_booking_by_id(conn, id).unwrap().unwrap()
    }

    #[test]
    fn test_approved_twice_issues_one_invoice() {
        let mut conn = db::init_db(":memory:").unwrap();
        let b = claim(&mut conn, "10:00");
        let p1 = payment("P1", "approved", &EntityRef::booking(&b.id));

        let first = apply_payment(&mut conn, &p1, now()).unwrap();
        assert_eq!(first.outcome, Outcome::Applied);
        assert!(first.invoice.is_some());
        assert!(first.events.iter().any(|e| e.kind == BOOKING_CONFIRMED));

        let second = apply_payment(&mut conn, &p1, now()).unwrap();
        assert_eq!(second.outcome, Outcome::NoOp);
        assert!(second.invoice.is_none());
        assert!(second.events.is_empty());

        assert_eq!(queries::count_invoices_for_payment(&conn, "P1").unwrap(), 1);
        let stored = booking(&conn, &b.id);
        assert_eq!(stored.status, BookingStatus::Confirmed);
        assert_eq!(stored.payment_status, PaymentStatus::Approved);
        assert_eq!(stored.provider_payment_id.as_deref(), Some("P1"));
        assert!(stored.confirmed_at.is_some());
    }

    #[test]
    fn test_late_pending_does_not_downgrade() {
        let mut conn = db::init_db(":memory:").unwrap();
        let b = claim(&mut conn, "11:00");
        let entity = EntityRef::booking(&b.id);

        apply_payment(&mut conn, &payment("P1", "approved", &entity), now()).unwrap();
        let late = apply_payment(&mut conn, &payment("P1", "in_process", &entity), now()).unwrap();
        assert_eq!(late.outcome, Outcome::NoOp);

        let stored = booking(&conn, &b.id);
        assert_eq!(stored.payment_status, PaymentStatus::Approved);
        assert_eq!(stored.status, BookingStatus::Confirmed);
    }

    #[test]
    fn test_in_process_keeps_booking_pending() {
        let mut conn = db::init_db(":memory:").unwrap();
        let b = claim(&mut conn, "12:00");

        let result = apply_payment(&mut conn, &payment("P1", "authorized", &EntityRef::booking(&b.id)), now()).unwrap();
        assert_eq!(result.outcome, Outcome::Applied);
        let stored = booking(&conn, &b.id);
        assert_eq!(stored.payment_status, PaymentStatus::InProcess);
        assert_eq!(stored.status, BookingStatus::Pending);
    }

    #[test]
    fn test_rejected_frees_slot_and_late_approval_reinstates() {
        let mut conn = db::init_db(":memory:").unwrap();
        let b = claim(&mut conn, "13:00");
        let entity = EntityRef::booking(&b.id);

        let rejected = apply_payment(&mut conn, &payment("P1", "rejected", &entity), now()).unwrap();
        assert!(rejected.events.iter().any(|e| e.kind == BOOKING_CANCELLED));
        assert_eq!(booking(&conn, &b.id).status, BookingStatus::Cancelled);
        assert!(queries::occupied_slots(&conn, &b.scheduled_date).unwrap().is_empty());

        let approved = apply_payment(&mut conn, &payment("P2", "approved", &entity), now()).unwrap();
        assert_eq!(approved.outcome, Outcome::Applied);
        assert_eq!(booking(&conn, &b.id).status, BookingStatus::Confirmed);
    }

    #[test]
    fn test_approval_after_slot_retaken_needs_manual_refund() {
        let mut conn = db::init_db(":memory:").unwrap();
        let b = claim(&mut conn, "14:00");
        let entity = EntityRef::booking(&b.id);

        apply_payment(&mut conn, &payment("P1", "rejected", &entity), now()).unwrap();
        let other = claim(&mut conn, "14:00");

        let approved = apply_payment(&mut conn, &payment("P2", "approved", &entity), now()).unwrap();
        assert_eq!(approved.outcome, Outcome::NeedsManualRefund);
        assert!(approved.invoice.is_none());

        let stored = booking(&conn, &b.id);
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.payment_status, PaymentStatus::Approved);
        assert_eq!(booking(&conn, &other.id).status, BookingStatus::Pending);
        assert_eq!(queries::count_invoices_for_payment(&conn, "P2").unwrap(), 0);
    }

    #[test]
    fn test_approval_after_admin_cancel_needs_manual_refund() {
        let mut conn = db::init_db(":memory:").unwrap();
        let b = claim(&mut conn, "13:00");
        let entity = EntityRef::booking(&b.id);
        slots::cancel_booking(&mut conn, &b.id, "admin", now()).unwrap();

        let approved = apply_payment(&mut conn, &payment("P1", "approved", &entity), now()).unwrap();
        assert_eq!(approved.outcome, Outcome::NeedsManualRefund);
        assert!(approved.invoice.is_none());
        assert!(approved.events.is_empty());

        let stored = booking(&conn, &b.id);
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.payment_status, PaymentStatus::Approved);
        assert_eq!(stored.provider_payment_id.as_deref(), Some("P1"));
        assert_eq!(queries::count_invoices_for_payment(&conn, "P1").unwrap(), 0);

        let again = apply_payment(&mut conn, &payment("P1", "approved", &entity), now()).unwrap();
        assert_eq!(again.outcome, Outcome::NoOp);
    }

    #[test]
    fn test_refund_cancels_booking() {
        let mut conn = db::init_db(":memory:").unwrap();
        let b = claim(&mut conn, "15:00");
        let entity = EntityRef::booking(&b.id);

        apply_payment(&mut conn, &payment("P1", "approved", &entity), now()).unwrap();
        // A refund for some other payment id does not touch this booking
        let foreign = apply_payment(&mut conn, &payment("P9", "refunded", &entity), now()).unwrap();
        assert_eq!(foreign.outcome, Outcome::NoOp);

        let refunded = apply_payment(&mut conn, &payment("P1", "charged_back", &entity), now()).unwrap();
        assert_eq!(refunded.outcome, Outcome::Applied);
        let stored = booking(&conn, &b.id);
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.payment_status, PaymentStatus::Refunded);

        let again = apply_payment(&mut conn, &payment("P1", "approved", &entity), now()).unwrap();
        assert_eq!(again.outcome, Outcome::NoOp);
    }

    #[test]
    fn test_unmapped_status_ignored() {
        let mut conn = db::init_db(":memory:").unwrap();
        let b = claim(&mut conn, "16:00");
        let result = apply_payment(&mut conn, &payment("P1", "mystery", &EntityRef::booking(&b.id)), now()).unwrap();
        assert_eq!(result.outcome, Outcome::Ignored);
        assert_eq!(booking(&conn, &b.id).payment_status, PaymentStatus::Pending);
    }

    #[test]
    fn test_subscription_payment_activates_once() {
        let mut conn = db::init_db(":memory:").unwrap();
        let signup = crate::models::SubscriptionSignup {
            customer_name: "Ana".to_string(),
            customer_email: "ana@example.com".to_string(),
            customer_phone: "+5491100000000".to_string(),
            plan_id: "mensual-4".to_string(),
        };
        let (sub, _) = crate::services::subscriptions::signup(&conn, &signup, now()).unwrap();
        let entity = EntityRef::subscription(&sub.id);

        let pending = apply_payment(&mut conn, &payment("S1", "in_process", &entity), now()).unwrap();
        assert_eq!(pending.outcome, Outcome::Applied);
        assert_eq!(
            queries::get_subscription(&conn, &sub.id).unwrap().unwrap().status,
            SubscriptionStatus::Pending
        );

        let approved = apply_payment(&mut conn, &payment("S1", "approved", &entity), now()).unwrap();
        assert!(approved.events.iter().any(|e| e.kind == SUBSCRIPTION_ACTIVATED));
        assert!(approved.invoice.is_some());

        let again = apply_payment(&mut conn, &payment("S1", "approved", &entity), now()).unwrap();
        assert_eq!(again.outcome, Outcome::NoOp);
        assert_eq!(queries::count_invoices_for_payment(&conn, "S1").unwrap(), 1);

        let stored = queries::get_subscription(&conn, &sub.id).unwrap().unwrap();
        assert_eq!(stored.status, SubscriptionStatus::Active);
        assert_eq!(stored.washes_remaining, 4);

        apply_payment(&mut conn, &payment("S1", "refunded", &entity), now()).unwrap();
        assert_eq!(
            queries::get_subscription(&conn, &sub.id).unwrap().unwrap().status,
            SubscriptionStatus::Cancelled
        );
    }

    #[test]
    fn test_resolution_order() {
        let mut conn = db::init_db(":memory:").unwrap();
        let b = claim(&mut conn, "09:00");

        // Metadata wins over a conflicting reference
        let mut p = payment("P1", "approved", &EntityRef::booking(&b.id));
        p.external_reference = Some("subscription:nope".to_string());
        assert_eq!(resolve_entity(&conn, &p).unwrap(), EntityRef::booking(&b.id));

        // Prefixed reference without metadata
        p.metadata = PaymentMetadata::default();
        p.external_reference = Some(format!("booking:{}", b.id));
        assert_eq!(resolve_entity(&conn, &p).unwrap(), EntityRef::booking(&b.id));

        // Bare id falls back to probing
        p.external_reference = Some(b.id.clone());
        assert_eq!(resolve_entity(&conn, &p).unwrap(), EntityRef::booking(&b.id));

        p.external_reference = Some("unknown".to_string());
        assert!(matches!(resolve_entity(&conn, &p), Err(ReconcileError::UnknownEntity(_))));

        p.external_reference = None;
        assert!(matches!(resolve_entity(&conn, &p), Err(ReconcileError::UnknownEntity(_))));
    }
}
