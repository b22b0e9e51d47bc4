use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::models::{Booking, PaymentStatus, SubscriptionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
    pub washes_remaining: i64,
    pub washes_used_in_cycle: i64,
}

impl From<(i64, i64)> for QuotaSnapshot {
    fn from((washes_remaining, washes_used_in_cycle): (i64, i64)) -> Self {
        Self {
            washes_remaining,
            washes_used_in_cycle,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("subscription {0} not found")]
    NotFound(String),

    #[error("subscription is {}", .0.as_str())]
    Inactive(SubscriptionStatus),

    #[error("no te quedan lavados en tu suscripción, elegí otro medio de pago")]
    Exhausted,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenewalOutcome {
    /// First approved payment of a pending subscription.
    Activated { cycle_end: NaiveDateTime },
    Renewed { cycle_end: NaiveDateTime },
    /// This payment id was already applied.
    AlreadyProcessed,
    /// The payment was recorded but the subscription can no longer renew.
    Skipped(SubscriptionStatus),
}

/// Takes one wash from an active subscription with a single guarded update.
/// The follow-up read only explains why the guard did not match.
pub fn consume_wash(
    conn: &Connection,
    subscription_id: &str,
    now: &NaiveDateTime,
) -> Result<QuotaSnapshot, QuotaError> {
    if let Some(counts) = queries::decrement_wash(conn, subscription_id, now)? {
        tracing::info!(
            subscription_id,
            washes_remaining = counts.0,
            "wash consumed"
        );
        return Ok(counts.into());
    }

    match queries::get_subscription(conn, subscription_id)? {
        None => Err(QuotaError::NotFound(subscription_id.to_string())),
        Some(sub) if sub.status != SubscriptionStatus::Active => Err(QuotaError::Inactive(sub.status)),
        Some(_) => Err(QuotaError::Exhausted),
    }
}

/// Gives back one wash, bounded by the plan quota.
pub fn restore_wash(
    conn: &Connection,
    subscription_id: &str,
    now: &NaiveDateTime,
) -> anyhow::Result<Option<QuotaSnapshot>> {
    let restored = queries::increment_wash(conn, subscription_id, now)?.map(QuotaSnapshot::from);
    match restored {
        Some(snapshot) => tracing::info!(
            subscription_id,
            washes_remaining = snapshot.washes_remaining,
            "wash restored"
        ),
        None => tracing::warn!(subscription_id, "wash not restored, subscription missing or cancelled"),
    }
    Ok(restored)
}

/// Restores the wash a cancelled booking consumed, if it was subscription-funded.
pub fn restore_for_booking(
    conn: &Connection,
    booking: &Booking,
    now: &NaiveDateTime,
) -> anyhow::Result<Option<QuotaSnapshot>> {
    match (&booking.subscription_id, booking.is_subscription_funded()) {
        (Some(sub_id), true) => restore_wash(conn, sub_id, now),
        _ => Ok(None),
    }
}

/// Moves the stored status of a subscription payment forward. A status never
/// replaces one of equal or higher precedence, so late deliveries are no-ops.
/// Returns true if the stored status changed.
pub fn advance_payment_status(
    conn: &Connection,
    subscription_id: &str,
    payment_id: &str,
    status: PaymentStatus,
    amount_cents: i64,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    queries::advance_subscription_payment(conn, payment_id, subscription_id, &status, amount_cents, now)
}

/// Applies an approved renewal payment: full quota, usage reset, next cycle.
/// Idempotent per `payment_id`. Must run inside the caller's transaction so
/// the payment claim and the reset commit together.
pub fn renew_cycle(
    conn: &Connection,
    subscription_id: &str,
    payment_id: &str,
    amount_cents: i64,
    now: &NaiveDateTime,
) -> Result<RenewalOutcome, QuotaError> {
    let sub = queries::get_subscription(conn, subscription_id)?
        .ok_or_else(|| QuotaError::NotFound(subscription_id.to_string()))?;

    let claimed = advance_payment_status(
        conn,
        subscription_id,
        payment_id,
        PaymentStatus::Approved,
        amount_cents,
        now,
    )?;
    if !claimed {
        return Ok(RenewalOutcome::AlreadyProcessed);
    }

    if sub.status == SubscriptionStatus::Cancelled {
        return Ok(RenewalOutcome::Skipped(sub.status));
    }

    let plan = queries::get_plan(conn, &sub.plan_id)?
        .ok_or_else(|| anyhow::anyhow!("plan {} missing for subscription {}", sub.plan_id, sub.id))?;

    let current = match (sub.status, sub.cycle_start, sub.cycle_end) {
        (SubscriptionStatus::Pending, _, _) => None,
        (_, Some(start), Some(end)) => Some((start, end)),
        _ => None,
    };
    let (cycle_start, cycle_end) = plan.next_cycle(current, *now);

    queries::reset_cycle(
        conn,
        subscription_id,
        plan.washes_per_cycle,
        &cycle_start,
        &cycle_end,
        now,
    )?;

    if sub.status == SubscriptionStatus::Pending {
        tracing::info!(subscription_id, payment_id, %cycle_end, "subscription activated");
        Ok(RenewalOutcome::Activated { cycle_end })
    } else {
        tracing::info!(subscription_id, payment_id, %cycle_end, "subscription renewed");
        Ok(RenewalOutcome::Renewed { cycle_end })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::Subscription;
    use chrono::Utc;

    fn setup() -> Connection {
        db::init_db(":memory:").unwrap()
    }

    fn now() -> NaiveDateTime {
        Utc::now().naive_utc()
    }

    fn insert_sub(conn: &Connection, id: &str, status: SubscriptionStatus, remaining: i64, used: i64) {
        let sub = Subscription {
            id: id.to_string(),
            customer_name: "Ana".to_string(),
            customer_email: "ana@example.com".to_string(),
            customer_phone: "+5491100000000".to_string(),
            plan_id: "mensual-4".to_string(),
            status,
            washes_remaining: remaining,
            washes_used_in_cycle: used,
            cycle_start: None,
            cycle_end: None,
            created_at: now(),
            updated_at: now(),
        };
        queries::insert_subscription(conn, &sub).unwrap();
    }

    #[test]
    fn test_consume_decrements_and_counts_usage() {
        let conn = setup();
        insert_sub(&conn, "s1", SubscriptionStatus::Active, 2, 2);

        let snapshot = consume_wash(&conn, "s1", &now()).unwrap();
        assert_eq!(snapshot.washes_remaining, 1);
        assert_eq!(snapshot.washes_used_in_cycle, 3);
    }

    #[test]
    fn test_consume_never_goes_negative() {
        let conn = setup();
        insert_sub(&conn, "s1", SubscriptionStatus::Active, 1, 3);

        consume_wash(&conn, "s1", &now()).unwrap();
        let err = consume_wash(&conn, "s1", &now()).unwrap_err();
        assert!(matches!(err, QuotaError::Exhausted));

        let sub = queries::get_subscription(&conn, "s1").unwrap().unwrap();
        assert_eq!(sub.washes_remaining, 0);
        assert_eq!(sub.washes_used_in_cycle, 4);
    }

    #[test]
    fn test_consume_rejects_paused_and_unknown() {
        let conn = setup();
        insert_sub(&conn, "s1", SubscriptionStatus::Paused, 3, 1);

        let err = consume_wash(&conn, "s1", &now()).unwrap_err();
        assert!(matches!(err, QuotaError::Inactive(SubscriptionStatus::Paused)));

        let err = consume_wash(&conn, "nope", &now()).unwrap_err();
        assert!(matches!(err, QuotaError::NotFound(_)));
    }

    #[test]
    fn test_restore_is_bounded_by_plan() {
        let conn = setup();
        insert_sub(&conn, "s1", SubscriptionStatus::Active, 3, 1);

        let snapshot = restore_wash(&conn, "s1", &now()).unwrap().unwrap();
        assert_eq!(snapshot.washes_remaining, 4);
        assert_eq!(snapshot.washes_used_in_cycle, 0);

        // Already at the mensual-4 quota
        let snapshot = restore_wash(&conn, "s1", &now()).unwrap().unwrap();
        assert_eq!(snapshot.washes_remaining, 4);
        assert_eq!(snapshot.washes_used_in_cycle, 0);
    }

    #[test]
    fn test_renew_activates_pending_once() {
        let conn = setup();
        insert_sub(&conn, "s1", SubscriptionStatus::Pending, 0, 0);

        let outcome = renew_cycle(&conn, "s1", "P1", 6_000_000, &now()).unwrap();
        assert!(matches!(outcome, RenewalOutcome::Activated { .. }));

        let sub = queries::get_subscription(&conn, "s1").unwrap().unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.washes_remaining, 4);
        assert!(sub.cycle_start.is_some());

        consume_wash(&conn, "s1", &now()).unwrap();
        let outcome = renew_cycle(&conn, "s1", "P1", 6_000_000, &now()).unwrap();
        assert_eq!(outcome, RenewalOutcome::AlreadyProcessed);

        let sub = queries::get_subscription(&conn, "s1").unwrap().unwrap();
        assert_eq!(sub.washes_remaining, 3);
    }

    #[test]
    fn test_renew_advances_cycle() {
        let conn = setup();
        insert_sub(&conn, "s1", SubscriptionStatus::Pending, 0, 0);
        renew_cycle(&conn, "s1", "P1", 6_000_000, &now()).unwrap();
        let first = queries::get_subscription(&conn, "s1").unwrap().unwrap();

        consume_wash(&conn, "s1", &now()).unwrap();
        consume_wash(&conn, "s1", &now()).unwrap();

        let outcome = renew_cycle(&conn, "s1", "P2", 6_000_000, &now()).unwrap();
        assert!(matches!(outcome, RenewalOutcome::Renewed { .. }));

        let renewed = queries::get_subscription(&conn, "s1").unwrap().unwrap();
        assert_eq!(renewed.washes_remaining, 4);
        assert_eq!(renewed.washes_used_in_cycle, 0);
        assert_eq!(renewed.cycle_start, first.cycle_end);
        assert!(renewed.cycle_end > first.cycle_end);
    }

    #[test]
    fn test_renew_skips_cancelled() {
        let conn = setup();
        insert_sub(&conn, "s1", SubscriptionStatus::Cancelled, 0, 0);

        let outcome = renew_cycle(&conn, "s1", "P1", 6_000_000, &now()).unwrap();
        assert_eq!(outcome, RenewalOutcome::Skipped(SubscriptionStatus::Cancelled));
        let sub = queries::get_subscription(&conn, "s1").unwrap().unwrap();
        assert_eq!(sub.washes_remaining, 0);
    }

    #[test]
    fn test_late_pending_does_not_downgrade_approved() {
        let conn = setup();
        insert_sub(&conn, "s1", SubscriptionStatus::Pending, 0, 0);

        assert!(advance_payment_status(&conn, "s1", "P1", PaymentStatus::Approved, 100, &now()).unwrap());
        assert!(!advance_payment_status(&conn, "s1", "P1", PaymentStatus::InProcess, 100, &now()).unwrap());
        assert_eq!(
            queries::get_subscription_payment_status(&conn, "P1").unwrap(),
            Some(PaymentStatus::Approved)
        );
        assert!(advance_payment_status(&conn, "s1", "P1", PaymentStatus::Refunded, 100, &now()).unwrap());
    }

    #[test]
    fn test_payment_status_follows_precedence() {
        let conn = setup();
        insert_sub(&conn, "s1", SubscriptionStatus::Active, 2, 0);
        insert_sub(&conn, "s2", SubscriptionStatus::Active, 2, 0);

        assert!(advance_payment_status(&conn, "s1", "P7", PaymentStatus::Rejected, 100, &now()).unwrap());
        assert!(!advance_payment_status(&conn, "s1", "P7", PaymentStatus::InProcess, 100, &now()).unwrap());
        assert!(!advance_payment_status(&conn, "s1", "P7", PaymentStatus::Rejected, 100, &now()).unwrap());
        assert_eq!(
            queries::get_subscription_payment_status(&conn, "P7").unwrap(),
            Some(PaymentStatus::Rejected)
        );

        // Same payment id reported against another subscription is not taken over
        assert!(!advance_payment_status(&conn, "s2", "P7", PaymentStatus::Approved, 100, &now()).unwrap());
        assert!(advance_payment_status(&conn, "s1", "P7", PaymentStatus::Approved, 100, &now()).unwrap());
        assert_eq!(
            queries::get_subscription_payment_status(&conn, "P7").unwrap(),
            Some(PaymentStatus::Approved)
        );
    }
}
