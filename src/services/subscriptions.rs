use chrono::NaiveDateTime;
use rusqlite::Connection;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::event::{SUBSCRIPTION_ACTIVATED, SUBSCRIPTION_CREATED, SUBSCRIPTION_STATUS_CHANGED};
use crate::models::{PendingEvent, Subscription, SubscriptionSignup, SubscriptionStatus};

/// Lifecycle actions available to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Pause,
    Resume,
    Cancel,
}

impl LifecycleAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pause" => Some(LifecycleAction::Pause),
            "resume" => Some(LifecycleAction::Resume),
            "cancel" => Some(LifecycleAction::Cancel),
            _ => None,
        }
    }

    fn transition(&self) -> (&'static [SubscriptionStatus], SubscriptionStatus) {
        match self {
            LifecycleAction::Pause => (&[SubscriptionStatus::Active], SubscriptionStatus::Paused),
            LifecycleAction::Resume => (&[SubscriptionStatus::Paused], SubscriptionStatus::Active),
            LifecycleAction::Cancel => (
                &[
                    SubscriptionStatus::Pending,
                    SubscriptionStatus::Active,
                    SubscriptionStatus::Paused,
                ],
                SubscriptionStatus::Cancelled,
            ),
        }
    }
}

/// Creates a pending subscription with no credit. It becomes active once its
/// first payment is approved, or when an operator activates it.
pub fn signup(
    conn: &Connection,
    signup: &SubscriptionSignup,
    now: NaiveDateTime,
) -> Result<(Subscription, PendingEvent), AppError> {
    let name = signup.customer_name.trim();
    let email = signup.customer_email.trim().to_lowercase();
    let phone = signup.customer_phone.trim();
    if name.is_empty() || phone.is_empty() {
        return Err(AppError::Validation(
            "customer_name and customer_phone are required".to_string(),
        ));
    }
    if !email.contains('@') {
        return Err(AppError::Validation(format!("invalid email: {email}")));
    }

    let plan = queries::get_plan(conn, &signup.plan_id)?
        .ok_or_else(|| AppError::Validation(format!("unknown plan: {}", signup.plan_id)))?;

    let sub = Subscription {
        id: uuid::Uuid::new_v4().to_string(),
        customer_name: name.to_string(),
        customer_email: email,
        customer_phone: phone.to_string(),
        plan_id: plan.id.clone(),
        status: SubscriptionStatus::Pending,
        washes_remaining: 0,
        washes_used_in_cycle: 0,
        cycle_start: None,
        cycle_end: None,
        created_at: now,
        updated_at: now,
    };
    queries::insert_subscription(conn, &sub)?;

    tracing::info!(subscription_id = %sub.id, plan_id = %plan.id, "subscription created");
    let event = PendingEvent::new(
        SUBSCRIPTION_CREATED,
        &sub.id,
        serde_json::json!({ "plan_id": plan.id, "customer_email": sub.customer_email }),
    );
    Ok((sub, event))
}

/// Manual activation of a pending subscription, for payments settled outside
/// the provider. Grants the full quota and starts the first cycle now.
pub fn activate(
    conn: &mut Connection,
    id: &str,
    now: NaiveDateTime,
) -> Result<(Subscription, PendingEvent), AppError> {
    let tx = conn.transaction()?;
    let sub = queries::get_subscription(&tx, id)?
        .ok_or_else(|| AppError::NotFound(format!("subscription {id}")))?;
    if sub.status != SubscriptionStatus::Pending {
        return Err(AppError::InvalidTransition(format!(
            "subscription {id} is {}",
            sub.status.as_str()
        )));
    }
    let plan = queries::get_plan(&tx, &sub.plan_id)?
        .ok_or_else(|| anyhow::anyhow!("plan {} missing for subscription {id}", sub.plan_id))?;

    let (cycle_start, cycle_end) = plan.next_cycle(None, now);
    queries::reset_cycle(&tx, id, plan.washes_per_cycle, &cycle_start, &cycle_end, &now)?;
    let updated = queries::get_subscription(&tx, id)?
        .ok_or_else(|| AppError::NotFound(format!("subscription {id}")))?;
    tx.commit()?;

    tracing::info!(subscription_id = id, %cycle_end, "subscription activated manually");
    let event = PendingEvent::new(
        SUBSCRIPTION_ACTIVATED,
        id,
        serde_json::json!({ "source": "admin", "cycle_end": queries::fmt_ts(&cycle_end) }),
    );
    Ok((updated, event))
}

pub fn apply_action(
    conn: &Connection,
    id: &str,
    action: LifecycleAction,
    now: NaiveDateTime,
) -> Result<(Subscription, PendingEvent), AppError> {
    let sub = queries::get_subscription(conn, id)?
        .ok_or_else(|| AppError::NotFound(format!("subscription {id}")))?;

    let (from, to) = action.transition();
    if !queries::transition_subscription(conn, id, from, to, &now)? {
        return Err(AppError::InvalidTransition(format!(
            "cannot move subscription {id} from {} to {}",
            sub.status.as_str(),
            to.as_str()
        )));
    }

    tracing::info!(subscription_id = id, from = sub.status.as_str(), to = to.as_str(), "subscription status changed");
    let event = PendingEvent::new(
        SUBSCRIPTION_STATUS_CHANGED,
        id,
        serde_json::json!({ "from": sub.status.as_str(), "to": to.as_str() }),
    );
    let updated = Subscription {
        status: to,
        updated_at: now,
        ..sub
    };
    Ok((updated, event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::services::quota::{self, QuotaError};
    use chrono::Utc;

    fn now() -> NaiveDateTime {
        Utc::now().naive_utc()
    }

    fn form(plan_id: &str) -> SubscriptionSignup {
        SubscriptionSignup {
            customer_name: "Martín".to_string(),
            customer_email: " Martin@Example.com ".to_string(),
            customer_phone: "+54 9 11 4444 0000".to_string(),
            plan_id: plan_id.to_string(),
        }
    }

    #[test]
    fn test_signup_starts_pending_without_credit() {
        let conn = db::init_db(":memory:").unwrap();
        let (sub, event) = signup(&conn, &form("mensual-2"), now()).unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Pending);
        assert_eq!(sub.washes_remaining, 0);
        assert_eq!(sub.customer_email, "martin@example.com");
        assert_eq!(event.kind, SUBSCRIPTION_CREATED);
        assert!(queries::subscription_exists(&conn, &sub.id).unwrap());
    }

    #[test]
    fn test_signup_rejects_unknown_plan() {
        let conn = db::init_db(":memory:").unwrap();
        let err = signup(&conn, &form("anual-99"), now()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_manual_activation_grants_quota_once() {
        let mut conn = db::init_db(":memory:").unwrap();
        let (sub, _) = signup(&conn, &form("mensual-2"), now()).unwrap();

        let (active, _) = activate(&mut conn, &sub.id, now()).unwrap();
        assert_eq!(active.status, SubscriptionStatus::Active);
        assert_eq!(active.washes_remaining, 2);
        assert!(active.cycle_end > active.cycle_start);

        let err = activate(&mut conn, &sub.id, now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[test]
    fn test_pause_blocks_consumption_until_resumed() {
        let mut conn = db::init_db(":memory:").unwrap();
        let (sub, _) = signup(&conn, &form("mensual-4"), now()).unwrap();
        activate(&mut conn, &sub.id, now()).unwrap();

        let (paused, event) = apply_action(&conn, &sub.id, LifecycleAction::Pause, now()).unwrap();
        assert_eq!(paused.status, SubscriptionStatus::Paused);
        assert_eq!(event.payload["from"], "active");
        assert!(matches!(
            quota::consume_wash(&conn, &sub.id, &now()).unwrap_err(),
            QuotaError::Inactive(SubscriptionStatus::Paused)
        ));

        apply_action(&conn, &sub.id, LifecycleAction::Resume, now()).unwrap();
        assert_eq!(quota::consume_wash(&conn, &sub.id, &now()).unwrap().washes_remaining, 3);
    }

    #[test]
    fn test_guarded_transitions() {
        let conn = db::init_db(":memory:").unwrap();
        let (sub, _) = signup(&conn, &form("mensual-4"), now()).unwrap();

        let err = apply_action(&conn, &sub.id, LifecycleAction::Pause, now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        apply_action(&conn, &sub.id, LifecycleAction::Cancel, now()).unwrap();
        let err = apply_action(&conn, &sub.id, LifecycleAction::Resume, now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
        let err = apply_action(&conn, &sub.id, LifecycleAction::Cancel, now()).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        let err = apply_action(&conn, "missing", LifecycleAction::Cancel, now()).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
