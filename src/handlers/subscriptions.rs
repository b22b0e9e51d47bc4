use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::models::{
    CheckoutRequest, CheckoutSession, EntityRef, Subscription, SubscriptionPlan, SubscriptionSignup,
    SubscriptionStatus,
};
use crate::services::{events, subscriptions};
use crate::state::AppState;

#[derive(Serialize)]
pub struct SubscriptionView {
    #[serde(flatten)]
    subscription: Subscription,
    washes_per_cycle: i64,
}

fn view(subscription: Subscription, plan: Option<&SubscriptionPlan>) -> SubscriptionView {
    SubscriptionView {
        washes_per_cycle: plan.map(|p| p.washes_per_cycle).unwrap_or(0),
        subscription,
    }
}

// POST /subscriptions
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SubscriptionSignup>, JsonRejection>,
) -> Result<(StatusCode, Json<SubscriptionView>), AppError> {
    let Json(form) = payload?;
    let now = state.config.business_now();
    let (sub, plan, event) = {
        let conn = db::lock(&state.db)?;
        let (sub, event) = subscriptions::signup(&conn, &form, now)?;
        let plan = queries::get_plan(&conn, &sub.plan_id)?;
        (sub, plan, event)
    };

    events::emit(&state, event);
    Ok((StatusCode::CREATED, Json(view(sub, plan.as_ref()))))
}

// GET /subscriptions/:id
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SubscriptionView>, AppError> {
    let (sub, plan) = {
        let conn = db::lock(&state.db)?;
        let sub = queries::get_subscription(&conn, &id)?
            .ok_or_else(|| AppError::NotFound(format!("subscription {id}")))?;
        let plan = queries::get_plan(&conn, &sub.plan_id)?;
        (sub, plan)
    };
    Ok(Json(view(sub, plan.as_ref())))
}

// POST /subscriptions/:id/checkout
pub async fn checkout_subscription(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CheckoutSession>, AppError> {
    let (sub, plan) = {
        let conn = db::lock(&state.db)?;
        let sub = queries::get_subscription(&conn, &id)?
            .ok_or_else(|| AppError::NotFound(format!("subscription {id}")))?;
        let plan = queries::get_plan(&conn, &sub.plan_id)?
            .ok_or_else(|| AppError::Internal(format!("plan {} missing", sub.plan_id)))?;
        (sub, plan)
    };

    if sub.status == SubscriptionStatus::Cancelled {
        return Err(AppError::InvalidTransition(format!("subscription {id} is cancelled")));
    }

    let request = CheckoutRequest {
        entity: EntityRef::subscription(&sub.id),
        title: format!("Suscripción {}", plan.name),
        amount_cents: plan.price_cents,
        payer_email: sub.customer_email.clone(),
        notification_url: state.config.webhook_url(),
    };

    let session = state.payments.create_checkout(&request).await.map_err(|e| {
        tracing::error!(error = %e, subscription_id = %id, "checkout creation failed");
        AppError::ProviderUnavailable(e.to_string())
    })?;

    tracing::info!(subscription_id = %id, preference_id = %session.preference_id, "checkout created");
    Ok(Json(session))
}
