use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/catalog", get(handlers::catalog::get_catalog))
        .route("/availability", get(handlers::availability::get_availability))
        .route("/slots", get(handlers::availability::get_slots))
        .route("/bookings", post(handlers::bookings::create_booking))
        .route("/bookings/:id", get(handlers::bookings::get_booking))
        .route(
            "/bookings/:id/checkout",
            post(handlers::bookings::checkout_booking),
        )
        .route(
            "/subscriptions",
            post(handlers::subscriptions::create_subscription),
        )
        .route(
            "/subscriptions/:id",
            get(handlers::subscriptions::get_subscription),
        )
        .route(
            "/subscriptions/:id/checkout",
            post(handlers::subscriptions::checkout_subscription),
        )
        .route("/webhooks/payments", post(handlers::webhook::payments_webhook))
        .route("/api/admin/status", get(handlers::admin::get_status))
        .route("/api/admin/bookings", get(handlers::admin::get_bookings))
        .route(
            "/api/admin/bookings/:id/:action",
            post(handlers::admin::booking_action),
        )
        .route(
            "/api/admin/subscriptions",
            get(handlers::admin::get_subscriptions),
        )
        .route(
            "/api/admin/subscriptions/:id/:action",
            post(handlers::admin::subscription_action),
        )
        .route("/api/admin/invoices", get(handlers::admin::get_invoices))
        .route(
            "/api/admin/business-hours",
            get(handlers::admin::get_business_hours).post(handlers::admin::update_business_hours),
        )
        .route("/api/admin/events", get(handlers::admin::events_stream))
        .with_state(state)
}
