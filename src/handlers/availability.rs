use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::db;
use crate::errors::AppError;
use crate::services::availability::{self, DaySlots};
use crate::state::AppState;

// GET /availability?from=&to= or ?month=
#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub month: Option<String>,
}

pub async fn get_availability(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (from, to) = availability::resolve_range(
        query.from.as_deref(),
        query.to.as_deref(),
        query.month.as_deref(),
    )
    .map_err(AppError::Validation)?;

    let today = state.config.business_today();
    let days = {
        let conn = db::lock(&state.db)?;
        availability::availability_for_range(&conn, from, to, today)?
    };

    Ok(Json(serde_json::json!({ "availability": days })))
}

// GET /slots?date=
#[derive(Deserialize)]
pub struct SlotsQuery {
    pub date: String,
}

pub async fn get_slots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<DaySlots>, AppError> {
    let date = availability::parse_date(&query.date).map_err(AppError::Validation)?;

    let today = state.config.business_today();
    let slots = {
        let conn = db::lock(&state.db)?;
        availability::slots_on(&conn, date, today)?
    };

    Ok(Json(slots))
}
