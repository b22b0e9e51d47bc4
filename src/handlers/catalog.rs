use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::models::Catalog;
use crate::state::AppState;

// GET /catalog
pub async fn get_catalog(State(state): State<Arc<AppState>>) -> Result<Json<Catalog>, AppError> {
    let catalog = {
        let conn = db::lock(&state.db)?;
        queries::get_catalog(&conn)?
    };
    Ok(Json(catalog))
}
