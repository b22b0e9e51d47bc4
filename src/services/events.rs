use std::sync::Arc;

use crate::db::queries;
use crate::models::PendingEvent;
use crate::state::AppState;

/// Persists and broadcasts a domain event. Failures are logged only: the
/// state change that produced the event has already committed.
///
/// Must not be called while holding the database lock.
pub fn emit(state: &Arc<AppState>, event: PendingEvent) {
    let stored = match state.db.lock() {
        Ok(db) => queries::insert_domain_event(&db, event.kind, &event.entity_id, &event.payload),
        Err(_) => Err(anyhow::anyhow!("database lock poisoned")),
    };

    match stored {
        Ok(stored) => {
            tracing::debug!(event_id = stored.id, kind = event.kind, entity_id = %event.entity_id, "domain event recorded");
            // No subscribers is fine
            let _ = state.events_tx.send(stored);
        }
        Err(e) => {
            tracing::error!(error = %e, kind = event.kind, entity_id = %event.entity_id, "failed to record domain event");
        }
    }
}

pub fn emit_all(state: &Arc<AppState>, events: Vec<PendingEvent>) {
    for event in events {
        emit(state, event);
    }
}
