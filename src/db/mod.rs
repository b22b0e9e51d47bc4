pub mod migrations;
pub mod queries;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context;
use rusqlite::Connection;

use crate::errors::AppError;

pub type Db = Arc<Mutex<Connection>>;

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;
    conn.busy_timeout(Duration::from_secs(5))
        .context("failed to set busy timeout")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

pub fn lock(db: &Db) -> Result<MutexGuard<'_, Connection>, AppError> {
    db.lock()
        .map_err(|_| AppError::Internal("database lock poisoned".to_string()))
}

/// Runs `f` against the shared connection on the blocking pool, bounded by
/// `timeout`.
///
/// A timeout does not cancel the work: the closure may still commit after the
/// caller has given up, so `AppError::Timeout` means "outcome unknown".
pub async fn run_bounded<T, F>(db: &Db, timeout: Duration, f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
{
    let db = Arc::clone(db);
    let task = tokio::task::spawn_blocking(move || {
        let mut conn = lock(&db)?;
        f(&mut conn)
    });

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(AppError::Internal(format!("storage task failed: {join_err}"))),
        Err(_) => Err(AppError::Timeout),
    }
}
