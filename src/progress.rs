//! Per-goal completion ledger. One row per
//! (user, item, level, goal_index), enforced by upsert rather than
//! read-then-write, last write wins.

use chrono::Utc;
use serde::Deserialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument, warn};

use crate::error::AppError;
use crate::models::{DbProgressRecord, ProgressRecord};

pub const GOAL_LEVELS: [&str; 3] = ["beginner", "intermediate", "advanced"];

#[derive(Deserialize, Clone, Debug)]
pub struct ProgressUpdate {
    pub item_identifier: String,
    pub level: String,
    pub goal_index: i64,
    pub completed: bool,
}

impl ProgressUpdate {
    /// Structural validation, run before any store access. `completed` may
    /// legitimately be false so only the other fields are checked.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.item_identifier.trim().is_empty() {
            return Err(AppError::Validation(
                "item_identifier must not be empty".to_string(),
            ));
        }
        if !GOAL_LEVELS.contains(&self.level.as_str()) {
            return Err(AppError::Validation(format!(
                "level must be one of {:?}, got '{}'",
                GOAL_LEVELS, self.level
            )));
        }
        if self.goal_index < 0 {
            return Err(AppError::Validation(
                "goal_index must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

const UPSERT_SQL: &str = "INSERT INTO progress (user_id, item_identifier, level, goal_index, completed, updated_at)
     VALUES (?, ?, ?, ?, ?, ?)
     ON CONFLICT(user_id, item_identifier, level, goal_index)
     DO UPDATE SET completed = excluded.completed, updated_at = excluded.updated_at";

#[instrument(skip(pool, update), fields(user_id, item = %update.item_identifier))]
pub async fn upsert_progress(
    pool: &Pool<Sqlite>,
    user_id: i64,
    update: &ProgressUpdate,
) -> Result<(), AppError> {
    update.validate()?;

    let now = Utc::now().naive_utc();
    sqlx::query(UPSERT_SQL)
        .bind(user_id)
        .bind(&update.item_identifier)
        .bind(&update.level)
        .bind(update.goal_index)
        .bind(update.completed)
        .bind(now)
        .execute(pool)
        .await?;

    info!("Progress updated");
    Ok(())
}

/// Applies many updates for one user. Structurally invalid entries are
/// logged and skipped individually; the valid subset commits in a single
/// transaction sharing one timestamp, so it lands all-or-nothing. Returns
/// the number of entries applied.
#[instrument(skip(pool, updates), fields(user_id, batch_size = updates.len()))]
pub async fn batch_upsert_progress(
    pool: &Pool<Sqlite>,
    user_id: i64,
    updates: &[ProgressUpdate],
) -> Result<usize, AppError> {
    let mut valid = Vec::with_capacity(updates.len());
    for update in updates {
        match update.validate() {
            Ok(()) => valid.push(update),
            Err(err) => {
                warn!(item = %update.item_identifier, error = %err, "Skipping invalid progress entry");
            }
        }
    }

    if valid.is_empty() {
        return Ok(0);
    }

    let now = Utc::now().naive_utc();
    let mut tx = pool.begin().await?;

    for update in &valid {
        sqlx::query(UPSERT_SQL)
            .bind(user_id)
            .bind(&update.item_identifier)
            .bind(&update.level)
            .bind(update.goal_index)
            .bind(update.completed)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    info!(applied = valid.len(), "Batch progress update committed");
    Ok(valid.len())
}

#[instrument(skip(pool))]
pub async fn get_progress_for_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<ProgressRecord>, AppError> {
    let rows = sqlx::query_as::<_, DbProgressRecord>(
        "SELECT id, user_id, item_identifier, level, goal_index, completed, updated_at
         FROM progress
         WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ProgressRecord::from).collect())
}
