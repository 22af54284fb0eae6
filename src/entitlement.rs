//! Premium/usage state machine for a loaded [`User`].
//!
//! The quota check and the usage increment are deliberately two separate
//! statements, not one atomic check-and-increment. Concurrent requests from
//! the same user can both pass `is_within_quota` before either increments,
//! so the counter is a soft limit that may briefly exceed
//! [`FREE_USAGE_LIMIT`] under a race. Hardening this (e.g.
//! `UPDATE ... WHERE free_usage_count < 30`) would change user-visible
//! behavior and is left as a deliberate non-change.

use chrono::{Datelike, Duration, Utc};
use rand::Rng;
use sqlx::{Pool, Sqlite};
use tracing::{debug, info, instrument};

use crate::auth::User;
use crate::error::{AppError, FREE_USAGE_LIMIT};

/// Premium entitlements granted through an activation code last one year.
const PREMIUM_GRANT_DAYS: i64 = 365;

const CODE_LENGTH: usize = 12;
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Returns whether the user may invoke the gated AI action right now.
///
/// Premium users always pass. Free users get a counter reset when the
/// calendar month (or year) has changed since `last_reset_date`; the reset
/// call itself counts as within quota.
#[instrument(skip_all, fields(user_id = user.id))]
pub async fn is_within_quota(pool: &Pool<Sqlite>, user: &mut User) -> Result<bool, AppError> {
    if user.is_premium {
        debug!("Premium user - unlimited access");
        return Ok(true);
    }

    // A missing reset date counts as reset-due so the account can never
    // wedge at the limit.
    let today = Utc::now().date_naive();
    let reset_due = match user.last_reset_date {
        Some(last_reset) => {
            today.month() != last_reset.month() || today.year() != last_reset.year()
        }
        None => true,
    };
    if reset_due {
        info!("Monthly usage reset");
        reset_usage_count(pool, user).await?;
        return Ok(true);
    }

    let allowed = user.free_usage_count < FREE_USAGE_LIMIT;
    debug!(
        usage = user.free_usage_count,
        limit = FREE_USAGE_LIMIT,
        allowed,
        "Free user limit check"
    );
    Ok(allowed)
}

/// Persists one more usage. Counted for premium users too, for analytics;
/// it never gates them. Assumes `is_within_quota` already ran this request.
#[instrument(skip_all, fields(user_id = user.id))]
pub async fn record_usage(pool: &Pool<Sqlite>, user: &mut User) -> Result<(), AppError> {
    sqlx::query("UPDATE users SET free_usage_count = free_usage_count + 1 WHERE id = ?")
        .bind(user.id)
        .execute(pool)
        .await?;

    user.free_usage_count += 1;
    debug!(usage = user.free_usage_count, "Usage recorded");
    Ok(())
}

#[instrument(skip_all, fields(user_id = user.id))]
pub async fn reset_usage_count(pool: &Pool<Sqlite>, user: &mut User) -> Result<(), AppError> {
    let today = Utc::now().date_naive();

    sqlx::query("UPDATE users SET free_usage_count = 0, last_reset_date = ? WHERE id = ?")
        .bind(today)
        .bind(user.id)
        .execute(pool)
        .await?;

    user.free_usage_count = 0;
    user.last_reset_date = Some(today);
    Ok(())
}

/// Demotes a premium user whose expiry is in the past. Runs on every user
/// materialization so no request acts on premium status staler than its own
/// load. An expiry of NULL is treated as non-expiring.
#[instrument(skip_all, fields(user_id = user.id))]
pub async fn refresh_expiry(pool: &Pool<Sqlite>, user: &mut User) -> Result<(), AppError> {
    if user.is_premium {
        if let Some(expires_at) = user.premium_expires_at {
            if Utc::now() > expires_at {
                info!(email = %user.email, "Premium expired, demoting to free");
                revoke_premium(pool, user).await?;
            }
        }
    }
    Ok(())
}

/// Redeems an activation code bound to this user's email.
///
/// Marking the code used and granting premium commit in one transaction:
/// both happen or neither does. A missing, used, expired, or wrongly-bound
/// code returns `Ok(false)` - an expected outcome, not an error.
#[instrument(skip_all, fields(user_id = user.id))]
pub async fn redeem_activation_code(
    pool: &Pool<Sqlite>,
    user: &mut User,
    code: &str,
) -> Result<bool, AppError> {
    let now = Utc::now().naive_utc();

    let mut tx = pool.begin().await?;

    let code_row: Option<(i64,)> = sqlx::query_as(
        "SELECT id FROM activation_codes
         WHERE code = ? AND user_email = ? AND is_used = 0 AND expires_at > ?",
    )
    .bind(code)
    .bind(&user.email)
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((code_id,)) = code_row else {
        return Ok(false);
    };

    sqlx::query("UPDATE activation_codes SET is_used = 1 WHERE id = ?")
        .bind(code_id)
        .execute(&mut *tx)
        .await?;

    let premium_expires = Utc::now() + Duration::days(PREMIUM_GRANT_DAYS);
    sqlx::query("UPDATE users SET is_premium = 1, premium_expires_at = ? WHERE id = ?")
        .bind(premium_expires.naive_utc())
        .bind(user.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    user.is_premium = true;
    user.premium_expires_at = Some(premium_expires);
    info!(email = %user.email, "Premium activated");
    Ok(true)
}

/// Unconditionally clears premium state. Idempotent.
#[instrument(skip_all, fields(user_id = user.id))]
pub async fn revoke_premium(pool: &Pool<Sqlite>, user: &mut User) -> Result<(), AppError> {
    sqlx::query("UPDATE users SET is_premium = 0, premium_expires_at = NULL WHERE id = ?")
        .bind(user.id)
        .execute(pool)
        .await?;

    user.is_premium = false;
    user.premium_expires_at = None;
    Ok(())
}

/// Admin operation: mints a single-use activation code bound to an email.
/// The email is not validated against existing users; a code may be created
/// before its account exists and redeemed by whichever account registers
/// that email.
#[instrument(skip(pool))]
pub async fn generate_activation_code(
    pool: &Pool<Sqlite>,
    user_email: &str,
    expires_days: i64,
) -> Result<(String, chrono::DateTime<Utc>), AppError> {
    // The thread-local RNG must not live across an await point.
    let code: String = {
        let mut rng = rand::rng();
        (0..CODE_LENGTH)
            .map(|_| CODE_CHARSET[rng.random_range(0..CODE_CHARSET.len())] as char)
            .collect()
    };

    let expires_at = Utc::now() + Duration::days(expires_days);

    sqlx::query("INSERT INTO activation_codes (code, user_email, expires_at) VALUES (?, ?, ?)")
        .bind(&code)
        .bind(user_email)
        .bind(expires_at.naive_utc())
        .execute(pool)
        .await?;

    info!(user_email = %user_email, "Activation code generated");
    Ok((code, expires_at))
}

#[derive(Debug, serde::Serialize)]
pub struct UsageStatistics {
    pub total_users: i64,
    pub premium_users: i64,
    pub free_users: i64,
    pub total_usage: i64,
    pub average_usage: f64,
}

#[derive(Debug, serde::Serialize)]
pub struct UserUsageRow {
    pub email: String,
    pub is_premium: bool,
    pub free_usage_count: i64,
    pub premium_expires_at: Option<chrono::DateTime<Utc>>,
    pub last_reset_date: Option<chrono::NaiveDate>,
    pub created_at: chrono::DateTime<Utc>,
}

/// Admin operation: per-user usage rows (heaviest consumers first) plus the
/// aggregates the admin panel displays.
#[instrument(skip(pool))]
pub async fn usage_overview(
    pool: &Pool<Sqlite>,
) -> Result<(UsageStatistics, Vec<UserUsageRow>), AppError> {
    let rows = sqlx::query_as::<_, crate::auth::DbUser>(
        "SELECT id, email, is_premium, premium_expires_at, free_usage_count, last_reset_date, created_at
         FROM users
         ORDER BY free_usage_count DESC, created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    let users: Vec<UserUsageRow> = rows
        .into_iter()
        .map(User::from)
        .map(|u| UserUsageRow {
            email: u.email,
            is_premium: u.is_premium,
            free_usage_count: u.free_usage_count,
            premium_expires_at: u.premium_expires_at,
            last_reset_date: u.last_reset_date,
            created_at: u.created_at,
        })
        .collect();

    let total_users = users.len() as i64;
    let premium_users = users.iter().filter(|u| u.is_premium).count() as i64;
    let total_usage: i64 = users.iter().map(|u| u.free_usage_count).sum();
    let average_usage = if total_users > 0 {
        (total_usage as f64 / total_users as f64 * 10.0).round() / 10.0
    } else {
        0.0
    };

    Ok((
        UsageStatistics {
            total_users,
            premium_users,
            free_users: total_users - premium_users,
            total_usage,
            average_usage,
        },
        users,
    ))
}
