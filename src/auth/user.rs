use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub is_premium: bool,
    pub premium_expires_at: Option<DateTime<Utc>>,
    pub free_usage_count: i64,
    pub last_reset_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: Option<i64>,
    pub email: Option<String>,
    pub is_premium: Option<bool>,
    pub premium_expires_at: Option<NaiveDateTime>,
    pub free_usage_count: Option<i64>,
    pub last_reset_date: Option<NaiveDate>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbUser> for User {
    fn from(user: DbUser) -> Self {
        Self {
            id: user.id.unwrap_or_default(),
            email: user.email.unwrap_or_default(),
            is_premium: user.is_premium.unwrap_or_default(),
            premium_expires_at: user
                .premium_expires_at
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)),
            free_usage_count: user.free_usage_count.unwrap_or_default(),
            last_reset_date: user.last_reset_date,
            created_at: user
                .created_at
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
                .unwrap_or_else(Utc::now),
        }
    }
}
