use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};

/// One row per user per calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LoginRecord {
    pub id: i64,
    pub user_uid: String,
    pub login_date: Date,
    pub login_at: OffsetDateTime,
    pub continuous_days: i32,
}

#[derive(Debug, Clone, FromRow)]
pub struct LogoutRecord {
    pub id: i64,
    pub user_uid: String,
    pub logout_at: OffsetDateTime,
    pub logout_date: Date,
}
