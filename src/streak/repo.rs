use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::{Date, OffsetDateTime};

use crate::streak::repo_types::{LoginRecord, LogoutRecord};
use crate::users::repo::UserStore;
use crate::users::repo_types::UserPatch;

#[async_trait]
pub trait LoginStore: Send + Sync {
    /// Newest record by login date.
    async fn latest(&self, user_uid: &str) -> anyhow::Result<Option<LoginRecord>>;
    /// Appends the day's record and bumps the user's last-activity time in
    /// one transaction. Returns `false` if a record for that day already
    /// existed, in which case nothing is written.
    async fn record_login(
        &self,
        user_id: i64,
        user_uid: &str,
        login_date: Date,
        login_at: OffsetDateTime,
        continuous_days: u32,
    ) -> anyhow::Result<bool>;
    async fn recent_dates(&self, user_uid: &str, limit: usize) -> anyhow::Result<Vec<Date>>;
    /// Writes a logout record and bumps last-activity in one transaction.
    async fn record_logout(
        &self,
        user_id: i64,
        user_uid: &str,
        logout_at: OffsetDateTime,
        logout_date: Date,
    ) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct PgLoginStore {
    db: PgPool,
}

impl PgLoginStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LoginStore for PgLoginStore {
    async fn latest(&self, user_uid: &str) -> anyhow::Result<Option<LoginRecord>> {
        let record = sqlx::query_as::<_, LoginRecord>(
            r#"
            SELECT id, user_uid, login_date, login_at, continuous_days
              FROM login_records
             WHERE user_uid = $1
             ORDER BY login_date DESC
             LIMIT 1
            "#,
        )
        .bind(user_uid)
        .fetch_optional(&self.db)
        .await
        .context("latest login record")?;
        Ok(record)
    }

    async fn record_login(
        &self,
        user_id: i64,
        user_uid: &str,
        login_date: Date,
        login_at: OffsetDateTime,
        continuous_days: u32,
    ) -> anyhow::Result<bool> {
        let mut tx = self.db.begin().await.context("begin login tx")?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO login_records (user_uid, login_date, login_at, continuous_days)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_uid, login_date) DO NOTHING
            "#,
        )
        .bind(user_uid)
        .bind(login_date)
        .bind(login_at)
        .bind(continuous_days as i32)
        .execute(&mut *tx)
        .await
        .context("insert login record")?
        .rows_affected()
            == 1;

        if !inserted {
            tx.rollback().await.context("rollback login tx")?;
            return Ok(false);
        }

        sqlx::query("UPDATE users SET last_active_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(login_at)
            .execute(&mut *tx)
            .await
            .context("touch last_active_at")?;

        tx.commit().await.context("commit login tx")?;
        Ok(true)
    }

    async fn recent_dates(&self, user_uid: &str, limit: usize) -> anyhow::Result<Vec<Date>> {
        let rows: Vec<(Date,)> = sqlx::query_as(
            r#"
            SELECT login_date
              FROM login_records
             WHERE user_uid = $1
             ORDER BY login_date DESC
             LIMIT $2
            "#,
        )
        .bind(user_uid)
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await
        .context("recent login dates")?;
        Ok(rows.into_iter().map(|(d,)| d).collect())
    }

    async fn record_logout(
        &self,
        user_id: i64,
        user_uid: &str,
        logout_at: OffsetDateTime,
        logout_date: Date,
    ) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await.context("begin logout tx")?;
        sqlx::query(
            r#"
            INSERT INTO logout_records (user_uid, logout_at, logout_date)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_uid)
        .bind(logout_at)
        .bind(logout_date)
        .execute(&mut *tx)
        .await
        .context("insert logout record")?;

        sqlx::query("UPDATE users SET last_active_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(logout_at)
            .execute(&mut *tx)
            .await
            .context("touch last_active_at")?;

        tx.commit().await.context("commit logout tx")?;
        Ok(())
    }
}

/// In-process store used by `AppState::fake()` and unit tests. Shares the
/// user store so last-activity updates land where the user rows live.
pub struct MemoryLoginStore {
    users: Arc<dyn UserStore>,
    logins: Mutex<Vec<LoginRecord>>,
    logouts: Mutex<Vec<LogoutRecord>>,
}

impl MemoryLoginStore {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self {
            users,
            logins: Mutex::new(Vec::new()),
            logouts: Mutex::new(Vec::new()),
        }
    }
}

fn touch(at: OffsetDateTime) -> UserPatch {
    UserPatch {
        last_active_at: Some(at),
        ..UserPatch::default()
    }
}

#[async_trait]
impl LoginStore for MemoryLoginStore {
    async fn latest(&self, user_uid: &str) -> anyhow::Result<Option<LoginRecord>> {
        let rows = self.logins.lock().map_err(|_| anyhow::anyhow!("login store poisoned"))?;
        Ok(rows
            .iter()
            .filter(|r| r.user_uid == user_uid)
            .max_by_key(|r| r.login_date)
            .cloned())
    }

    async fn record_login(
        &self,
        user_id: i64,
        user_uid: &str,
        login_date: Date,
        login_at: OffsetDateTime,
        continuous_days: u32,
    ) -> anyhow::Result<bool> {
        {
            let mut rows = self.logins.lock().map_err(|_| anyhow::anyhow!("login store poisoned"))?;
            if rows
                .iter()
                .any(|r| r.user_uid == user_uid && r.login_date == login_date)
            {
                return Ok(false);
            }
            let id = rows.len() as i64 + 1;
            rows.push(LoginRecord {
                id,
                user_uid: user_uid.to_string(),
                login_date,
                login_at,
                continuous_days: continuous_days as i32,
            });
        }
        self.users.update_fields(user_id, &touch(login_at)).await?;
        Ok(true)
    }

    async fn recent_dates(&self, user_uid: &str, limit: usize) -> anyhow::Result<Vec<Date>> {
        let rows = self.logins.lock().map_err(|_| anyhow::anyhow!("login store poisoned"))?;
        let mut dates: Vec<Date> = rows
            .iter()
            .filter(|r| r.user_uid == user_uid)
            .map(|r| r.login_date)
            .collect();
        dates.sort_unstable_by(|a, b| b.cmp(a));
        dates.truncate(limit);
        Ok(dates)
    }

    async fn record_logout(
        &self,
        user_id: i64,
        user_uid: &str,
        logout_at: OffsetDateTime,
        logout_date: Date,
    ) -> anyhow::Result<()> {
        {
            let mut rows = self.logouts.lock().map_err(|_| anyhow::anyhow!("login store poisoned"))?;
            let id = rows.len() as i64 + 1;
            rows.push(LogoutRecord {
                id,
                user_uid: user_uid.to_string(),
                logout_at,
                logout_date,
            });
        }
        self.users.update_fields(user_id, &touch(logout_at)).await?;
        Ok(())
    }
}
