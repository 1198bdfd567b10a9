use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::levels::{curve::ThresholdCurve, repo_types::LevelState};

#[async_trait]
pub trait LevelStore: Send + Sync {
    async fn get(&self, user_uid: &str) -> anyhow::Result<Option<LevelState>>;
    /// Adds `delta` to the user's experience and persists the recomputed
    /// level, creating the row on first use. Read-modify-write is atomic.
    async fn apply_exp(
        &self,
        user_uid: &str,
        delta: u64,
        curve: &ThresholdCurve,
        now: OffsetDateTime,
    ) -> anyhow::Result<LevelState>;
}

const LEVEL_COLUMNS: &str = "user_uid, lv, max_lv, exp, next_lv, created_at, updated_at";

#[derive(Clone)]
pub struct PgLevelStore {
    db: PgPool,
}

impl PgLevelStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LevelStore for PgLevelStore {
    async fn get(&self, user_uid: &str) -> anyhow::Result<Option<LevelState>> {
        let sql = format!("SELECT {LEVEL_COLUMNS} FROM user_levels WHERE user_uid = $1");
        let state = sqlx::query_as::<_, LevelState>(&sql)
            .bind(user_uid)
            .fetch_optional(&self.db)
            .await
            .context("load level state")?;
        Ok(state)
    }

    async fn apply_exp(
        &self,
        user_uid: &str,
        delta: u64,
        curve: &ThresholdCurve,
        now: OffsetDateTime,
    ) -> anyhow::Result<LevelState> {
        let fresh = LevelState::fresh(user_uid, curve, now);
        let mut tx = self.db.begin().await.context("begin level tx")?;

        sqlx::query(
            r#"
            INSERT INTO user_levels (user_uid, lv, max_lv, exp, next_lv, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (user_uid) DO NOTHING
            "#,
        )
        .bind(&fresh.user_uid)
        .bind(fresh.lv)
        .bind(fresh.max_lv)
        .bind(fresh.exp)
        .bind(fresh.next_lv)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("ensure level row")?;

        let sql = format!("SELECT {LEVEL_COLUMNS} FROM user_levels WHERE user_uid = $1 FOR UPDATE");
        let current = sqlx::query_as::<_, LevelState>(&sql)
            .bind(user_uid)
            .fetch_one(&mut *tx)
            .await
            .context("lock level row")?;

        let next = current.advanced(delta, curve, now)?;
        let sql = format!(
            "UPDATE user_levels SET lv = $2, max_lv = $3, exp = $4, next_lv = $5, updated_at = $6 \
             WHERE user_uid = $1 RETURNING {LEVEL_COLUMNS}"
        );
        let saved = sqlx::query_as::<_, LevelState>(&sql)
            .bind(user_uid)
            .bind(next.lv)
            .bind(next.max_lv)
            .bind(next.exp)
            .bind(next.next_lv)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .context("update level row")?;

        tx.commit().await.context("commit level tx")?;
        Ok(saved)
    }
}

#[derive(Default)]
pub struct MemoryLevelStore {
    rows: Mutex<HashMap<String, LevelState>>,
}

impl MemoryLevelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LevelStore for MemoryLevelStore {
    async fn get(&self, user_uid: &str) -> anyhow::Result<Option<LevelState>> {
        let rows = self.rows.lock().map_err(|_| anyhow::anyhow!("level store poisoned"))?;
        Ok(rows.get(user_uid).cloned())
    }

    async fn apply_exp(
        &self,
        user_uid: &str,
        delta: u64,
        curve: &ThresholdCurve,
        now: OffsetDateTime,
    ) -> anyhow::Result<LevelState> {
        let mut rows = self.rows.lock().map_err(|_| anyhow::anyhow!("level store poisoned"))?;
        let current = rows
            .get(user_uid)
            .cloned()
            .unwrap_or_else(|| LevelState::fresh(user_uid, curve, now));
        let next = current.advanced(delta, curve, now)?;
        rows.insert(user_uid.to_string(), next.clone());
        Ok(next)
    }
}
