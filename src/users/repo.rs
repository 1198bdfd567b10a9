use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::users::repo_types::{LoginChannel, NewUser, Sex, Status, UserPatch, UserRecord};

/// Durable store for identity records. The single source of truth.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_identifier(
        &self,
        identifier: &str,
        channel: LoginChannel,
    ) -> anyhow::Result<Option<UserRecord>>;
    async fn find_by_uid(&self, uid: &str) -> anyhow::Result<Option<UserRecord>>;
    async fn insert(&self, user: NewUser) -> anyhow::Result<UserRecord>;
    async fn update_fields(&self, id: i64, patch: &UserPatch) -> anyhow::Result<UserRecord>;
    /// Removes the row together with its login, logout and level rows.
    async fn delete(&self, id: i64) -> anyhow::Result<()>;
    /// Whether another user already owns `value` in the column backing `channel`.
    async fn identifier_in_use(
        &self,
        value: &str,
        channel: LoginChannel,
        except_id: Option<i64>,
    ) -> anyhow::Result<bool>;
}

const USER_COLUMNS: &str = "id, uid, login_channel, email, username, phone, password_hash, \
                            role, status, name, sex, location, last_active_at, created_at";

fn identifier_column(channel: LoginChannel) -> &'static str {
    match channel {
        LoginChannel::Email => "email",
        LoginChannel::Username => "username",
        LoginChannel::Phone => "phone",
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_identifier(
        &self,
        identifier: &str,
        channel: LoginChannel,
    ) -> anyhow::Result<Option<UserRecord>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE {} = $1 AND login_channel = $2",
            identifier_column(channel)
        );
        let user = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(identifier)
            .bind(channel)
            .fetch_optional(&self.db)
            .await
            .context("find user by identifier")?;
        Ok(user)
    }

    async fn find_by_uid(&self, uid: &str) -> anyhow::Result<Option<UserRecord>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE uid = $1");
        let user = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(uid)
            .fetch_optional(&self.db)
            .await
            .context("find user by uid")?;
        Ok(user)
    }

    async fn insert(&self, user: NewUser) -> anyhow::Result<UserRecord> {
        let (email, username, phone) = match user.login_channel {
            LoginChannel::Email => (Some(user.identifier), None, None),
            LoginChannel::Username => (None, Some(user.identifier), None),
            LoginChannel::Phone => (None, None, Some(user.identifier)),
        };
        let sql = format!(
            r#"
            INSERT INTO users (uid, login_channel, email, username, phone, password_hash,
                               role, status, name, sex, last_active_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            RETURNING {USER_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(&user.uid)
            .bind(user.login_channel)
            .bind(email)
            .bind(username)
            .bind(phone)
            .bind(&user.password_hash)
            .bind(user.role)
            .bind(Status::Normal)
            .bind(&user.name)
            .bind(Sex::Unknown)
            .bind(user.now)
            .fetch_one(&self.db)
            .await
            .context("insert user")?;
        Ok(created)
    }

    async fn update_fields(&self, id: i64, patch: &UserPatch) -> anyhow::Result<UserRecord> {
        let sql = format!(
            r#"
            UPDATE users
               SET email          = COALESCE($2, email),
                   username       = COALESCE($3, username),
                   phone          = COALESCE($4, phone),
                   name           = COALESCE($5, name),
                   password_hash  = COALESCE($6, password_hash),
                   role           = COALESCE($7, role),
                   status         = COALESCE($8, status),
                   last_active_at = COALESCE($9, last_active_at),
                   sex            = COALESCE($10, sex),
                   location       = COALESCE($11, location)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(id)
            .bind(patch.email.as_deref())
            .bind(patch.username.as_deref())
            .bind(patch.phone.as_deref())
            .bind(patch.name.as_deref())
            .bind(patch.password_hash.as_deref())
            .bind(patch.role)
            .bind(patch.status)
            .bind(patch.last_active_at)
            .bind(patch.sex)
            .bind(patch.location.as_deref())
            .fetch_one(&self.db)
            .await
            .context("update user fields")?;
        Ok(updated)
    }

    async fn delete(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        Ok(())
    }

    async fn identifier_in_use(
        &self,
        value: &str,
        channel: LoginChannel,
        except_id: Option<i64>,
    ) -> anyhow::Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM users WHERE {} = $1 AND ($2::BIGINT IS NULL OR id <> $2))",
            identifier_column(channel)
        );
        let (exists,): (bool,) = sqlx::query_as(&sql)
            .bind(value)
            .bind(except_id)
            .fetch_one(&self.db)
            .await
            .context("check identifier in use")?;
        Ok(exists)
    }
}

/// In-process store used by `AppState::fake()` and unit tests.
#[derive(Default)]
pub struct MemoryUserStore {
    rows: Mutex<Vec<UserRecord>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn column_value(user: &UserRecord, channel: LoginChannel) -> Option<&str> {
    match channel {
        LoginChannel::Email => user.email.as_deref(),
        LoginChannel::Username => user.username.as_deref(),
        LoginChannel::Phone => user.phone.as_deref(),
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_identifier(
        &self,
        identifier: &str,
        channel: LoginChannel,
    ) -> anyhow::Result<Option<UserRecord>> {
        let rows = self.rows.lock().map_err(|_| anyhow::anyhow!("user store poisoned"))?;
        Ok(rows
            .iter()
            .find(|u| u.login_channel == channel && column_value(u, channel) == Some(identifier))
            .cloned())
    }

    async fn find_by_uid(&self, uid: &str) -> anyhow::Result<Option<UserRecord>> {
        let rows = self.rows.lock().map_err(|_| anyhow::anyhow!("user store poisoned"))?;
        Ok(rows.iter().find(|u| u.uid == uid).cloned())
    }

    async fn insert(&self, user: NewUser) -> anyhow::Result<UserRecord> {
        let mut rows = self.rows.lock().map_err(|_| anyhow::anyhow!("user store poisoned"))?;
        let taken = rows
            .iter()
            .any(|u| column_value(u, user.login_channel) == Some(user.identifier.as_str()));
        if taken {
            anyhow::bail!("duplicate {} {}", user.login_channel, user.identifier);
        }
        let mut record = UserRecord {
            id: rows.iter().map(|u| u.id).max().unwrap_or(0) + 1,
            uid: user.uid,
            login_channel: user.login_channel,
            email: None,
            username: None,
            phone: None,
            password_hash: user.password_hash,
            role: user.role,
            status: Status::Normal,
            name: user.name,
            sex: Sex::Unknown,
            location: None,
            last_active_at: user.now,
            created_at: user.now,
        };
        match user.login_channel {
            LoginChannel::Email => record.email = Some(user.identifier),
            LoginChannel::Username => record.username = Some(user.identifier),
            LoginChannel::Phone => record.phone = Some(user.identifier),
        }
        rows.push(record.clone());
        Ok(record)
    }

    async fn update_fields(&self, id: i64, patch: &UserPatch) -> anyhow::Result<UserRecord> {
        let mut rows = self.rows.lock().map_err(|_| anyhow::anyhow!("user store poisoned"))?;
        let user = rows
            .iter_mut()
            .find(|u| u.id == id)
            .with_context(|| format!("user {id} not found"))?;
        patch.apply_to(user);
        Ok(user.clone())
    }

    async fn delete(&self, id: i64) -> anyhow::Result<()> {
        let mut rows = self.rows.lock().map_err(|_| anyhow::anyhow!("user store poisoned"))?;
        rows.retain(|u| u.id != id);
        Ok(())
    }

    async fn identifier_in_use(
        &self,
        value: &str,
        channel: LoginChannel,
        except_id: Option<i64>,
    ) -> anyhow::Result<bool> {
        let rows = self.rows.lock().map_err(|_| anyhow::anyhow!("user store poisoned"))?;
        Ok(rows
            .iter()
            .any(|u| Some(u.id) != except_id && column_value(u, channel) == Some(value)))
    }
}
