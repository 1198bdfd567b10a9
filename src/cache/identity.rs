use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date, OffsetDateTime};
use tracing::{debug, warn};

use super::{CacheClient, CacheError};
use crate::config::CacheConfig;
use crate::users::repo_types::{LoginChannel, Role, Sex, Status, UserRecord};

/// Cache-resident copy of a user row, including the secret hash so a repeat
/// login can be verified without a durable round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub id: i64,
    pub uid: String,
    pub login_channel: LoginChannel,
    pub email: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: Role,
    pub status: Status,
    pub name: String,
    #[serde(default)]
    pub sex: Sex,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(with = "time::serde::timestamp")]
    pub last_active_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    pub token: Option<String>,
    pub continuous_days: u32,
}

impl IdentitySnapshot {
    pub fn from_record(user: &UserRecord, token: Option<String>, continuous_days: u32) -> Self {
        Self {
            id: user.id,
            uid: user.uid.clone(),
            login_channel: user.login_channel,
            email: user.email.clone(),
            username: user.username.clone(),
            phone: user.phone.clone(),
            password_hash: user.password_hash.clone(),
            role: user.role,
            status: user.status,
            name: user.name.clone(),
            sex: user.sex,
            location: user.location.clone(),
            last_active_at: user.last_active_at,
            created_at: user.created_at,
            token,
            continuous_days,
        }
    }

    pub fn into_record(self) -> UserRecord {
        UserRecord {
            id: self.id,
            uid: self.uid,
            login_channel: self.login_channel,
            email: self.email,
            username: self.username,
            phone: self.phone,
            password_hash: self.password_hash,
            role: self.role,
            status: self.status,
            name: self.name,
            sex: self.sex,
            location: self.location,
            last_active_at: self.last_active_at,
            created_at: self.created_at,
        }
    }

    pub fn login_identifier(&self) -> Option<&str> {
        match self.login_channel {
            LoginChannel::Email => self.email.as_deref(),
            LoginChannel::Username => self.username.as_deref(),
            LoginChannel::Phone => self.phone.as_deref(),
        }
    }
}

/// Cached view of the newest login record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakSnapshot {
    pub last_login_date: Date,
    #[serde(with = "time::serde::timestamp")]
    pub last_login_time: OffsetDateTime,
    pub continuous_days: u32,
}

const DATE_FORMAT: &[time::format_description::FormatItem<'static>] =
    format_description!("[year]-[month]-[day]");

pub fn user_key(identifier: &str, channel: LoginChannel) -> String {
    format!("user_info:{identifier}:{channel}")
}

pub fn streak_key(uid: &str) -> String {
    format!("login_streak:{uid}")
}

pub fn history_key(uid: &str) -> String {
    format!("login_dates:{uid}")
}

/// Typed access to the cache for identity and engagement data.
///
/// Every call is bounded by the configured timeout. Errors and timeouts are
/// logged and reported as a miss (reads) or silently dropped (writes).
#[derive(Clone)]
pub struct IdentityCache {
    client: Arc<dyn CacheClient>,
    cfg: CacheConfig,
}

impl IdentityCache {
    pub fn new(client: Arc<dyn CacheClient>, cfg: CacheConfig) -> Self {
        Self { client, cfg }
    }

    async fn guarded<T, F>(&self, op: &'static str, key: &str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.cfg.timeout(), fut).await {
            Ok(Ok(v)) => Some(v),
            Ok(Err(e)) => {
                warn!(op, key, error = %e, "cache call failed; using durable store");
                None
            }
            Err(_) => {
                warn!(op, key, "cache call timed out; using durable store");
                None
            }
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        let raw = self.guarded("get", key, self.client.get(key)).await.flatten()?;
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key, error = %e, "undecodable cache entry dropped");
                self.guarded("del", key, self.client.del(key)).await;
                None
            }
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache entry not encodable");
                return;
            }
        };
        self.guarded("set", key, self.client.set_ex(key, &raw, ttl)).await;
    }

    pub async fn lookup(&self, identifier: &str, channel: LoginChannel) -> Option<IdentitySnapshot> {
        let key = user_key(identifier, channel);
        let hit = self.get_json::<IdentitySnapshot>(&key).await;
        debug!(key = %key, hit = hit.is_some(), "identity cache lookup");
        hit
    }

    /// Write-through with a fixed expiry independent of any token lifetime.
    pub async fn store(&self, snapshot: &IdentitySnapshot) {
        let Some(identifier) = snapshot.login_identifier() else {
            return;
        };
        let key = user_key(identifier, snapshot.login_channel);
        self.set_json(&key, snapshot, Duration::from_secs(self.cfg.user_ttl_secs))
            .await;
    }

    pub async fn invalidate(&self, identifier: &str, channel: LoginChannel) {
        let key = user_key(identifier, channel);
        self.guarded("del", &key, self.client.del(&key)).await;
        debug!(key = %key, "identity cache invalidated");
    }

    pub async fn streak(&self, uid: &str) -> Option<StreakSnapshot> {
        self.get_json(&streak_key(uid)).await
    }

    pub async fn store_streak(&self, uid: &str, streak: &StreakSnapshot) {
        let ttl = Duration::from_secs(self.cfg.streak_ttl_secs);
        self.set_json(&streak_key(uid), streak, ttl).await;
    }

    pub async fn clear_streak(&self, uid: &str) {
        let key = streak_key(uid);
        self.guarded("del", &key, self.client.del(&key)).await;
    }

    pub async fn push_login_date(&self, uid: &str, date: Date) {
        let Ok(value) = date.format(DATE_FORMAT) else {
            return;
        };
        let key = history_key(uid);
        let ttl = Duration::from_secs(self.cfg.history_ttl_secs);
        self.guarded(
            "push",
            &key,
            self.client.push_capped(&key, &value, self.cfg.history_len, ttl),
        )
        .await;
    }

    /// Rebuilds the history list from `dates` (newest first), replacing
    /// whatever partial list the cache held.
    pub async fn store_login_dates(&self, uid: &str, dates: &[Date]) {
        let values: Vec<String> = dates
            .iter()
            .take(self.cfg.history_len)
            .filter_map(|d| d.format(DATE_FORMAT).ok())
            .collect();
        let key = history_key(uid);
        let ttl = Duration::from_secs(self.cfg.history_ttl_secs);
        self.guarded("replace", &key, self.client.replace_list(&key, &values, ttl))
            .await;
    }

    /// Newest-first login dates, `None` on a miss or an empty list.
    pub async fn login_dates(&self, uid: &str) -> Option<Vec<Date>> {
        let key = history_key(uid);
        let raw = self
            .guarded("range", &key, self.client.range(&key, self.cfg.history_len))
            .await?;
        let dates: Vec<Date> = raw
            .iter()
            .filter_map(|s| Date::parse(s, DATE_FORMAT).ok())
            .collect();
        (!dates.is_empty()).then_some(dates)
    }

    pub fn history_len(&self) -> usize {
        self.cfg.history_len
    }
}
