use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use time::UtcOffset;

use crate::users::repo_types::Role;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    /// TTL for admin and super accounts.
    pub elevated_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub user_ttl_secs: u64,
    pub streak_ttl_secs: u64,
    pub history_ttl_secs: u64,
    pub history_len: usize,
    pub timeout_ms: u64,
}

impl CacheConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelConfig {
    pub base_exp: f64,
    pub growth_factor: f64,
    pub max_lv: u32,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub jwt: JwtConfig,
    pub cache: CacheConfig,
    pub level: LevelConfig,
    /// Offset of the timezone that decides where a calendar day starts.
    pub day_offset: UtcOffset,
    /// Identifiers that are created with, or promoted to, an elevated role.
    pub admin_accounts: HashMap<String, Role>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Parses `identifier:role` pairs separated by commas, e.g. `admin:admin,root:super`.
pub fn parse_admin_accounts(raw: &str) -> anyhow::Result<HashMap<String, Role>> {
    let mut accounts = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (identifier, role) = pair
            .rsplit_once(':')
            .with_context(|| format!("ADMIN_ACCOUNTS entry without role: {pair}"))?;
        let role = Role::from_str(role.trim())
            .map_err(|_| anyhow::anyhow!("ADMIN_ACCOUNTS entry with unknown role: {pair}"))?;
        accounts.insert(identifier.trim().to_lowercase(), role);
    }
    Ok(accounts)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());

        let ttl_minutes = env_or("JWT_TTL_MINUTES", 60 * 24 * 30);
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "userpulse".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "userpulse-users".into()),
            ttl_minutes,
            elevated_ttl_minutes: env_or("JWT_ELEVATED_TTL_MINUTES", ttl_minutes * 2),
        };

        let cache = CacheConfig {
            user_ttl_secs: env_or("CACHE_USER_TTL_SECS", 60 * 60 * 24),
            streak_ttl_secs: env_or("CACHE_STREAK_TTL_SECS", 60 * 60 * 48),
            history_ttl_secs: env_or("CACHE_HISTORY_TTL_SECS", 60 * 60 * 24 * 30),
            history_len: env_or("CACHE_HISTORY_LEN", 32),
            timeout_ms: env_or("CACHE_TIMEOUT_MS", 150),
        };

        let level = LevelConfig {
            base_exp: env_or("LEVEL_BASE_EXP", 100.0),
            growth_factor: env_or("LEVEL_GROWTH_FACTOR", 1.5),
            max_lv: env_or("LEVEL_MAX", 10),
        };

        let offset_hours: i8 = env_or("APP_TZ_OFFSET_HOURS", 0);
        let day_offset = UtcOffset::from_hms(offset_hours, 0, 0)
            .with_context(|| format!("APP_TZ_OFFSET_HOURS out of range: {offset_hours}"))?;

        let admin_accounts =
            parse_admin_accounts(&std::env::var("ADMIN_ACCOUNTS").unwrap_or_default())?;

        Ok(Self {
            database_url,
            redis_url,
            jwt,
            cache,
            level,
            day_offset,
            admin_accounts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_admin_accounts() {
        let accounts = parse_admin_accounts("admin:admin, Root@Example.com:super ,").unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts.get("admin"), Some(&Role::Admin));
        assert_eq!(accounts.get("root@example.com"), Some(&Role::Super));
    }

    #[test]
    fn rejects_unknown_admin_role() {
        assert!(parse_admin_accounts("admin:owner").is_err());
        assert!(parse_admin_accounts("admin").is_err());
    }
}
