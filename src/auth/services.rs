use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::{
    auth::password::{hash_password, verify_password},
    cache::IdentitySnapshot,
    error::{ApiError, AuthError},
    levels::{repo_types::LevelInfo, services::level_info},
    state::AppState,
    streak::services::{local_date, record_engagement_at, StreakInfo},
    users::{
        dto::PrivateIdentity,
        repo_types::{generate_uid, LoginChannel, NewUser, Role, Status, UserPatch, UserRecord},
        services::commit_identity_mutation,
    },
};

pub const MIN_SECRET_LEN: usize = 8;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_]{3,32}$").unwrap();
    static ref PHONE_RE: Regex = Regex::new(r"^[0-9]{8,15}$").unwrap();
    // verified against when the identifier is unknown, so both failure paths cost one hash
    static ref DUMMY_HASH: String = hash_password("userpulse-dummy-secret").unwrap_or_default();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub(crate) fn is_valid_username(username: &str) -> bool {
    USERNAME_RE.is_match(username)
}

pub(crate) fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(phone)
}

pub(crate) fn is_valid_name(name: &str) -> bool {
    let len = name.chars().count();
    (1..=64).contains(&len)
}

pub(crate) fn is_valid_location(location: &str) -> bool {
    let len = location.chars().count();
    (1..=30).contains(&len)
}

/// Canonical form used for lookups and cache keys.
pub fn normalize_identifier(raw: &str, channel: LoginChannel) -> String {
    let trimmed = raw.trim();
    match channel {
        LoginChannel::Email => trimmed.to_lowercase(),
        LoginChannel::Username => trimmed.to_string(),
        LoginChannel::Phone => trimmed
            .chars()
            .filter(|c| !matches!(c, ' ' | '-'))
            .collect(),
    }
}

pub fn validate_identifier(identifier: &str, channel: LoginChannel) -> Result<(), ApiError> {
    let ok = match channel {
        LoginChannel::Email => is_valid_email(identifier),
        LoginChannel::Username => is_valid_username(identifier),
        LoginChannel::Phone => is_valid_phone(identifier),
    };
    if ok {
        Ok(())
    } else {
        Err(ApiError::Validation(format!("invalid {channel}")))
    }
}

/// An authenticated session handed back to the client.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub expires_in: u64,
    pub user: PrivateIdentity,
    pub streak: StreakInfo,
    pub level: LevelInfo,
}

pub async fn authenticate(
    state: &AppState,
    identifier: &str,
    secret: &str,
    channel: LoginChannel,
) -> Result<Session, AuthError> {
    authenticate_at(state, identifier, secret, channel, OffsetDateTime::now_utc()).await
}

/// Cache first, durable store on a miss. The secret is checked before the
/// account status, so a disabled account is only reported to a caller who
/// knows its secret.
pub async fn authenticate_at(
    state: &AppState,
    identifier: &str,
    secret: &str,
    channel: LoginChannel,
    now: OffsetDateTime,
) -> Result<Session, AuthError> {
    let identifier = normalize_identifier(identifier, channel);

    // a cached snapshot is never written back, so it still expires on schedule
    let (user, from_cache) = match state.cache.lookup(&identifier, channel).await {
        Some(snapshot) => (snapshot.into_record(), true),
        None => {
            let found = state
                .users
                .find_by_identifier(&identifier, channel)
                .await
                .map_err(AuthError::storage)?;
            match found {
                Some(user) => (user, false),
                None => {
                    let _ = verify_password(secret, &DUMMY_HASH);
                    warn!(channel = %channel, "login for unknown identifier");
                    return Err(AuthError::Credential);
                }
            }
        }
    };

    if !verify_password(secret, &user.password_hash) {
        warn!(uid = %user.uid, "login with wrong secret");
        return Err(AuthError::Credential);
    }
    if user.status == Status::Disabled {
        warn!(uid = %user.uid, "login to disabled account");
        return Err(AuthError::AccountDisabled);
    }

    let (user, durable) = match state.config.admin_accounts.get(&identifier) {
        Some(&role) if role != user.role => {
            info!(uid = %user.uid, role = ?role, "promoting listed admin account");
            let patch = UserPatch {
                role: Some(role),
                ..UserPatch::default()
            };
            (commit_identity_mutation(state, &user, &patch).await?, true)
        }
        _ => (user, !from_cache),
    };

    let session = open_session(state, user, now, durable).await?;
    info!(uid = %session.user.uid, continuous_days = session.streak.continuous_days, "user logged in");
    Ok(session)
}

/// Records engagement, issues a token and, when `user` came from a durable
/// read, refreshes the identity cache, in that order.
async fn open_session(
    state: &AppState,
    mut user: UserRecord,
    now: OffsetDateTime,
    durable: bool,
) -> Result<Session, AuthError> {
    let streak = record_engagement_at(state, user.id, &user.uid, now).await?;
    user.last_active_at = now;

    let token = state
        .tokens
        .issue(&user.uid, user.role, user.login_channel)
        .map_err(AuthError::storage)?;
    let expires_in = state.tokens.ttl_for(user.role).as_secs();

    if durable {
        state
            .cache
            .store(&IdentitySnapshot::from_record(
                &user,
                Some(token.clone()),
                streak.continuous_days,
            ))
            .await;
    }

    let level = level_info(state, &user.uid).await?;
    Ok(Session {
        token,
        expires_in,
        user: PrivateIdentity::new(&user, level.level, level.exp, streak.continuous_days),
        streak,
        level,
    })
}

pub async fn register(
    state: &AppState,
    identifier: &str,
    secret: &str,
    channel: LoginChannel,
) -> Result<Session, ApiError> {
    register_at(state, identifier, secret, channel, OffsetDateTime::now_utc()).await
}

pub async fn register_at(
    state: &AppState,
    identifier: &str,
    secret: &str,
    channel: LoginChannel,
    now: OffsetDateTime,
) -> Result<Session, ApiError> {
    let identifier = normalize_identifier(identifier, channel);
    validate_identifier(&identifier, channel)?;
    if secret.chars().count() < MIN_SECRET_LEN {
        warn!("password too short");
        return Err(ApiError::Validation("password too short".into()));
    }

    let taken = state
        .users
        .identifier_in_use(&identifier, channel, None)
        .await
        .map_err(AuthError::storage)?;
    if taken {
        warn!(channel = %channel, "identifier already registered");
        return Err(ApiError::Conflict(format!("{channel} already registered")));
    }

    let role = state
        .config
        .admin_accounts
        .get(&identifier)
        .copied()
        .unwrap_or(Role::Normal);
    let prefix = if role.is_elevated() { "Admin" } else { "User" };
    let password_hash = hash_password(secret).map_err(AuthError::storage)?;

    let user = state
        .users
        .insert(NewUser {
            uid: generate_uid(),
            login_channel: channel,
            identifier,
            password_hash,
            role,
            name: format!("{prefix}_{}", now.unix_timestamp()),
            now,
        })
        .await
        .map_err(AuthError::storage)?;

    match open_session(state, user.clone(), now, true).await {
        Ok(session) => {
            info!(uid = %user.uid, channel = %channel, role = ?role, "user registered");
            Ok(session)
        }
        Err(e) => {
            discard_registration(state, &user).await;
            Err(e.into())
        }
    }
}

/// Undoes a registration whose first session could not be opened, so the
/// identifier is free for a retry. Dependent rows go with the user row.
async fn discard_registration(state: &AppState, user: &UserRecord) {
    if let Err(e) = state.users.delete(user.id).await {
        error!(uid = %user.uid, error = %e, "failed registration left a user row behind");
    }
    if let Some(identifier) = user.login_identifier() {
        state.cache.invalidate(identifier, user.login_channel).await;
    }
    state.cache.clear_streak(&user.uid).await;
    state.cache.store_login_dates(&user.uid, &[]).await;
    warn!(uid = %user.uid, "registration rolled back");
}

/// Writes the logout record and drops the caller's cache entries. Issued
/// tokens stay valid until they expire.
pub async fn logout_at(state: &AppState, uid: &str, now: OffsetDateTime) -> Result<(), AuthError> {
    let user = state
        .users
        .find_by_uid(uid)
        .await
        .map_err(AuthError::storage)?
        .ok_or(AuthError::TokenInvalid)?;

    state
        .logins
        .record_logout(user.id, &user.uid, now, local_date(now, state.config.day_offset))
        .await
        .map_err(AuthError::storage)?;

    if let Some(identifier) = user.login_identifier() {
        state.cache.invalidate(identifier, user.login_channel).await;
    }
    state.cache.clear_streak(&user.uid).await;
    info!(uid = %user.uid, "user logged out");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{IdentityCache, MemoryCache};
    use crate::streak::{repo::LoginStore, repo_types::LoginRecord};
    use crate::users::services::set_status;
    use std::sync::Arc;
    use std::time::Duration;
    use time::macros::datetime;
    use time::Date;

    const SECRET: &str = "correct-horse";

    #[test]
    fn identifier_rules() {
        assert!(is_valid_email("user@example.com"));
        assert!(!is_valid_email("user@example"));
        assert!(is_valid_username("some_user1"));
        assert!(!is_valid_username("ab"));
        assert!(!is_valid_username("has space"));
        assert!(is_valid_phone("5551234567"));
        assert!(!is_valid_phone("555-12"));
        assert_eq!(normalize_identifier(" A@B.io ", LoginChannel::Email), "a@b.io");
        assert_eq!(normalize_identifier("555 123-4567", LoginChannel::Phone), "5551234567");
    }

    #[tokio::test]
    async fn register_then_login_populates_cache() {
        let state = AppState::fake();
        let at = datetime!(2025-03-01 09:00 UTC);
        let registered = register_at(&state, "New@Example.com", SECRET, LoginChannel::Email, at)
            .await
            .unwrap();
        assert!(registered.user.name.starts_with("User_"));
        assert_eq!(registered.streak.continuous_days, 1);

        let cached = state.cache.lookup("new@example.com", LoginChannel::Email).await.unwrap();
        assert_eq!(cached.uid, registered.user.uid);
        assert_eq!(cached.token.as_deref(), Some(registered.token.as_str()));

        let claims = state.tokens.verify(&registered.token).unwrap();
        assert_eq!(claims.sub, registered.user.uid);
        assert_eq!(claims.channel, LoginChannel::Email);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let state = AppState::fake();
        register(&state, "dup_user", SECRET, LoginChannel::Username).await.unwrap();
        let err = register(&state, "dup_user", SECRET, LoginChannel::Username).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn rejects_bad_registration_input() {
        let state = AppState::fake();
        assert!(matches!(
            register(&state, "not-an-email", SECRET, LoginChannel::Email).await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            register(&state, "ok@example.com", "short", LoginChannel::Email).await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn cache_hit_serves_snapshot_without_rewriting_it() {
        let state = AppState::fake();
        let session = register(&state, "hit@example.com", SECRET, LoginChannel::Email).await.unwrap();

        // change the durable row behind the cache's back
        let user = state.users.find_by_uid(&session.user.uid).await.unwrap().unwrap();
        let patch = UserPatch {
            name: Some("Renamed".into()),
            ..UserPatch::default()
        };
        state.users.update_fields(user.id, &patch).await.unwrap();

        let again = authenticate(&state, "hit@example.com", SECRET, LoginChannel::Email).await.unwrap();
        assert_eq!(again.user.name, session.user.name);
        let cached = state.cache.lookup("hit@example.com", LoginChannel::Email).await.unwrap();
        assert_eq!(cached.token.as_deref(), Some(session.token.as_str()));
    }

    #[tokio::test]
    async fn missed_invalidation_heals_at_fixed_expiry() {
        let mut state = AppState::fake();
        let mut cfg = state.config.cache.clone();
        cfg.user_ttl_secs = 1;
        state.cache = IdentityCache::new(Arc::new(MemoryCache::new()), cfg);

        let session = register(&state, "stale@example.com", SECRET, LoginChannel::Email).await.unwrap();
        // disabled without the cache delete that normally follows
        let user = state.users.find_by_uid(&session.user.uid).await.unwrap().unwrap();
        let patch = UserPatch {
            status: Some(Status::Disabled),
            ..UserPatch::default()
        };
        state.users.update_fields(user.id, &patch).await.unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(authenticate(&state, "stale@example.com", SECRET, LoginChannel::Email).await.is_ok());

        tokio::time::sleep(Duration::from_millis(600)).await;
        let late = authenticate(&state, "stale@example.com", SECRET, LoginChannel::Email).await;
        assert!(matches!(late, Err(AuthError::AccountDisabled)));
    }

    struct BrokenLogins;

    #[async_trait::async_trait]
    impl LoginStore for BrokenLogins {
        async fn latest(&self, _user_uid: &str) -> anyhow::Result<Option<LoginRecord>> {
            Ok(None)
        }

        async fn record_login(
            &self,
            _user_id: i64,
            _user_uid: &str,
            _date: Date,
            _at: OffsetDateTime,
            _continuous_days: u32,
        ) -> anyhow::Result<bool> {
            anyhow::bail!("connection reset")
        }

        async fn recent_dates(&self, _user_uid: &str, _limit: usize) -> anyhow::Result<Vec<Date>> {
            Ok(Vec::new())
        }

        async fn record_logout(
            &self,
            _user_id: i64,
            _user_uid: &str,
            _at: OffsetDateTime,
            _date: Date,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_first_session_rolls_registration_back() {
        let mut state = AppState::fake();
        let working = state.logins.clone();
        state.logins = Arc::new(BrokenLogins);

        let err = register(&state, "retry@example.com", SECRET, LoginChannel::Email).await.unwrap_err();
        assert!(matches!(err, ApiError::Auth(AuthError::Storage(_))));
        let left = state
            .users
            .find_by_identifier("retry@example.com", LoginChannel::Email)
            .await
            .unwrap();
        assert!(left.is_none());
        assert!(state.cache.lookup("retry@example.com", LoginChannel::Email).await.is_none());

        state.logins = working;
        let session = register(&state, "retry@example.com", SECRET, LoginChannel::Email).await.unwrap();
        assert_eq!(session.streak.continuous_days, 1);
    }

    #[tokio::test]
    async fn unknown_identifier_and_wrong_secret_look_the_same() {
        let state = AppState::fake();
        register(&state, "known@example.com", SECRET, LoginChannel::Email).await.unwrap();

        let unknown = authenticate(&state, "ghost@example.com", SECRET, LoginChannel::Email).await;
        let wrong = authenticate(&state, "known@example.com", "wrong-secret", LoginChannel::Email).await;
        assert!(matches!(unknown, Err(AuthError::Credential)));
        assert!(matches!(wrong, Err(AuthError::Credential)));
    }

    #[tokio::test]
    async fn disabled_account_reported_after_secret_matches() {
        let state = AppState::fake();
        let session = register(&state, "off@example.com", SECRET, LoginChannel::Email).await.unwrap();
        set_status(&state, &session.user.uid, Status::Disabled).await.unwrap();

        let right = authenticate(&state, "off@example.com", SECRET, LoginChannel::Email).await;
        assert!(matches!(right, Err(AuthError::AccountDisabled)));
        let wrong = authenticate(&state, "off@example.com", "wrong-secret", LoginChannel::Email).await;
        assert!(matches!(wrong, Err(AuthError::Credential)));
    }

    #[tokio::test]
    async fn cache_outage_does_not_block_login() {
        let cache = Arc::new(MemoryCache::new());
        let state = AppState::fake_with_cache(cache.clone());
        register(&state, "down@example.com", SECRET, LoginChannel::Email).await.unwrap();

        cache.set_available(false);
        let session = authenticate(&state, "down@example.com", SECRET, LoginChannel::Email).await.unwrap();
        assert!(state.tokens.verify(&session.token).is_ok());
    }

    #[tokio::test]
    async fn listed_account_is_created_and_promoted_as_admin() {
        let mut state = AppState::fake();
        let mut config = (*state.config).clone();
        config.admin_accounts.insert("boss@example.com".into(), Role::Super);
        config.admin_accounts.insert("later@example.com".into(), Role::Admin);
        state.config = Arc::new(config.clone());

        let boss = register(&state, "boss@example.com", SECRET, LoginChannel::Email).await.unwrap();
        assert_eq!(boss.user.role, Role::Super);
        assert!(boss.user.name.starts_with("Admin_"));
        assert_eq!(boss.expires_in, state.tokens.ttl_for(Role::Super).as_secs());

        // registered before being listed
        config.admin_accounts.remove("later@example.com");
        state.config = Arc::new(config.clone());
        register(&state, "later@example.com", SECRET, LoginChannel::Email).await.unwrap();
        config.admin_accounts.insert("later@example.com".into(), Role::Admin);
        state.config = Arc::new(config);

        let later = authenticate(&state, "later@example.com", SECRET, LoginChannel::Email).await.unwrap();
        assert_eq!(later.user.role, Role::Admin);
        assert!(later.user.is_admin);
    }

    #[tokio::test]
    async fn logout_records_and_clears_cache() {
        let state = AppState::fake();
        let session = register(&state, "bye@example.com", SECRET, LoginChannel::Email).await.unwrap();
        assert!(state.cache.lookup("bye@example.com", LoginChannel::Email).await.is_some());

        logout_at(&state, &session.user.uid, OffsetDateTime::now_utc()).await.unwrap();
        assert!(state.cache.lookup("bye@example.com", LoginChannel::Email).await.is_none());
        assert!(state.cache.streak(&session.user.uid).await.is_none());
    }
}
