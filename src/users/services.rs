use tracing::{debug, info, warn};

use crate::{
    auth::{
        claims::Claims,
        password::{hash_password, verify_password},
        services::{
            is_valid_email, is_valid_location, is_valid_name, is_valid_phone, is_valid_username,
            MIN_SECRET_LEN,
        },
    },
    error::{ApiError, AuthError},
    levels::services::level_info,
    state::AppState,
    streak::services::current_streak,
    users::{
        dto::{IdentityView, PrivateIdentity, PublicIdentity, UpdateProfileRequest},
        repo_types::{LoginChannel, Role, Status, UserPatch, UserRecord},
    },
};

/// Applies `patch` to the durable record, then drops every cache entry that
/// could still describe the old state. The only path for identity mutations.
pub async fn commit_identity_mutation(
    state: &AppState,
    current: &UserRecord,
    patch: &UserPatch,
) -> Result<UserRecord, AuthError> {
    let updated = state
        .users
        .update_fields(current.id, patch)
        .await
        .map_err(AuthError::storage)?;

    if let Some(old) = current.login_identifier() {
        state.cache.invalidate(old, current.login_channel).await;
    }
    if let Some(new) = updated.login_identifier() {
        if Some(new) != current.login_identifier() {
            state.cache.invalidate(new, updated.login_channel).await;
        }
    }
    debug!(uid = %updated.uid, "identity mutation committed");
    Ok(updated)
}

/// Loads the caller behind `claims` from durable storage and checks it holds
/// one of `allowed`. Token role tags are not trusted for authorization.
pub async fn require_role(
    state: &AppState,
    claims: &Claims,
    allowed: &[Role],
) -> Result<UserRecord, ApiError> {
    let caller = state
        .users
        .find_by_uid(&claims.sub)
        .await
        .map_err(AuthError::storage)?
        .ok_or(AuthError::TokenInvalid)?;
    if caller.status == Status::Disabled {
        return Err(AuthError::AccountDisabled.into());
    }
    if !allowed.contains(&caller.role) {
        warn!(uid = %caller.uid, role = ?caller.role, "insufficient role");
        return Err(ApiError::Forbidden);
    }
    Ok(caller)
}

async fn load(state: &AppState, uid: &str) -> Result<UserRecord, ApiError> {
    state
        .users
        .find_by_uid(uid)
        .await
        .map_err(AuthError::storage)?
        .ok_or(ApiError::NotFound)
}

/// Private view when the viewer is the subject, public otherwise.
pub async fn get_identity(
    state: &AppState,
    uid: &str,
    viewer: Option<&str>,
) -> Result<IdentityView, ApiError> {
    let user = load(state, uid).await?;
    let streak = current_streak(state, &user.uid).await?;
    let level = level_info(state, &user.uid).await?;

    if viewer == Some(user.uid.as_str()) {
        return Ok(IdentityView::Private(PrivateIdentity::new(
            &user,
            level.level,
            level.exp,
            streak.continuous_days,
        )));
    }
    Ok(IdentityView::Public(PublicIdentity {
        uid: user.uid,
        name: user.name,
        level: level.level,
        continuous_days: streak.continuous_days,
    }))
}

async fn ensure_free(
    state: &AppState,
    value: &str,
    channel: LoginChannel,
    user_id: i64,
) -> Result<(), ApiError> {
    let taken = state
        .users
        .identifier_in_use(value, channel, Some(user_id))
        .await
        .map_err(AuthError::storage)?;
    if taken {
        return Err(ApiError::Conflict(format!("{channel} already in use")));
    }
    Ok(())
}

pub async fn update_profile(
    state: &AppState,
    uid: &str,
    req: UpdateProfileRequest,
) -> Result<PrivateIdentity, ApiError> {
    let user = load(state, uid).await?;
    let mut patch = UserPatch::default();

    if let Some(name) = req.name.map(|n| n.trim().to_string()) {
        if !is_valid_name(&name) {
            return Err(ApiError::Validation("name must be 1-64 characters".into()));
        }
        patch.name = Some(name);
    }
    if let Some(email) = req.email.map(|e| e.trim().to_lowercase()) {
        if !is_valid_email(&email) {
            return Err(ApiError::Validation("invalid email".into()));
        }
        ensure_free(state, &email, LoginChannel::Email, user.id).await?;
        patch.email = Some(email);
    }
    if let Some(username) = req.username.map(|u| u.trim().to_string()) {
        if !is_valid_username(&username) {
            return Err(ApiError::Validation("invalid username".into()));
        }
        ensure_free(state, &username, LoginChannel::Username, user.id).await?;
        patch.username = Some(username);
    }
    if let Some(phone) = req.phone.map(|p| p.trim().to_string()) {
        if !is_valid_phone(&phone) {
            return Err(ApiError::Validation("invalid phone".into()));
        }
        ensure_free(state, &phone, LoginChannel::Phone, user.id).await?;
        patch.phone = Some(phone);
    }
    patch.sex = req.sex;
    if let Some(location) = req.location.map(|l| l.trim().to_string()) {
        if !is_valid_location(&location) {
            return Err(ApiError::Validation("location must be 1-30 characters".into()));
        }
        patch.location = Some(location);
    }
    if patch.is_empty() {
        return Err(ApiError::Validation("nothing to update".into()));
    }

    let updated = commit_identity_mutation(state, &user, &patch).await?;
    info!(uid = %updated.uid, "profile updated");

    let streak = current_streak(state, &updated.uid).await?;
    let level = level_info(state, &updated.uid).await?;
    Ok(PrivateIdentity::new(&updated, level.level, level.exp, streak.continuous_days))
}

pub async fn change_password(
    state: &AppState,
    uid: &str,
    current_password: &str,
    new_password: &str,
) -> Result<(), ApiError> {
    let user = load(state, uid).await?;
    if !verify_password(current_password, &user.password_hash) {
        warn!(uid = %uid, "password change with wrong current secret");
        return Err(AuthError::Credential.into());
    }
    if new_password.chars().count() < MIN_SECRET_LEN {
        return Err(ApiError::Validation("password too short".into()));
    }

    let hash = hash_password(new_password).map_err(AuthError::storage)?;
    let patch = UserPatch {
        password_hash: Some(hash),
        ..UserPatch::default()
    };
    commit_identity_mutation(state, &user, &patch).await?;
    info!(uid = %uid, "password changed");
    Ok(())
}

pub async fn set_status(state: &AppState, uid: &str, status: Status) -> Result<UserRecord, ApiError> {
    let user = load(state, uid).await?;
    let patch = UserPatch {
        status: Some(status),
        ..UserPatch::default()
    };
    let updated = commit_identity_mutation(state, &user, &patch).await?;
    info!(uid = %uid, status = ?status, "status changed");
    Ok(updated)
}

pub async fn set_role(state: &AppState, uid: &str, role: Role) -> Result<UserRecord, ApiError> {
    let user = load(state, uid).await?;
    let patch = UserPatch {
        role: Some(role),
        ..UserPatch::default()
    };
    let updated = commit_identity_mutation(state, &user, &patch).await?;
    info!(uid = %uid, role = ?role, "role changed");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::IdentitySnapshot;
    use crate::users::repo_types::{NewUser, Sex};
    use time::OffsetDateTime;

    async fn seeded(state: &AppState, identifier: &str, channel: LoginChannel) -> UserRecord {
        state
            .users
            .insert(NewUser {
                uid: format!("uid-{identifier}"),
                login_channel: channel,
                identifier: identifier.into(),
                password_hash: hash_password("correct-horse").unwrap(),
                role: Role::Normal,
                name: "User_1".into(),
                now: OffsetDateTime::now_utc(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn mutation_leaves_no_stale_cache_entry() {
        let state = AppState::fake();
        let user = seeded(&state, "a@example.com", LoginChannel::Email).await;
        state.cache.store(&IdentitySnapshot::from_record(&user, None, 1)).await;
        assert!(state.cache.lookup("a@example.com", LoginChannel::Email).await.is_some());

        set_status(&state, &user.uid, Status::Disabled).await.unwrap();

        match state.cache.lookup("a@example.com", LoginChannel::Email).await {
            None => {}
            Some(snap) => assert_eq!(snap.status, Status::Disabled),
        }
        let stored = state.users.find_by_uid(&user.uid).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Disabled);
    }

    #[tokio::test]
    async fn identifier_change_invalidates_old_and_new_keys() {
        let state = AppState::fake();
        let user = seeded(&state, "old@example.com", LoginChannel::Email).await;
        state.cache.store(&IdentitySnapshot::from_record(&user, None, 1)).await;

        let req = UpdateProfileRequest {
            email: Some("New@Example.com".into()),
            ..UpdateProfileRequest::default()
        };
        let view = update_profile(&state, &user.uid, req).await.unwrap();
        assert_eq!(view.email.as_deref(), Some("new@example.com"));
        assert!(state.cache.lookup("old@example.com", LoginChannel::Email).await.is_none());
        assert!(state.cache.lookup("new@example.com", LoginChannel::Email).await.is_none());
    }

    #[tokio::test]
    async fn taken_identifier_conflicts() {
        let state = AppState::fake();
        seeded(&state, "taken", LoginChannel::Username).await;
        let user = seeded(&state, "me@example.com", LoginChannel::Email).await;

        let req = UpdateProfileRequest {
            username: Some("taken".into()),
            ..UpdateProfileRequest::default()
        };
        let err = update_profile(&state, &user.uid, req).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn private_view_only_for_subject() {
        let state = AppState::fake();
        let user = seeded(&state, "v@example.com", LoginChannel::Email).await;

        let own = get_identity(&state, &user.uid, Some(&user.uid)).await.unwrap();
        assert!(matches!(own, IdentityView::Private(ref p) if p.email.as_deref() == Some("v@example.com")));

        let other = get_identity(&state, &user.uid, Some("someone-else")).await.unwrap();
        assert!(matches!(other, IdentityView::Public(_)));
        let anonymous = get_identity(&state, &user.uid, None).await.unwrap();
        assert!(matches!(anonymous, IdentityView::Public(_)));

        assert!(matches!(
            get_identity(&state, "missing", None).await,
            Err(ApiError::NotFound)
        ));
    }

    #[tokio::test]
    async fn password_change_requires_current_secret() {
        let state = AppState::fake();
        let user = seeded(&state, "p@example.com", LoginChannel::Email).await;

        let err = change_password(&state, &user.uid, "wrong-secret", "new-secret-1").await.unwrap_err();
        assert!(matches!(err, ApiError::Auth(AuthError::Credential)));

        change_password(&state, &user.uid, "correct-horse", "new-secret-1").await.unwrap();
        let stored = state.users.find_by_uid(&user.uid).await.unwrap().unwrap();
        assert!(verify_password("new-secret-1", &stored.password_hash));
    }

    #[tokio::test]
    async fn profile_fields_are_stored_and_validated() {
        let state = AppState::fake();
        let user = seeded(&state, "prof@example.com", LoginChannel::Email).await;
        assert_eq!(user.sex, Sex::Unknown);
        assert!(user.location.is_none());

        let req = UpdateProfileRequest {
            sex: Some(Sex::Female),
            location: Some("  Lisbon ".into()),
            ..UpdateProfileRequest::default()
        };
        let view = update_profile(&state, &user.uid, req).await.unwrap();
        assert_eq!(view.sex, Sex::Female);
        assert_eq!(view.location.as_deref(), Some("Lisbon"));
        let stored = state.users.find_by_uid(&user.uid).await.unwrap().unwrap();
        assert_eq!((stored.sex, stored.location.as_deref()), (Sex::Female, Some("Lisbon")));

        let too_long = UpdateProfileRequest {
            location: Some("x".repeat(31)),
            ..UpdateProfileRequest::default()
        };
        assert!(matches!(
            update_profile(&state, &user.uid, too_long).await,
            Err(ApiError::Validation(_))
        ));
        let blank = UpdateProfileRequest {
            location: Some("   ".into()),
            ..UpdateProfileRequest::default()
        };
        assert!(matches!(
            update_profile(&state, &user.uid, blank).await,
            Err(ApiError::Validation(_))
        ));
    }
}
