use serde::Serialize;
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::{error, info, warn};

use crate::{
    cache::StreakSnapshot,
    error::AuthError,
    levels::services::{grant_experience_at, streak_bonus},
    state::AppState,
    users::repo_types::UserPatch,
};

/// What a login on `today` does to the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakStep {
    /// First login of a new calendar day; a record carrying this count is appended.
    Append(u32),
    /// Already logged in today; nothing is appended.
    SameDay(u32),
}

/// Day-granularity streak rule. `last` is the newest record as
/// `(login_date, continuous_days)`.
pub fn next_streak(last: Option<(Date, u32)>, today: Date) -> StreakStep {
    let Some((last_date, days)) = last else {
        return StreakStep::Append(1);
    };
    match (today - last_date).whole_days() {
        // a record dated after today (clock skew) counts as today
        d if d <= 0 => StreakStep::SameDay(days),
        1 => StreakStep::Append(days.saturating_add(1)),
        _ => StreakStep::Append(1),
    }
}

/// Calendar date of `now` in the service's canonical timezone.
pub fn local_date(now: OffsetDateTime, offset: UtcOffset) -> Date {
    now.to_offset(offset).date()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreakInfo {
    pub continuous_days: u32,
    pub last_login_date: Option<Date>,
    /// True when this call appended the day's login record.
    pub new_day: bool,
    /// Experience awarded for reaching a streak milestone on this call.
    pub bonus_exp: u64,
}

/// Records a login for `now`. Idempotent per calendar day.
///
/// Durable writes (login record, last-activity) commit before the cache
/// projection is refreshed.
pub async fn record_engagement_at(
    state: &AppState,
    user_id: i64,
    user_uid: &str,
    now: OffsetDateTime,
) -> Result<StreakInfo, AuthError> {
    let today = local_date(now, state.config.day_offset);
    let last = state
        .logins
        .latest(user_uid)
        .await
        .map_err(AuthError::storage)?;

    let step = next_streak(
        last.as_ref()
            .map(|r| (r.login_date, r.continuous_days.max(0) as u32)),
        today,
    );

    let (days, new_day) = match step {
        StreakStep::Append(days) => {
            let inserted = state
                .logins
                .record_login(user_id, user_uid, today, now, days)
                .await
                .map_err(AuthError::storage)?;
            if inserted {
                (days, true)
            } else {
                // a concurrent request won the day's insert
                let current = state
                    .logins
                    .latest(user_uid)
                    .await
                    .map_err(AuthError::storage)?
                    .map(|r| r.continuous_days.max(0) as u32)
                    .unwrap_or(days);
                touch_user(state, user_id, now).await?;
                (current, false)
            }
        }
        StreakStep::SameDay(days) => {
            touch_user(state, user_id, now).await?;
            (days, false)
        }
    };

    let last_login_date = if new_day {
        today
    } else {
        last.as_ref().map(|r| r.login_date).unwrap_or(today)
    };
    state
        .cache
        .store_streak(
            user_uid,
            &StreakSnapshot {
                last_login_date,
                last_login_time: now,
                continuous_days: days,
            },
        )
        .await;

    let mut bonus_exp = 0;
    if new_day {
        sync_login_history(state, user_uid, last.as_ref().map(|r| r.login_date), today).await;
        if let Some(bonus) = streak_bonus(days) {
            match grant_experience_at(state, user_uid, bonus, now).await {
                Ok(_) => bonus_exp = bonus,
                Err(e) => error!(user_uid = %user_uid, error = %e, "streak bonus not granted"),
            }
        }
        info!(user_uid = %user_uid, continuous_days = days, bonus_exp, "new login day");
    }

    Ok(StreakInfo {
        continuous_days: days,
        last_login_date: Some(last_login_date),
        new_day,
        bonus_exp,
    })
}

/// Prepends `today` when the cached list ends at the previous durable login.
/// Otherwise the list is missing or partial and is rebuilt from the login
/// records.
async fn sync_login_history(state: &AppState, user_uid: &str, previous: Option<Date>, today: Date) {
    let head = state
        .cache
        .login_dates(user_uid)
        .await
        .and_then(|dates| dates.first().copied());
    if previous.is_some() && head == previous {
        state.cache.push_login_date(user_uid, today).await;
        return;
    }
    match state.logins.recent_dates(user_uid, state.cache.history_len()).await {
        Ok(dates) => state.cache.store_login_dates(user_uid, &dates).await,
        Err(e) => {
            warn!(user_uid = %user_uid, error = %e, "login history not rebuilt; dropping cached list");
            state.cache.store_login_dates(user_uid, &[]).await;
        }
    }
}

async fn touch_user(state: &AppState, user_id: i64, now: OffsetDateTime) -> Result<(), AuthError> {
    let patch = UserPatch {
        last_active_at: Some(now),
        ..UserPatch::default()
    };
    state
        .users
        .update_fields(user_id, &patch)
        .await
        .map_err(AuthError::storage)?;
    Ok(())
}

/// Days still counted on `today`: a streak whose last login is two or
/// more days old is already broken.
fn live_days(last_login_date: Date, days: u32, today: Date) -> u32 {
    if (today - last_login_date).whole_days() >= 2 {
        0
    } else {
        days
    }
}

pub async fn current_streak(state: &AppState, user_uid: &str) -> Result<StreakInfo, AuthError> {
    current_streak_at(state, user_uid, OffsetDateTime::now_utc()).await
}

/// Streak as seen on the day of `now`. Reads the cache projection first
/// and rebuilds it from the durable store on a miss.
pub async fn current_streak_at(
    state: &AppState,
    user_uid: &str,
    now: OffsetDateTime,
) -> Result<StreakInfo, AuthError> {
    let today = local_date(now, state.config.day_offset);
    if let Some(cached) = state.cache.streak(user_uid).await {
        return Ok(StreakInfo {
            continuous_days: live_days(cached.last_login_date, cached.continuous_days, today),
            last_login_date: Some(cached.last_login_date),
            new_day: false,
            bonus_exp: 0,
        });
    }

    let latest = state
        .logins
        .latest(user_uid)
        .await
        .map_err(AuthError::storage)?;
    let Some(record) = latest else {
        return Ok(StreakInfo {
            continuous_days: 0,
            last_login_date: None,
            new_day: false,
            bonus_exp: 0,
        });
    };

    let days = record.continuous_days.max(0) as u32;
    state
        .cache
        .store_streak(
            user_uid,
            &StreakSnapshot {
                last_login_date: record.login_date,
                last_login_time: record.login_at,
                continuous_days: days,
            },
        )
        .await;

    Ok(StreakInfo {
        continuous_days: live_days(record.login_date, days, today),
        last_login_date: Some(record.login_date),
        new_day: false,
        bonus_exp: 0,
    })
}

/// Newest-first login dates, from the cache list or, on a miss, the durable
/// store (which also refills the list).
pub async fn login_history(state: &AppState, user_uid: &str) -> Result<Vec<Date>, AuthError> {
    if let Some(dates) = state.cache.login_dates(user_uid).await {
        return Ok(dates);
    }
    let dates = state
        .logins
        .recent_dates(user_uid, state.cache.history_len())
        .await
        .map_err(AuthError::storage)?;
    state.cache.store_login_dates(user_uid, &dates).await;
    Ok(dates)
}
