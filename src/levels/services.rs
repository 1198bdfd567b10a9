use time::OffsetDateTime;
use tracing::info;

use crate::{
    error::AuthError,
    levels::repo_types::{LevelInfo, LevelState},
    state::AppState,
};

/// `(continuous_days, bonus_exp)` milestones. Awarded when the streak reaches
/// exactly that length on a new login day.
pub const STREAK_BONUSES: [(u32, u64); 4] = [(7, 7), (15, 15), (22, 22), (30, 30)];

pub fn streak_bonus(continuous_days: u32) -> Option<u64> {
    STREAK_BONUSES
        .iter()
        .find(|(days, _)| *days == continuous_days)
        .map(|(_, exp)| *exp)
}

pub async fn grant_experience(state: &AppState, user_uid: &str, delta: u64) -> Result<LevelInfo, AuthError> {
    grant_experience_at(state, user_uid, delta, OffsetDateTime::now_utc()).await
}

pub async fn grant_experience_at(
    state: &AppState,
    user_uid: &str,
    delta: u64,
    now: OffsetDateTime,
) -> Result<LevelInfo, AuthError> {
    let before = state.levels.get(user_uid).await.map_err(AuthError::storage)?;
    let after = state
        .levels
        .apply_exp(user_uid, delta, &state.curve, now)
        .await
        .map_err(AuthError::storage)?;

    let previous_lv = before.map(|s| s.lv).unwrap_or(0);
    if after.lv > previous_lv {
        info!(user_uid = %user_uid, from = previous_lv, to = after.lv, exp = after.exp, "level up");
    }
    Ok(LevelInfo::from_state(&after))
}

/// Current progression; users without a row are at level 0.
pub async fn level_info(state: &AppState, user_uid: &str) -> Result<LevelInfo, AuthError> {
    let stored = state.levels.get(user_uid).await.map_err(AuthError::storage)?;
    let level = stored
        .unwrap_or_else(|| LevelState::fresh(user_uid, &state.curve, OffsetDateTime::now_utc()));
    Ok(LevelInfo::from_state(&level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bonuses_only_on_milestones() {
        assert_eq!(streak_bonus(7), Some(7));
        assert_eq!(streak_bonus(30), Some(30));
        assert_eq!(streak_bonus(8), None);
        assert_eq!(streak_bonus(31), None);
        assert_eq!(streak_bonus(1), None);
    }

    #[tokio::test]
    async fn default_curve_scenario() {
        let state = AppState::fake();
        let start = level_info(&state, "u1").await.unwrap();
        assert_eq!((start.level, start.exp, start.exp_to_next_level), (0, 0, 100));

        let one = grant_experience(&state, "u1", 100).await.unwrap();
        assert_eq!((one.level, one.exp_to_next_level), (1, 50));

        let top = grant_experience(&state, "u1", 3744).await.unwrap();
        assert_eq!(top.exp, 3844);
        assert_eq!((top.level, top.exp_to_next_level), (top.max_level, 0));

        assert_eq!(level_info(&state, "u1").await.unwrap(), top);
    }
}
