use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::levels::curve::ThresholdCurve;

/// Persisted progression row, one per user.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct LevelState {
    pub user_uid: String,
    pub lv: i32,
    pub max_lv: i32,
    pub exp: i64,
    /// Cumulative experience needed for `lv + 1`; `0` at the ceiling.
    pub next_lv: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl LevelState {
    pub fn fresh(user_uid: &str, curve: &ThresholdCurve, now: OffsetDateTime) -> Self {
        Self {
            user_uid: user_uid.to_string(),
            lv: 0,
            max_lv: curve.max_level() as i32,
            exp: 0,
            next_lv: curve.threshold(1).unwrap_or(0) as i64,
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds `delta` and recomputes the level. The level never goes down, even
    /// if the curve was reconfigured since the row was written.
    pub fn advanced(&self, delta: u64, curve: &ThresholdCurve, now: OffsetDateTime) -> anyhow::Result<Self> {
        let delta = i64::try_from(delta)?;
        let exp = self
            .exp
            .checked_add(delta)
            .ok_or_else(|| anyhow::anyhow!("experience overflow for {}", self.user_uid))?;
        let progress = curve.level_for(exp.max(0) as u64);
        let lv = (progress.level as i32).max(self.lv);
        let next_lv = curve
            .threshold(lv as u32 + 1)
            .map(|t| t as i64)
            .unwrap_or(0);
        Ok(Self {
            user_uid: self.user_uid.clone(),
            lv,
            max_lv: curve.max_level() as i32,
            exp,
            next_lv,
            created_at: self.created_at,
            updated_at: now,
        })
    }
}

/// What callers see of a user's progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelInfo {
    pub level: u32,
    pub max_level: u32,
    pub exp: u64,
    pub exp_to_next_level: u64,
}

impl LevelInfo {
    pub fn from_state(state: &LevelState) -> Self {
        let exp = state.exp.max(0) as u64;
        let next = state.next_lv.max(0) as u64;
        Self {
            level: state.lv.max(0) as u32,
            max_level: state.max_lv.max(0) as u32,
            exp,
            exp_to_next_level: next.saturating_sub(exp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn advancing_crosses_thresholds_and_clamps() {
        let curve = ThresholdCurve::new(100.0, 1.5, 3).unwrap();
        let now = datetime!(2025-01-01 00:00 UTC);
        let start = LevelState::fresh("u1", &curve, now);
        assert_eq!(LevelInfo::from_state(&start).exp_to_next_level, 100);

        let one = start.advanced(100, &curve, now).unwrap();
        assert_eq!((one.lv, one.next_lv), (1, 150));
        assert_eq!(LevelInfo::from_state(&one).exp_to_next_level, 50);

        let capped = one.advanced(10_000, &curve, now).unwrap();
        assert_eq!((capped.lv, capped.next_lv), (3, 0));
        assert_eq!(LevelInfo::from_state(&capped).exp_to_next_level, 0);
    }

    #[test]
    fn level_does_not_drop_when_curve_steepens() {
        let now = datetime!(2025-01-01 00:00 UTC);
        let gentle = ThresholdCurve::new(10.0, 1.5, 10).unwrap();
        let steep = ThresholdCurve::new(1000.0, 2.0, 10).unwrap();
        let state = LevelState::fresh("u1", &gentle, now).advanced(50, &gentle, now).unwrap();
        assert!(state.lv > 0);
        let after = state.advanced(1, &steep, now).unwrap();
        assert_eq!(after.lv, state.lv);
    }
}
