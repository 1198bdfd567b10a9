use serde::Serialize;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CurveError {
    #[error("base experience must be a positive finite number, got {0}")]
    InvalidBase(f64),
    #[error("growth factor must be a finite number greater than 1, got {0}")]
    InvalidGrowth(f64),
    #[error("max level must be at least 1")]
    NoLevels,
    #[error("threshold of level {0} does not fit in the experience counter")]
    Overflow(u32),
}

/// Where a cumulative experience total sits on the curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelProgress {
    pub level: u32,
    /// Experience still missing for the next level; `0` at the ceiling.
    pub exp_to_next_level: u64,
}

/// Ascending table of cumulative experience needed per level.
///
/// `t[0] = 0` and `t[L] = floor(base * growth^(L-1))` for `1 <= L <= max_lv`,
/// bumped where needed so the table stays strictly increasing.
#[derive(Debug, Clone)]
pub struct ThresholdCurve {
    thresholds: Vec<u64>,
}

impl ThresholdCurve {
    pub fn new(base_exp: f64, growth_factor: f64, max_lv: u32) -> Result<Self, CurveError> {
        if !base_exp.is_finite() || base_exp <= 0.0 {
            return Err(CurveError::InvalidBase(base_exp));
        }
        if !growth_factor.is_finite() || growth_factor <= 1.0 {
            return Err(CurveError::InvalidGrowth(growth_factor));
        }
        if max_lv == 0 {
            return Err(CurveError::NoLevels);
        }

        let mut thresholds = Vec::with_capacity(max_lv as usize + 1);
        thresholds.push(0u64);
        for level in 1..=max_lv {
            let raw = (base_exp * growth_factor.powi(level as i32 - 1)).floor();
            if !raw.is_finite() || raw >= u64::MAX as f64 {
                return Err(CurveError::Overflow(level));
            }
            let prev = thresholds[thresholds.len() - 1];
            thresholds.push((raw as u64).max(prev + 1));
        }
        Ok(Self { thresholds })
    }

    pub fn max_level(&self) -> u32 {
        (self.thresholds.len() - 1) as u32
    }

    pub fn threshold(&self, level: u32) -> Option<u64> {
        self.thresholds.get(level as usize).copied()
    }

    /// Greatest level whose threshold is `<= total`, clamped at the ceiling.
    pub fn level_for(&self, total: u64) -> LevelProgress {
        // t[0] == 0, so at least one entry is always <= total
        let level = self.thresholds.partition_point(|&t| t <= total) - 1;
        match self.thresholds.get(level + 1) {
            Some(next) => LevelProgress {
                level: level as u32,
                exp_to_next_level: next - total,
            },
            None => LevelProgress {
                level: self.max_level(),
                exp_to_next_level: 0,
            },
        }
    }
}
