//! 调度策略
//!
//! - [`FixedBandPolicy`]: 熟练度 ±10，按区间表查间隔，不考虑时间偏差
//! - [`DeviationAwarePolicy`]: 按实际间隔和提前/延后天数连续调整
//!
//! 所有日期比较只看 UTC 日历日，忽略一天内的时间。

use chrono::{DateTime, Utc};

use crate::config::{
    BaseAdjustment, IntervalBounds, IntervalMultiplier, PolicyKind, ProficiencyBand,
    ProficiencyThresholds, TimeRule, TrainingConfig,
};
use crate::types::{clamp_proficiency, Evaluation, ReviewState, DEFAULT_TRAINING_INTERVAL};

/// Fixed step used by the band-table policy.
pub const FIXED_BAND_STEP: i32 = 10;

pub trait SchedulingPolicy: Send + Sync {
    fn kind(&self) -> PolicyKind;

    /// Decide new proficiency, interval and punctuality for one review.
    fn evaluate(&self, state: &ReviewState, success: bool, training_date: DateTime<Utc>) -> Evaluation;
}

/// Whole calendar days from `from` to `to` (negative when `to` is earlier).
pub fn calendar_days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to.date_naive() - from.date_naive()).num_days()
}

/// Build the policy selected by `config.policy`.
pub fn policy_for(config: &TrainingConfig) -> Box<dyn SchedulingPolicy> {
    match config.policy {
        PolicyKind::FixedBand => Box::new(FixedBandPolicy::from_config(config)),
        PolicyKind::DeviationAware => Box::new(DeviationAwarePolicy::from_config(config)),
    }
}

// ============================================================
// Policy A - 固定区间表
// ============================================================

#[derive(Debug, Clone)]
pub struct FixedBandPolicy {
    bands: Vec<ProficiencyBand>,
}

impl FixedBandPolicy {
    pub fn new(bands: Vec<ProficiencyBand>) -> Self {
        Self { bands }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(config.proficiency_intervals.clone())
    }

    pub fn calculate_new_proficiency(&self, current: i32, success: bool) -> i32 {
        let step = if success { FIXED_BAND_STEP } else { -FIXED_BAND_STEP };
        clamp_proficiency(current as i64 + step as i64)
    }

    /// 查找包含该熟练度的区间；找不到时退回第一个区间的间隔
    pub fn calculate_next_interval(&self, proficiency: i32) -> u32 {
        self.bands
            .iter()
            .find(|band| band.contains(proficiency))
            .or_else(|| self.bands.first())
            .map(|band| band.interval)
            .unwrap_or(DEFAULT_TRAINING_INTERVAL)
    }
}

impl SchedulingPolicy for FixedBandPolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::FixedBand
    }

    fn evaluate(&self, state: &ReviewState, success: bool, _training_date: DateTime<Utc>) -> Evaluation {
        let proficiency = self.calculate_new_proficiency(state.proficiency, success);
        Evaluation {
            proficiency,
            interval_days: self.calculate_next_interval(proficiency),
            is_on_time: true,
        }
    }
}

// ============================================================
// Policy B - 连续、考虑时间偏差
// ============================================================

#[derive(Debug, Clone)]
pub struct DeviationAwarePolicy {
    base_adjustment: BaseAdjustment,
    interval_multiplier: IntervalMultiplier,
    time_rules: Vec<TimeRule>,
    thresholds: ProficiencyThresholds,
    bounds: IntervalBounds,
}

impl DeviationAwarePolicy {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            base_adjustment: config.base_adjustment,
            interval_multiplier: config.interval_multiplier,
            time_rules: config.time_rules.clone(),
            thresholds: config.proficiency_thresholds,
            bounds: config.intervals,
        }
    }

    /// 正数表示延后复习，负数表示提前，0 表示当天
    pub fn time_deviation(&self, next_training_date: DateTime<Utc>, training_date: DateTime<Utc>) -> i64 {
        calendar_days_between(next_training_date, training_date)
    }

    /// 第一条匹配规则的加成；都不匹配时取最后一条规则的加成
    pub fn time_bonus(&self, deviation: i64) -> i32 {
        self.time_rules
            .iter()
            .find(|rule| rule.contains(deviation))
            .or_else(|| self.time_rules.last())
            .map(|rule| rule.bonus)
            .unwrap_or(0)
    }

    pub fn calculate_new_proficiency(&self, current: i32, success: bool, time_bonus: i32) -> i32 {
        let base = if success {
            self.base_adjustment.success
        } else {
            self.base_adjustment.fail
        };
        clamp_proficiency(current as i64 + base as i64 + time_bonus as i64)
    }

    /// 分段函数；各段斜率不同，整体并不单调
    pub fn proficiency_factor(&self, proficiency: i32) -> f64 {
        let remaining = 1.0 - proficiency as f64 / 100.0;
        let t = &self.thresholds;
        if proficiency < t.low {
            1.0 + remaining * 0.2
        } else if proficiency < t.medium {
            1.0 + remaining * 0.3
        } else if proficiency < t.high {
            1.0 + remaining * 0.4
        } else {
            1.0 + remaining.powi(2) * 0.5
        }
    }

    pub fn calculate_next_interval(&self, actual_interval_days: i64, success: bool, factor: f64) -> u32 {
        let multiplier = if success {
            self.interval_multiplier.success
        } else {
            self.interval_multiplier.fail
        };
        let raw = (actual_interval_days as f64 * multiplier * factor).round();
        let (min, max) = (self.bounds.min as f64, self.bounds.max.max(self.bounds.min) as f64);
        if raw.is_nan() {
            return self.bounds.min;
        }
        raw.clamp(min, max) as u32
    }
}

impl SchedulingPolicy for DeviationAwarePolicy {
    fn kind(&self) -> PolicyKind {
        PolicyKind::DeviationAware
    }

    /// `training_date` 同时作为 "今天"：实际间隔按上次训练到 `training_date` 计算，不读取系统时钟
    fn evaluate(&self, state: &ReviewState, success: bool, training_date: DateTime<Utc>) -> Evaluation {
        let deviation = self.time_deviation(state.next_training_date, training_date);
        let bonus = self.time_bonus(deviation);
        let proficiency = self.calculate_new_proficiency(state.proficiency, success, bonus);
        let factor = self.proficiency_factor(proficiency);
        let actual_interval = calendar_days_between(state.last_training_date, training_date);

        Evaluation {
            proficiency,
            interval_days: self.calculate_next_interval(actual_interval, success, factor),
            is_on_time: deviation <= 0,
        }
    }
}
