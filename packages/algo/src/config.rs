//! 训练配置
//!
//! 两种调度策略共用一份配置文档。每个字段都带 serde 默认值，
//! 只包含部分字段的配置文件也能加载；加载后必须通过 [`validate_config`]。

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{MAX_PROFICIENCY, MIN_PROFICIENCY};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid training config: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 调度策略选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyKind {
    /// 固定熟练度区间表
    FixedBand,
    /// 连续、考虑复习时间偏差
    #[default]
    DeviationAware,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedBand => "fixedBand",
            Self::DeviationAware => "deviationAware",
        }
    }
}

/// 熟练度区间 → 复习间隔
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProficiencyBand {
    pub range: [i32; 2],
    pub interval: u32,
    #[serde(default)]
    pub description: String,
}

impl ProficiencyBand {
    fn new(lo: i32, hi: i32, interval: u32, description: &str) -> Self {
        Self {
            range: [lo, hi],
            interval,
            description: description.to_string(),
        }
    }

    pub fn contains(&self, proficiency: i32) -> bool {
        proficiency >= self.range[0] && proficiency <= self.range[1]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaseAdjustment {
    pub success: i32,
    pub fail: i32,
}

impl Default for BaseAdjustment {
    fn default() -> Self {
        Self { success: 5, fail: -10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalMultiplier {
    pub success: f64,
    pub fail: f64,
}

impl Default for IntervalMultiplier {
    fn default() -> Self {
        Self {
            success: 1.2,
            fail: 0.8,
        }
    }
}

/// 时间偏差规则。`range` 两端为 `null` 表示无界。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRule {
    pub range: (Option<i64>, Option<i64>),
    pub bonus: i32,
    #[serde(default)]
    pub description: String,
}

impl TimeRule {
    fn new(lo: Option<i64>, hi: Option<i64>, bonus: i32, description: &str) -> Self {
        Self {
            range: (lo, hi),
            bonus,
            description: description.to_string(),
        }
    }

    pub fn contains(&self, deviation: i64) -> bool {
        let (lo, hi) = self.range;
        lo.map_or(true, |lo| deviation >= lo) && hi.map_or(true, |hi| deviation <= hi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProficiencyThresholds {
    pub low: i32,
    pub medium: i32,
    pub high: i32,
}

impl Default for ProficiencyThresholds {
    fn default() -> Self {
        Self {
            low: 30,
            medium: 70,
            high: 90,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalBounds {
    pub min: u32,
    pub max: u32,
}

impl Default for IntervalBounds {
    fn default() -> Self {
        Self { min: 1, max: 21 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainingConfig {
    pub policy: PolicyKind,
    pub proficiency_intervals: Vec<ProficiencyBand>,
    pub base_adjustment: BaseAdjustment,
    pub interval_multiplier: IntervalMultiplier,
    pub time_rules: Vec<TimeRule>,
    pub proficiency_thresholds: ProficiencyThresholds,
    pub intervals: IntervalBounds,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            proficiency_intervals: default_proficiency_intervals(),
            base_adjustment: BaseAdjustment::default(),
            interval_multiplier: IntervalMultiplier::default(),
            time_rules: default_time_rules(),
            proficiency_thresholds: ProficiencyThresholds::default(),
            intervals: IntervalBounds::default(),
        }
    }
}

pub fn default_proficiency_intervals() -> Vec<ProficiencyBand> {
    vec![
        ProficiencyBand::new(0, 9, 1, "beginner"),
        ProficiencyBand::new(10, 19, 3, "basic"),
        ProficiencyBand::new(20, 39, 7, "intermediate"),
        ProficiencyBand::new(40, 69, 14, "proficient"),
        ProficiencyBand::new(70, 89, 21, "advanced"),
        ProficiencyBand::new(90, 100, 30, "expert"),
    ]
}

pub fn default_time_rules() -> Vec<TimeRule> {
    vec![
        TimeRule::new(Some(-1), Some(0), 2, "on time or one day early"),
        TimeRule::new(Some(-3), Some(-2), 0, "slightly early"),
        TimeRule::new(Some(-7), Some(-4), -1, "too early"),
        TimeRule::new(Some(1), Some(2), -1, "slightly late"),
        TimeRule::new(Some(3), Some(7), -2, "late"),
        TimeRule::new(Some(8), None, -3, "very late"),
    ]
}

/// 校验配置，收集全部问题后一次性返回
pub fn validate_config(config: &TrainingConfig) -> Result<(), ConfigError> {
    let mut problems = Vec::new();

    if config.proficiency_intervals.is_empty() {
        problems.push("proficiencyIntervals must not be empty".to_string());
    }
    for (i, band) in config.proficiency_intervals.iter().enumerate() {
        let [lo, hi] = band.range;
        if lo > hi {
            problems.push(format!("proficiencyIntervals[{i}]: range start {lo} exceeds end {hi}"));
        }
        if lo < MIN_PROFICIENCY || hi > MAX_PROFICIENCY {
            problems.push(format!(
                "proficiencyIntervals[{i}]: range [{lo}, {hi}] outside [{MIN_PROFICIENCY}, {MAX_PROFICIENCY}]"
            ));
        }
        if band.interval == 0 {
            problems.push(format!("proficiencyIntervals[{i}]: interval must be at least 1 day"));
        }
    }

    if config.time_rules.is_empty() {
        problems.push("timeRules must not be empty".to_string());
    }
    for (i, rule) in config.time_rules.iter().enumerate() {
        if let (Some(lo), Some(hi)) = rule.range {
            if lo > hi {
                problems.push(format!("timeRules[{i}]: range start {lo} exceeds end {hi}"));
            }
        }
    }

    let multiplier = &config.interval_multiplier;
    for (name, value) in [("success", multiplier.success), ("fail", multiplier.fail)] {
        if !value.is_finite() || value <= 0.0 {
            problems.push(format!("intervalMultiplier.{name} must be a positive number, got {value}"));
        }
    }

    let t = &config.proficiency_thresholds;
    if !(MIN_PROFICIENCY <= t.low && t.low <= t.medium && t.medium <= t.high && t.high <= MAX_PROFICIENCY) {
        problems.push(format!(
            "proficiencyThresholds must satisfy 0 <= low <= medium <= high <= 100, got {}/{}/{}",
            t.low, t.medium, t.high
        ));
    }

    let bounds = &config.intervals;
    if bounds.min == 0 {
        problems.push("intervals.min must be at least 1 day".to_string());
    }
    if bounds.min > bounds.max {
        problems.push(format!("intervals.min {} exceeds intervals.max {}", bounds.min, bounds.max));
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Invalid(problems))
    }
}

/// 严格读取配置文件：读取、解析、校验任一步失败都返回错误
pub fn read_config(path: &Path) -> Result<TrainingConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let config: TrainingConfig = serde_json::from_str(&raw)?;
    validate_config(&config)?;
    Ok(config)
}

/// 读取配置文件，失败时回退到默认配置
pub fn load_config(path: &Path) -> TrainingConfig {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "training config not found, using defaults");
        return TrainingConfig::default();
    }
    match read_config(path) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "training config rejected, using defaults");
            TrainingConfig::default()
        }
    }
}

pub fn save_config(path: &Path, config: &TrainingConfig) -> Result<(), ConfigError> {
    validate_config(config)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;

    // 先写临时文件再 rename，中途崩溃不会留下截断的配置
    let mut temp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);
    std::fs::write(&temp_path, json)?;
    if let Err(err) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(err.into());
    }
    Ok(())
}
