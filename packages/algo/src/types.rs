//! Common Types and Constants
//!
//! Shared data structures used by the scheduling policies and the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==================== Constants ====================

/// 熟练度下限
pub const MIN_PROFICIENCY: i32 = 0;

/// 熟练度上限
pub const MAX_PROFICIENCY: i32 = 100;

/// 新条目的默认复习间隔 (天)
pub const DEFAULT_TRAINING_INTERVAL: u32 = 1;

/// 限时练习中每题的默认作答时间 (秒)
pub const DEFAULT_ANSWER_TIME_LIMIT: u32 = 300;

/// Clamp a proficiency value into `[MIN_PROFICIENCY, MAX_PROFICIENCY]`.
pub fn clamp_proficiency(value: i64) -> i32 {
    value.clamp(MIN_PROFICIENCY as i64, MAX_PROFICIENCY as i64) as i32
}

// ==================== Review Types ====================

/// 一次复习的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingResult {
    Success,
    Fail,
}

impl TrainingResult {
    pub fn from_success(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Fail
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }
}

/// 单次复习记录，追加后不可修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingRecord {
    /// 复习时间
    pub date: DateTime<Utc>,
    /// 复习结果
    pub result: TrainingResult,
    /// 复习前熟练度
    pub proficiency_before: i32,
    /// 复习后熟练度
    pub proficiency_after: i32,
    /// 本次复习后设置的间隔 (天)
    pub interval_after: u32,
    /// 是否在到期日当天或之前完成
    pub is_on_time: bool,
    /// 作答耗时 (毫秒)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_time: Option<u64>,
}

/// Scheduling state of one item as seen by a policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewState {
    pub proficiency: i32,
    pub training_interval: u32,
    pub last_training_date: DateTime<Utc>,
    pub next_training_date: DateTime<Utc>,
}

/// What a policy decides for a single review.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub proficiency: i32,
    pub interval_days: u32,
    pub is_on_time: bool,
}

/// Fields the caller merges back into the item after a review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingUpdate {
    pub proficiency: i32,
    pub training_interval: u32,
    pub last_training_date: DateTime<Utc>,
    pub next_training_date: DateTime<Utc>,
    pub training_records: Vec<TrainingRecord>,
}

impl TrainingUpdate {
    /// 最新追加的复习记录
    pub fn latest_record(&self) -> Option<&TrainingRecord> {
        self.training_records.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_proficiency_bounds() {
        assert_eq!(clamp_proficiency(-25), 0);
        assert_eq!(clamp_proficiency(42), 42);
        assert_eq!(clamp_proficiency(250), 100);
        assert_eq!(clamp_proficiency(i64::MIN), 0);
    }

    #[test]
    fn test_training_result_serde() {
        let json = serde_json::to_string(&TrainingResult::Fail).unwrap();
        assert_eq!(json, "\"fail\"");
        let parsed: TrainingResult = serde_json::from_str("\"success\"").unwrap();
        assert!(parsed.is_success());
    }

    #[test]
    fn test_record_skips_missing_answer_time() {
        let record = TrainingRecord {
            date: "2024-03-01T08:00:00Z".parse().unwrap(),
            result: TrainingResult::Success,
            proficiency_before: 10,
            proficiency_after: 20,
            interval_after: 3,
            is_on_time: true,
            answer_time: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("answerTime").is_none());
        assert_eq!(value["proficiencyAfter"], 20);
        assert_eq!(value["isOnTime"], true);
    }
}
