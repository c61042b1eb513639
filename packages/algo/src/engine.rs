//! 训练引擎
//!
//! 持有当前生效的配置和对应的调度策略，把一次复习转换为
//! [`TrainingUpdate`]。引擎本身不做持久化，结果由调用方合并保存。

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::config::{validate_config, ConfigError, TrainingConfig};
use crate::policy::{policy_for, SchedulingPolicy};
use crate::types::{ReviewState, TrainingRecord, TrainingResult, TrainingUpdate};

/// 解析复习时间；缺失、为空或无法解析时使用 `now`
///
/// 支持 RFC 3339、`YYYY-MM-DDTHH:MM:SS`（按 UTC）和 `YYYY-MM-DD`（当天零点 UTC）。
pub fn resolve_training_date(raw: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return now;
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return naive.and_utc();
    }
    if let Some(midnight) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return midnight.and_utc();
    }

    tracing::warn!(training_date = raw, "invalid training date, using current time");
    now
}

/// Run one review through `policy` and build the update for the item.
///
/// `history` is copied and the new record appended; earlier records are never touched.
pub fn process_training(
    policy: &dyn SchedulingPolicy,
    state: &ReviewState,
    history: &[TrainingRecord],
    success: bool,
    training_date: DateTime<Utc>,
    answer_time: Option<u64>,
) -> TrainingUpdate {
    let evaluation = policy.evaluate(state, success, training_date);
    let next_training_date = training_date + Duration::days(evaluation.interval_days as i64);

    let mut training_records = Vec::with_capacity(history.len() + 1);
    training_records.extend_from_slice(history);
    training_records.push(TrainingRecord {
        date: training_date,
        result: TrainingResult::from_success(success),
        proficiency_before: state.proficiency,
        proficiency_after: evaluation.proficiency,
        interval_after: evaluation.interval_days,
        is_on_time: evaluation.is_on_time,
        answer_time,
    });

    TrainingUpdate {
        proficiency: evaluation.proficiency,
        training_interval: evaluation.interval_days,
        last_training_date: training_date,
        next_training_date,
        training_records,
    }
}

pub struct TrainingEngine {
    config: TrainingConfig,
    policy: Box<dyn SchedulingPolicy>,
}

impl Default for TrainingEngine {
    fn default() -> Self {
        Self::with_config(TrainingConfig::default())
    }
}

impl std::fmt::Debug for TrainingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingEngine")
            .field("policy", &self.policy.kind())
            .field("config", &self.config)
            .finish()
    }
}

impl TrainingEngine {
    /// 使用已校验的配置创建引擎；配置无效时返回错误
    pub fn new(config: TrainingConfig) -> Result<Self, ConfigError> {
        validate_config(&config)?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: TrainingConfig) -> Self {
        let policy = policy_for(&config);
        Self { config, policy }
    }

    pub fn default_config() -> TrainingConfig {
        TrainingConfig::default()
    }

    pub fn validate_config(config: &TrainingConfig) -> Result<(), ConfigError> {
        validate_config(config)
    }

    /// 替换配置。校验失败时保留原配置
    pub fn update_config(&mut self, config: TrainingConfig) -> Result<(), ConfigError> {
        validate_config(&config)?;
        tracing::info!(policy = config.policy.as_str(), "training config updated");
        *self = Self::with_config(config);
        Ok(())
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn policy(&self) -> &dyn SchedulingPolicy {
        self.policy.as_ref()
    }

    pub fn process_training(
        &self,
        state: &ReviewState,
        history: &[TrainingRecord],
        success: bool,
        training_date: Option<&str>,
        answer_time: Option<u64>,
        now: DateTime<Utc>,
    ) -> TrainingUpdate {
        let training_date = resolve_training_date(training_date, now);
        process_training(self.policy(), state, history, success, training_date, answer_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyKind;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 10, 30, 0).unwrap()
    }

    fn fresh_state(proficiency: i32) -> ReviewState {
        ReviewState {
            proficiency,
            training_interval: 1,
            last_training_date: now() - Duration::days(10),
            next_training_date: now(),
        }
    }

    #[test]
    fn test_resolve_training_date_variants() {
        assert_eq!(resolve_training_date(None, now()), now());
        assert_eq!(resolve_training_date(Some("  "), now()), now());
        assert_eq!(resolve_training_date(Some("yesterday-ish"), now()), now());
        assert_eq!(
            resolve_training_date(Some("2024-06-01T08:00:00.000Z"), now()),
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
        );
        assert_eq!(
            resolve_training_date(Some("2024-06-01T10:00:00+02:00"), now()),
            Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
        );
        assert_eq!(
            resolve_training_date(Some("2024-06-01"), now()),
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_process_training_appends_one_record() {
        let engine = TrainingEngine::default();
        let first = engine.process_training(&fresh_state(50), &[], true, None, Some(4200), now());
        assert_eq!(first.training_records.len(), 1);

        let second = engine.process_training(
            &fresh_state(first.proficiency),
            &first.training_records,
            false,
            Some("2024-06-20T09:00:00Z"),
            None,
            now(),
        );
        assert_eq!(second.training_records.len(), 2);
        assert_eq!(second.training_records[0], first.training_records[0]);

        let latest = second.latest_record().unwrap();
        assert_eq!(latest.result, TrainingResult::Fail);
        assert_eq!(latest.proficiency_before, first.proficiency);
        assert_eq!(latest.answer_time, None);
        assert_eq!(first.training_records[0].answer_time, Some(4200));
    }

    #[test]
    fn test_next_date_is_training_date_plus_interval() {
        let mut config = TrainingConfig::default();
        config.policy = PolicyKind::FixedBand;
        let engine = TrainingEngine::new(config).unwrap();

        let update = engine.process_training(&fresh_state(5), &[], true, Some("2024-07-01T12:00:00Z"), None, now());
        assert_eq!(update.proficiency, 15);
        assert_eq!(update.training_interval, 3);
        assert_eq!(update.last_training_date, Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap());
        assert_eq!(update.next_training_date, Utc.with_ymd_and_hms(2024, 7, 4, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_update_config_keeps_previous_on_error() {
        let mut engine = TrainingEngine::default();
        let mut bad = TrainingConfig::default();
        bad.policy = PolicyKind::FixedBand;
        bad.proficiency_intervals.clear();

        assert!(engine.update_config(bad).is_err());
        assert_eq!(engine.policy().kind(), PolicyKind::DeviationAware);
        assert_eq!(engine.config(), &TrainingConfig::default());

        let mut good = TrainingConfig::default();
        good.policy = PolicyKind::FixedBand;
        engine.update_config(good).unwrap();
        assert_eq!(engine.policy().kind(), PolicyKind::FixedBand);
    }

    #[test]
    fn test_deviation_aware_is_deterministic() {
        let engine = TrainingEngine::default();
        let date = Some("2024-06-15T10:30:00Z");
        let a = engine.process_training(&fresh_state(50), &[], true, date, None, now());
        let b = engine.process_training(&fresh_state(50), &[], true, date, None, now() + Duration::days(3));
        assert_eq!(a, b);
        assert_eq!(a.proficiency, 57);
        assert_eq!(a.training_interval, 14);
    }
}
