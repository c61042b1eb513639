//! # cuotiben-algo - 错题复习调度算法库
//!
//! 本 crate 提供纯 Rust 实现的复习调度逻辑:
//!
//! - **Fixed band policy** - 熟练度固定步长，按区间表给出复习间隔
//! - **Deviation-aware policy** - 根据实际间隔与提前/延后天数连续调整
//! - **Training engine** - 配置校验、策略选择、生成复习记录
//!
//! 引擎是输入加配置的纯函数，不做任何持久化。
//!
//! ## 模块结构
//!
//! - [`config`] - 训练配置、默认值、校验与读写
//! - [`policy`] - `SchedulingPolicy` 及两种实现
//! - [`engine`] - `TrainingEngine` 与 `process_training`
//! - [`types`] - 公共类型和常量
//!
//! ## 使用示例
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use cuotiben_algo::{ReviewState, TrainingEngine};
//!
//! let engine = TrainingEngine::default();
//! let now = Utc::now();
//! let state = ReviewState {
//!     proficiency: 50,
//!     training_interval: 7,
//!     last_training_date: now - Duration::days(10),
//!     next_training_date: now,
//! };
//! let update = engine.process_training(&state, &[], true, None, None, now);
//! assert_eq!(update.proficiency, 57);
//! assert_eq!(update.training_records.len(), 1);
//! ```

// ============================================================================
// 模块声明
// ============================================================================

pub mod config;
pub mod engine;
pub mod policy;
pub mod types;

// ============================================================================
// 重新导出
// ============================================================================

pub use types::*;

pub use config::{
    load_config, read_config, save_config, validate_config, BaseAdjustment, ConfigError,
    IntervalBounds, IntervalMultiplier, PolicyKind, ProficiencyBand, ProficiencyThresholds,
    TimeRule, TrainingConfig,
};

pub use engine::{process_training, resolve_training_date, TrainingEngine};

pub use policy::{
    calendar_days_between, policy_for, DeviationAwarePolicy, FixedBandPolicy, SchedulingPolicy,
};
