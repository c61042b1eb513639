//! # cuotiben-store - 错题图片存储
//!
//! 管理每个成员的错题/答案图片及其元数据:
//!
//! - **Metadata store** - 条目增删改、内容去重、配对、按磁盘校验、原子保存
//! - **Schema upgrade** - 每次加载时补齐旧版本缺失的字段
//! - **Migration** - 整体迁移存储目录，失败时完整回滚
//! - **Members** - 多成员注册表，每个成员独立的存储目录
//! - **Exams** - 限时练习记录
//!
//! 复习调度算法在 `cuotiben-algo` 中，[`Session`] 负责把两者接起来。

// ============================================================================
// 模块声明
// ============================================================================

pub mod clock;
pub mod config;
pub mod error;
pub mod exam;
pub mod fs;
pub mod hasher;
pub mod logging;
pub mod members;
pub mod metadata;
pub mod models;
pub mod session;

// ============================================================================
// 重新导出
// ============================================================================

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::AppConfig;
pub use error::{StoreError, StoreResult};
pub use exam::{ExamItem, ExamItemPatch, ExamItemStatus, ExamManager, ExamPatch, ExamRecord, ExamStatus};
pub use fs::{FileStat, FileSystem, LocalFs};
pub use members::{MemberInfo, MemberManager, DEFAULT_MEMBER};
pub use metadata::{MetadataStore, MigrationReport, CURRENT_SCHEMA_VERSION, METADATA_FILE};
pub use models::{
    DeleteMode, DueFilter, ItemPatch, ItemType, MetadataDocument, StoreStats, TrackedItem,
    DEFAULT_TAG,
};
pub use session::Session;
