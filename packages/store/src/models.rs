//! 数据模型定义
//!
//! 元数据文件中的条目、文档结构，以及类型化的补丁 [`ItemPatch`]。

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use cuotiben_algo::{
    ReviewState, TrainingRecord, TrainingUpdate, DEFAULT_ANSWER_TIME_LIMIT,
    DEFAULT_TRAINING_INTERVAL, MAX_PROFICIENCY, MIN_PROFICIENCY,
};
use serde::{Deserialize, Serialize};

use crate::fs::FileStat;

/// 默认标签
pub const DEFAULT_TAG: &str = "uncategorized";

pub fn default_tags() -> Vec<String> {
    vec![DEFAULT_TAG.to_string()]
}

// ============================================================
// ItemType - 条目类型
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    #[default]
    Mistake,
    Answer,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mistake => "mistake",
            Self::Answer => "answer",
        }
    }
}

impl std::str::FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mistake" => Ok(Self::Mistake),
            "answer" => Ok(Self::Answer),
            other => Err(format!("unknown item type: {other}")),
        }
    }
}

// ============================================================
// TrackedItem - 错题/答案图片条目
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedItem {
    /// 唯一标识 (UUID)
    pub id: String,
    /// 相对于存储目录的路径，统一使用 `/` 分隔
    pub relative_path: String,
    /// 原始文件名
    pub original_file_name: String,
    /// 上传时间
    pub upload_date: DateTime<Utc>,
    /// 源文件创建时间
    pub original_date: DateTime<Utc>,
    pub file_size: u64,
    pub last_modified: DateTime<Utc>,
    /// 内容哈希，用于去重
    #[serde(rename = "hash", default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// 熟练度 (0-100)
    pub proficiency: i32,
    /// 复习间隔 (天)
    pub training_interval: u32,
    pub last_training_date: DateTime<Utc>,
    pub next_training_date: DateTime<Utc>,
    /// 复习历史，只追加
    #[serde(default)]
    pub training_records: Vec<TrainingRecord>,

    #[serde(default)]
    pub subject: String,
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(rename = "type", default)]
    pub item_type: ItemType,
    #[serde(default)]
    pub pair_id: Option<String>,
    #[serde(default)]
    pub is_paired: bool,

    /// 限时练习的作答时间 (秒)
    #[serde(default = "default_answer_time_limit")]
    pub answer_time_limit: u32,
    /// 冻结后不再进入待复习队列
    #[serde(default)]
    pub is_frozen: bool,
}

fn default_answer_time_limit() -> u32 {
    DEFAULT_ANSWER_TIME_LIMIT
}

impl TrackedItem {
    /// 新上传条目，调度字段取默认值
    pub fn new(
        id: String,
        relative_path: String,
        original_file_name: String,
        stat: &FileStat,
        content_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        let last_modified = stat.modified.unwrap_or(now);
        Self {
            id,
            relative_path,
            original_file_name,
            upload_date: now,
            original_date: stat.created.unwrap_or(last_modified),
            file_size: stat.len,
            last_modified,
            content_hash: Some(content_hash),
            proficiency: MIN_PROFICIENCY,
            training_interval: DEFAULT_TRAINING_INTERVAL,
            last_training_date: now,
            next_training_date: now + Duration::days(DEFAULT_TRAINING_INTERVAL as i64),
            training_records: Vec::new(),
            subject: String::new(),
            tags: default_tags(),
            notes: None,
            item_type: ItemType::Mistake,
            pair_id: None,
            is_paired: false,
            answer_time_limit: DEFAULT_ANSWER_TIME_LIMIT,
            is_frozen: false,
        }
    }

    pub fn review_state(&self) -> ReviewState {
        ReviewState {
            proficiency: self.proficiency,
            training_interval: self.training_interval,
            last_training_date: self.last_training_date,
            next_training_date: self.next_training_date,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_training_date <= now
    }

    pub(crate) fn set_pair(&mut self, pair_id: Option<String>) {
        self.is_paired = pair_id.is_some();
        self.pair_id = pair_id;
    }

    /// 合并训练引擎的结果。新历史必须以现有历史为前缀
    pub(crate) fn apply_training(&mut self, update: TrainingUpdate) -> Result<(), String> {
        let existing = self.training_records.len();
        if update.training_records.len() < existing
            || update.training_records[..existing] != self.training_records[..]
        {
            return Err(format!("training history of {} would be rewritten", self.id));
        }
        self.proficiency = update.proficiency;
        self.training_interval = update.training_interval;
        self.last_training_date = update.last_training_date;
        self.next_training_date = update.next_training_date;
        self.training_records = update.training_records;
        Ok(())
    }
}

// ============================================================
// MetadataDocument - 元数据文件
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataDocument {
    pub version: String,
    pub base_dir: PathBuf,
    #[serde(default)]
    pub files: HashMap<String, TrackedItem>,
}

impl MetadataDocument {
    pub fn empty(version: &str, base_dir: PathBuf) -> Self {
        Self {
            version: version.to_string(),
            base_dir,
            files: HashMap::new(),
        }
    }
}

// ============================================================
// ItemPatch - 类型化的部分更新
// ============================================================

/// 按字段命名的部分更新。`None` 表示不修改该字段。
///
/// 配对状态和复习历史不在这里修改，分别走 `pair`/`unpair` 和 `record_training`。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPatch {
    pub item_type: Option<ItemType>,
    pub subject: Option<String>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` 清空备注
    pub notes: Option<Option<String>>,
    pub proficiency: Option<i32>,
    pub training_interval: Option<u32>,
    pub next_training_date: Option<DateTime<Utc>>,
    pub answer_time_limit: Option<u32>,
    pub is_frozen: Option<bool>,
}

impl ItemPatch {
    pub fn frozen(is_frozen: bool) -> Self {
        Self {
            is_frozen: Some(is_frozen),
            ..Default::default()
        }
    }

    pub fn item_type(item_type: ItemType) -> Self {
        Self {
            item_type: Some(item_type),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(p) = self.proficiency {
            if !(MIN_PROFICIENCY..=MAX_PROFICIENCY).contains(&p) {
                return Err(format!("proficiency {p} outside [{MIN_PROFICIENCY}, {MAX_PROFICIENCY}]"));
            }
        }
        if self.training_interval == Some(0) {
            return Err("trainingInterval must be at least 1 day".to_string());
        }
        if self.answer_time_limit == Some(0) {
            return Err("answerTimeLimit must be positive".to_string());
        }
        if let Some(tags) = &self.tags {
            if tags.iter().all(|t| t.trim().is_empty()) {
                return Err("tags must contain at least one non-empty tag".to_string());
            }
        }
        Ok(())
    }

    pub fn apply(&self, item: &mut TrackedItem) {
        if let Some(item_type) = self.item_type {
            item.item_type = item_type;
        }
        if let Some(subject) = &self.subject {
            item.subject = subject.clone();
        }
        if let Some(tags) = &self.tags {
            item.tags = normalize_tags(tags);
        }
        if let Some(notes) = &self.notes {
            item.notes = notes.clone();
        }
        if let Some(proficiency) = self.proficiency {
            item.proficiency = proficiency;
        }
        if let Some(interval) = self.training_interval {
            item.training_interval = interval;
        }
        if let Some(next) = self.next_training_date {
            item.next_training_date = next;
        }
        if let Some(limit) = self.answer_time_limit {
            item.answer_time_limit = limit;
        }
        if let Some(frozen) = self.is_frozen {
            item.is_frozen = frozen;
        }
    }
}

/// 标签按集合语义处理：去掉空白和重复，保留首次出现的顺序
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

// ============================================================
// 查询与统计
// ============================================================

/// 待复习查询过滤条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueFilter {
    /// 是否包含已冻结条目
    pub include_frozen: bool,
    /// 只返回该类型；`None` 表示全部
    pub item_type: Option<ItemType>,
}

impl Default for DueFilter {
    fn default() -> Self {
        Self {
            include_frozen: false,
            item_type: Some(ItemType::Mistake),
        }
    }
}

impl DueFilter {
    pub fn matches(&self, item: &TrackedItem) -> bool {
        (self.include_frozen || !item.is_frozen)
            && self.item_type.map_or(true, |t| t == item.item_type)
    }
}

/// 删除方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    Single,
    /// 同时删除共享 pairId 的条目
    Cascade,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total: usize,
    pub mistakes: usize,
    pub answers: usize,
    pub paired: usize,
    pub frozen: usize,
    pub due: usize,
    pub total_reviews: usize,
    pub average_proficiency: f64,
}
