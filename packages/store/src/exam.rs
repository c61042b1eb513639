//! 限时练习 (考试) 记录
//!
//! 每条记录一个 JSON 文件，按状态存放在 `exams/ongoing/` 或 `exams/completed/` 下。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::fs::{write_atomic, FileSystem};
use crate::models::TrackedItem;
use crate::{StoreError, StoreResult};

const ONGOING_DIR: &str = "ongoing";
const COMPLETED_DIR: &str = "completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamStatus {
    #[default]
    Ongoing,
    Completed,
}

impl ExamStatus {
    fn dir_name(&self) -> &'static str {
        match self {
            Self::Ongoing => ONGOING_DIR,
            Self::Completed => COMPLETED_DIR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamItemStatus {
    #[default]
    Pending,
    Answered,
    Timeout,
    Correct,
    Incorrect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamItem {
    pub file_id: String,
    /// 秒
    pub time_limit: u32,
    pub time_spent: u64,
    pub status: ExamItemStatus,
    /// 图片的绝对路径
    pub preview: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRecord {
    pub id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExamStatus,
    pub current_index: usize,
    pub is_grading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grading_index: Option<usize>,
    pub items: Vec<ExamItem>,
    /// 所有题目限时之和 (秒)
    pub total_time: u64,
    pub used_time: u64,
}

/// 考试记录的部分更新
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExamPatch {
    pub current_index: Option<usize>,
    pub is_grading: Option<bool>,
    pub grading_index: Option<usize>,
    pub used_time: Option<u64>,
}

impl ExamPatch {
    fn apply(&self, exam: &mut ExamRecord) {
        if let Some(index) = self.current_index {
            exam.current_index = index;
        }
        if let Some(grading) = self.is_grading {
            exam.is_grading = grading;
        }
        if let Some(index) = self.grading_index {
            exam.grading_index = Some(index);
        }
        if let Some(used) = self.used_time {
            exam.used_time = used;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExamItemPatch {
    pub time_spent: Option<u64>,
    pub status: Option<ExamItemStatus>,
}

/// 考试 id 是毫秒时间戳，只允许 ASCII 数字
pub fn validate_exam_id(id: &str) -> StoreResult<()> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(StoreError::Validation(format!("invalid exam id {id:?}")));
    }
    Ok(())
}

pub struct ExamManager {
    exams_dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
}

impl ExamManager {
    /// 打开 `exams_dir`，确保 `ongoing/` 和 `completed/` 子目录存在
    pub fn open(exams_dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let exams_dir = exams_dir.into();
        fs.create_dir_all(&exams_dir.join(ONGOING_DIR))?;
        fs.create_dir_all(&exams_dir.join(COMPLETED_DIR))?;
        Ok(Self { exams_dir, fs, clock })
    }

    pub fn exams_dir(&self) -> &Path {
        &self.exams_dir
    }

    fn exam_path(&self, status: ExamStatus, id: &str) -> PathBuf {
        self.exams_dir.join(status.dir_name()).join(format!("{id}.json"))
    }

    fn find_exam_path(&self, id: &str) -> StoreResult<Option<PathBuf>> {
        validate_exam_id(id)?;
        Ok([ExamStatus::Ongoing, ExamStatus::Completed]
            .into_iter()
            .map(|status| self.exam_path(status, id))
            .find(|path| self.fs.exists(path)))
    }

    fn save_exam(&self, exam: &ExamRecord) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(exam)?;
        write_atomic(self.fs.as_ref(), &self.exam_path(exam.status, &exam.id), &json)?;

        // 状态变化后删除另一个目录中的旧文件
        let other = match exam.status {
            ExamStatus::Ongoing => ExamStatus::Completed,
            ExamStatus::Completed => ExamStatus::Ongoing,
        };
        let stale = self.exam_path(other, &exam.id);
        if self.fs.exists(&stale) {
            self.fs.remove_file(&stale)?;
        }
        Ok(())
    }

    /// 用给定条目创建一场考试。每题限时取条目的 `answerTimeLimit`
    pub fn create_exam(&self, items: &[&TrackedItem], base_dir: &Path) -> StoreResult<ExamRecord> {
        if items.is_empty() {
            return Err(StoreError::Validation("an exam needs at least one item".into()));
        }
        let now = self.clock.now();

        // id 为毫秒时间戳，同一毫秒内重复创建时顺延
        let mut millis = now.timestamp_millis();
        while self.find_exam_path(&millis.to_string())?.is_some() {
            millis += 1;
        }

        let items: Vec<ExamItem> = items
            .iter()
            .map(|item| ExamItem {
                file_id: item.id.clone(),
                time_limit: item.answer_time_limit,
                time_spent: 0,
                status: ExamItemStatus::Pending,
                preview: base_dir.join(&item.relative_path),
            })
            .collect();
        let exam = ExamRecord {
            id: millis.to_string(),
            start_time: now,
            end_time: None,
            status: ExamStatus::Ongoing,
            current_index: 0,
            is_grading: false,
            grading_index: None,
            total_time: items.iter().map(|i| i.time_limit as u64).sum(),
            items,
            used_time: 0,
        };

        self.save_exam(&exam)?;
        tracing::info!(exam_id = %exam.id, items = exam.items.len(), "exam created");
        Ok(exam)
    }

    pub fn get_exam(&self, id: &str) -> StoreResult<Option<ExamRecord>> {
        let Some(path) = self.find_exam_path(id)? else {
            return Ok(None);
        };
        let raw = self.fs.read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn require_exam(&self, id: &str) -> StoreResult<ExamRecord> {
        self.get_exam(id)?
            .ok_or_else(|| StoreError::NotFound(format!("exam {id}")))
    }

    /// 所有考试，最新的在前。无法解析的文件跳过
    pub fn list_exams(&self) -> StoreResult<Vec<ExamRecord>> {
        let mut exams = Vec::new();
        for status in [ExamStatus::Ongoing, ExamStatus::Completed] {
            for path in self.fs.read_dir(&self.exams_dir.join(status.dir_name()))? {
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let parsed = self
                    .fs
                    .read_to_string(&path)
                    .map_err(StoreError::from)
                    .and_then(|raw| Ok(serde_json::from_str::<ExamRecord>(&raw)?));
                match parsed {
                    Ok(exam) => exams.push(exam),
                    Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping unreadable exam record"),
                }
            }
        }
        exams.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(exams)
    }

    pub fn update_exam(&self, id: &str, patch: &ExamPatch) -> StoreResult<ExamRecord> {
        let mut exam = self.require_exam(id)?;
        if let Some(index) = patch.current_index {
            if index >= exam.items.len() {
                return Err(StoreError::Validation(format!("item index {index} out of range")));
            }
        }
        patch.apply(&mut exam);
        self.save_exam(&exam)?;
        Ok(exam)
    }

    pub fn update_exam_item(&self, id: &str, index: usize, patch: &ExamItemPatch) -> StoreResult<ExamRecord> {
        let mut exam = self.require_exam(id)?;
        let item = exam
            .items
            .get_mut(index)
            .ok_or_else(|| StoreError::NotFound(format!("exam {id} item {index}")))?;
        if let Some(spent) = patch.time_spent {
            item.time_spent = spent;
        }
        if let Some(status) = patch.status {
            item.status = status;
        }
        self.save_exam(&exam)?;
        Ok(exam)
    }

    /// 结束作答，进入批改阶段
    pub fn complete_exam(&self, id: &str) -> StoreResult<ExamRecord> {
        let mut exam = self.require_exam(id)?;
        exam.status = ExamStatus::Completed;
        exam.end_time = Some(self.clock.now());
        exam.is_grading = true;
        exam.grading_index = Some(0);
        self.save_exam(&exam)?;
        tracing::info!(exam_id = %id, "exam completed");
        Ok(exam)
    }

    pub fn delete_exam(&self, id: &str) -> StoreResult<()> {
        let path = self
            .find_exam_path(id)?
            .ok_or_else(|| StoreError::NotFound(format!("exam {id}")))?;
        self.fs.remove_file(&path)?;
        Ok(())
    }
}
