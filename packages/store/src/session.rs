//! 会话上下文
//!
//! [`Session`] 把成员管理、训练引擎和时钟组合在一起，是 CLI 和测试的入口。
//! 复习流程: 读取条目 → 引擎计算 → 合并保存。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cuotiben_algo::{load_config, save_config, TrainingConfig, TrainingEngine, TrainingUpdate};

use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::fs::{FileSystem, LocalFs};
use crate::members::MemberManager;
use crate::models::{DueFilter, TrackedItem};
use crate::{StoreError, StoreResult};

pub struct Session {
    members: MemberManager,
    engine: TrainingEngine,
    clock: Arc<dyn Clock>,
    training_config_path: PathBuf,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("members", &self.members)
            .field("engine", &self.engine)
            .field("training_config_path", &self.training_config_path)
            .finish()
    }
}

impl Session {
    /// 使用本地磁盘和系统时钟
    pub fn open(config: &AppConfig) -> StoreResult<Self> {
        Self::open_with(config, Arc::new(LocalFs), Arc::new(SystemClock))
    }

    pub fn open_with(config: &AppConfig, fs: Arc<dyn FileSystem>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let training_config = load_config(&config.training_config_path);
        let engine = TrainingEngine::new(training_config)?;
        let members = MemberManager::open(config.data_dir.clone(), fs, clock.clone())?;

        tracing::debug!(
            data_dir = %config.data_dir.display(),
            member = members.current(),
            policy = engine.policy().kind().as_str(),
            "session opened"
        );
        Ok(Self {
            members,
            engine,
            clock,
            training_config_path: config.training_config_path.clone(),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn members(&self) -> &MemberManager {
        &self.members
    }

    pub fn members_mut(&mut self) -> &mut MemberManager {
        &mut self.members
    }

    pub fn engine(&self) -> &TrainingEngine {
        &self.engine
    }

    pub fn training_config_path(&self) -> &Path {
        &self.training_config_path
    }

    /// 计算一次复习的结果但不保存
    pub fn preview_training(
        &self,
        id: &str,
        success: bool,
        training_date: Option<&str>,
        answer_time: Option<u64>,
    ) -> StoreResult<TrainingUpdate> {
        let item = self
            .members
            .store()
            .get_item(id)
            .ok_or_else(|| StoreError::NotFound(format!("item {id}")))?;
        Ok(self.engine.process_training(
            &item.review_state(),
            &item.training_records,
            success,
            training_date,
            answer_time,
            self.now(),
        ))
    }

    /// 记录一次复习并保存，返回更新后的条目
    pub fn process_training(
        &mut self,
        id: &str,
        success: bool,
        training_date: Option<&str>,
        answer_time: Option<u64>,
    ) -> StoreResult<TrackedItem> {
        let update = self.preview_training(id, success, training_date, answer_time)?;
        if let Some(record) = update.latest_record() {
            tracing::info!(
                id = %id,
                result = record.result.as_str(),
                proficiency = record.proficiency_after,
                interval = record.interval_after,
                on_time = record.is_on_time,
                "training recorded"
            );
        }
        let item = self.members.store_mut().record_training(id, update)?;
        Ok(item.clone())
    }

    /// 校验、保存到配置文件，然后替换引擎配置
    pub fn update_config(&mut self, config: TrainingConfig) -> StoreResult<()> {
        TrainingEngine::validate_config(&config)?;
        save_config(&self.training_config_path, &config)?;
        self.engine.update_config(config)?;
        Ok(())
    }

    pub fn due_items(&self, filter: DueFilter) -> Vec<&TrackedItem> {
        self.members.store().due_items(self.now(), filter)
    }
}
