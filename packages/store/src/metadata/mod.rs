//! 元数据存储
//!
//! 每个成员一个 [`MetadataStore`]，负责条目的增删改、配对、按磁盘校验以及原子保存。
//!
//! ## 持久化
//! - 元数据文件位于存储目录下的 `.metadata.json`
//! - 每次保存都是整份重写：先写 `.metadata.json.tmp` 再 rename
//! - 加载时 `baseDir` 总是改写为当前运行时的目录
//!
//! ## 并发
//! 没有条目级锁。同一目录被两个 `MetadataStore` 同时修改时，后写入者覆盖先写入者。

pub mod migrate;
pub mod schema;

pub use migrate::MigrationReport;
pub use schema::{upgrade_document, CURRENT_SCHEMA_VERSION};

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cuotiben_algo::TrainingUpdate;
use uuid::Uuid;

use crate::clock::Clock;
use crate::fs::{write_atomic, FileSystem};
use crate::hasher;
use crate::models::{
    DeleteMode, DueFilter, ItemPatch, ItemType, MetadataDocument, StoreStats, TrackedItem,
};
use crate::{StoreError, StoreResult};

/// 元数据文件名
pub const METADATA_FILE: &str = ".metadata.json";

pub struct MetadataStore {
    base_dir: PathBuf,
    metadata_path: PathBuf,
    document: MetadataDocument,
    /// pairId -> 条目 id
    pair_index: HashMap<String, BTreeSet<String>>,
    /// 内容哈希 -> 条目 id
    hash_index: HashMap<String, String>,
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("base_dir", &self.base_dir)
            .field("items", &self.document.files.len())
            .finish()
    }
}

/// 读取并升级元数据文件。文件不存在时返回 `None`
pub(crate) fn load_document(
    fs: &dyn FileSystem,
    metadata_path: &Path,
    base_dir: &Path,
    now: DateTime<Utc>,
) -> StoreResult<Option<(MetadataDocument, bool)>> {
    if !fs.exists(metadata_path) {
        return Ok(None);
    }
    let raw = fs.read_to_string(metadata_path)?;
    let mut value: serde_json::Value = serde_json::from_str(&raw)?;
    let report = upgrade_document(&mut value, now)?;
    let mut document: MetadataDocument = serde_json::from_value(value)?;

    let mut changed = report.changed;
    if document.base_dir != base_dir {
        document.base_dir = base_dir.to_path_buf();
        changed = true;
    }
    Ok(Some((document, changed)))
}

/// 把路径转换为相对 `base_dir` 的 `/` 分隔形式，拒绝跳出目录的路径
pub(crate) fn relative_to(base_dir: &Path, path: &Path) -> StoreResult<String> {
    let relative = if path.is_absolute() {
        path.strip_prefix(base_dir).map_err(|_| {
            StoreError::InvalidPath(format!(
                "{} is not inside {}",
                path.display(),
                base_dir.display()
            ))
        })?
    } else {
        path
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(StoreError::InvalidPath(format!(
                    "{} escapes the storage directory",
                    path.display()
                )))
            }
        }
    }
    if parts.is_empty() {
        return Err(StoreError::InvalidPath(format!("{} has no file name", path.display())));
    }
    Ok(parts.join("/"))
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl MetadataStore {
    /// 打开 (或创建) `base_dir` 下的元数据
    ///
    /// 无法解析的元数据文件会被改名为 `.metadata.json.corrupt-<毫秒>` 保留，
    /// 然后以空存储启动。
    pub fn open(
        base_dir: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        let base_dir = base_dir.into();
        fs.create_dir_all(&base_dir)?;
        let metadata_path = base_dir.join(METADATA_FILE);
        let now = clock.now();

        let (document, dirty) = match load_document(fs.as_ref(), &metadata_path, &base_dir, now) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => (
                MetadataDocument::empty(CURRENT_SCHEMA_VERSION, base_dir.clone()),
                true,
            ),
            Err(err @ (StoreError::Json(_) | StoreError::Validation(_))) => {
                let quarantine = base_dir.join(format!(
                    "{METADATA_FILE}.corrupt-{}",
                    now.timestamp_millis()
                ));
                tracing::error!(
                    path = %metadata_path.display(),
                    moved_to = %quarantine.display(),
                    error = %err,
                    "metadata unreadable, starting empty"
                );
                fs.rename(&metadata_path, &quarantine)?;
                (
                    MetadataDocument::empty(CURRENT_SCHEMA_VERSION, base_dir.clone()),
                    true,
                )
            }
            Err(err) => return Err(err),
        };

        let mut store = Self {
            base_dir,
            metadata_path,
            document,
            pair_index: HashMap::new(),
            hash_index: HashMap::new(),
            fs,
            clock,
        };
        store.rebuild_indexes();
        if dirty {
            store.save_metadata()?;
        }
        Ok(store)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    /// 当前内存中的文档 (不做磁盘校验)
    pub fn document(&self) -> &MetadataDocument {
        &self.document
    }

    pub fn len(&self) -> usize {
        self.document.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document.files.is_empty()
    }

    pub fn get_item(&self, id: &str) -> Option<&TrackedItem> {
        self.document.files.get(id)
    }

    pub fn items(&self) -> impl Iterator<Item = &TrackedItem> {
        self.document.files.values()
    }

    pub fn resolve_path(&self, item: &TrackedItem) -> PathBuf {
        self.base_dir.join(&item.relative_path)
    }

    pub fn find_by_hash(&self, hash: &str) -> Option<&TrackedItem> {
        self.hash_index.get(hash).and_then(|id| self.document.files.get(id))
    }

    fn rebuild_indexes(&mut self) {
        self.pair_index.clear();
        self.hash_index.clear();
        for item in self.document.files.values() {
            if let Some(pair_id) = &item.pair_id {
                self.pair_index
                    .entry(pair_id.clone())
                    .or_default()
                    .insert(item.id.clone());
            }
            if let Some(hash) = &item.content_hash {
                if let Some(other) = self.hash_index.insert(hash.clone(), item.id.clone()) {
                    tracing::warn!(hash = %hash, first = %other, second = %item.id, "duplicate content hash in metadata");
                }
            }
        }
    }

    fn index_insert(&mut self, item: &TrackedItem) {
        if let Some(pair_id) = &item.pair_id {
            self.pair_index
                .entry(pair_id.clone())
                .or_default()
                .insert(item.id.clone());
        }
        if let Some(hash) = &item.content_hash {
            self.hash_index.insert(hash.clone(), item.id.clone());
        }
    }

    fn index_remove(&mut self, item: &TrackedItem) {
        if let Some(pair_id) = &item.pair_id {
            self.unindex_pair(pair_id, &item.id);
        }
        if let Some(hash) = &item.content_hash {
            if self.hash_index.get(hash) == Some(&item.id) {
                self.hash_index.remove(hash);
            }
        }
    }

    fn unindex_pair(&mut self, pair_id: &str, id: &str) {
        if let Some(members) = self.pair_index.get_mut(pair_id) {
            members.remove(id);
            if members.is_empty() {
                self.pair_index.remove(pair_id);
            }
        }
    }

    fn ensure_unique(&self, hash: &str) -> StoreResult<()> {
        match self.hash_index.get(hash) {
            Some(existing_id) => Err(StoreError::DuplicateContent {
                existing_id: existing_id.clone(),
            }),
            None => Ok(()),
        }
    }

    fn require(&self, id: &str) -> StoreResult<&TrackedItem> {
        self.document
            .files
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("item {id}")))
    }

    // ========== 持久化 ==========

    /// 整份重写元数据文件
    pub fn save_metadata(&self) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(&self.document)?;
        write_atomic(self.fs.as_ref(), &self.metadata_path, &json)?;
        Ok(())
    }

    /// 插入并保存；保存失败时撤销插入
    fn insert_and_save(&mut self, item: TrackedItem) -> StoreResult<String> {
        let id = item.id.clone();
        self.index_insert(&item);
        self.document.files.insert(id.clone(), item);

        if let Err(err) = self.save_metadata() {
            if let Some(item) = self.document.files.remove(&id) {
                self.index_remove(&item);
            }
            return Err(err);
        }
        Ok(id)
    }

    // ========== 新增 ==========

    /// 登记一个已存放到存储目录中的文件
    ///
    /// `source_path` 用于计算哈希和读取原始文件信息，`stored_path` 必须位于存储目录内。
    pub fn add_file(&mut self, source_path: &Path, stored_path: &Path) -> StoreResult<String> {
        if !self.fs.is_file(source_path) {
            return Err(StoreError::NotFound(format!(
                "source file {}",
                source_path.display()
            )));
        }
        let relative_path = relative_to(&self.base_dir, stored_path)?;
        if !self.fs.is_file(&self.base_dir.join(&relative_path)) {
            return Err(StoreError::InvalidPath(format!(
                "stored file {} does not exist",
                stored_path.display()
            )));
        }

        let stat = self.fs.stat(source_path)?;
        let hash = hasher::hash_file(self.fs.as_ref(), source_path)?;
        self.ensure_unique(&hash)?;

        let item = TrackedItem::new(
            Uuid::new_v4().to_string(),
            relative_path,
            file_name_of(source_path),
            &stat,
            hash,
            self.clock.now(),
        );
        let id = self.insert_and_save(item)?;
        tracing::info!(id = %id, source = %source_path.display(), "file added");
        Ok(id)
    }

    /// 上传流程：先查重，再复制到存储目录并登记
    ///
    /// 重复内容在复制前就被拒绝，不会在磁盘上留下第二份。
    pub fn import_file(&mut self, source_path: &Path) -> StoreResult<String> {
        if !self.fs.is_file(source_path) {
            return Err(StoreError::NotFound(format!(
                "source file {}",
                source_path.display()
            )));
        }
        let stat = self.fs.stat(source_path)?;
        let hash = hasher::hash_file(self.fs.as_ref(), source_path)?;
        self.ensure_unique(&hash)?;

        let file_name = file_name_of(source_path);
        if file_name.is_empty() {
            return Err(StoreError::InvalidPath(source_path.display().to_string()));
        }
        let target = self.unique_target(&file_name);
        self.fs.copy(source_path, &target)?;

        let relative_path = relative_to(&self.base_dir, &target)?;
        let item = TrackedItem::new(
            Uuid::new_v4().to_string(),
            relative_path,
            file_name,
            &stat,
            hash,
            self.clock.now(),
        );
        match self.insert_and_save(item) {
            Ok(id) => {
                tracing::info!(id = %id, target = %target.display(), "file imported");
                Ok(id)
            }
            Err(err) => {
                let _ = self.fs.remove_file(&target);
                Err(err)
            }
        }
    }

    /// 在存储目录中找一个不冲突的文件名: `name.png`, `name-1.png`, ...
    fn unique_target(&self, file_name: &str) -> PathBuf {
        let candidate = self.base_dir.join(file_name);
        if !self.fs.exists(&candidate) {
            return candidate;
        }
        let path = Path::new(file_name);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());
        let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
        (1u32..)
            .map(|n| match &ext {
                Some(ext) => self.base_dir.join(format!("{stem}-{n}.{ext}")),
                None => self.base_dir.join(format!("{stem}-{n}")),
            })
            .find(|candidate| !self.fs.exists(candidate))
            .unwrap_or(candidate)
    }

    // ========== 读取与校验 ==========

    /// 返回元数据前先按磁盘校验，丢弃文件已不存在的条目
    ///
    /// 注意：文件被外部删除时，重复调用会让条目数变少。
    pub fn get_metadata(&mut self) -> StoreResult<&MetadataDocument> {
        self.validate_metadata()?;
        Ok(&self.document)
    }

    /// 删除文件已不存在的条目并保存，返回删除数量
    pub fn validate_metadata(&mut self) -> StoreResult<usize> {
        let missing: Vec<String> = self
            .document
            .files
            .values()
            .filter(|item| !self.fs.is_file(&self.base_dir.join(&item.relative_path)))
            .map(|item| item.id.clone())
            .collect();

        for id in &missing {
            if let Some(item) = self.document.files.remove(id) {
                tracing::warn!(
                    id = %id,
                    path = %self.base_dir.join(&item.relative_path).display(),
                    "file missing on disk, entry pruned"
                );
                self.index_remove(&item);
            }
        }

        if !missing.is_empty() {
            self.save_metadata()?;
        }
        Ok(missing.len())
    }

    // ========== 更新 ==========

    /// 合并补丁并保存。补丁不合法时不做任何修改
    pub fn update_file(&mut self, id: &str, patch: &ItemPatch) -> StoreResult<&TrackedItem> {
        patch.validate().map_err(StoreError::Validation)?;
        let before = self.require(id)?.clone();

        if let Some(item) = self.document.files.get_mut(id) {
            patch.apply(item);
        }
        self.save_or_restore(vec![before])?;
        self.require(id)
    }

    /// 合并训练结果并保存
    pub fn record_training(&mut self, id: &str, update: TrainingUpdate) -> StoreResult<&TrackedItem> {
        let before = self.require(id)?.clone();

        if let Some(item) = self.document.files.get_mut(id) {
            item.apply_training(update).map_err(StoreError::Validation)?;
        }
        self.save_or_restore(vec![before])?;
        self.require(id)
    }

    /// 保存；失败时把 `before` 中的条目放回内存，内存与磁盘保持一致
    fn save_or_restore(&mut self, before: Vec<TrackedItem>) -> StoreResult<()> {
        if let Err(err) = self.save_metadata() {
            for item in before {
                self.document.files.insert(item.id.clone(), item);
            }
            self.rebuild_indexes();
            return Err(err);
        }
        Ok(())
    }

    pub fn set_type(&mut self, id: &str, item_type: ItemType) -> StoreResult<&TrackedItem> {
        self.update_file(id, &ItemPatch::item_type(item_type))
    }

    pub fn set_frozen(&mut self, id: &str, is_frozen: bool) -> StoreResult<&TrackedItem> {
        self.update_file(id, &ItemPatch::frozen(is_frozen))
    }

    // ========== 配对 ==========

    /// 配对两个条目，返回共享的 pairId
    ///
    /// 优先沿用 `a` 已有的 pairId，其次 `b` 的，都没有时生成新的。
    pub fn pair(&mut self, a: &str, b: &str) -> StoreResult<String> {
        if a == b {
            return Err(StoreError::Validation(format!("cannot pair {a} with itself")));
        }
        let pair_id = {
            let first = self.require(a)?;
            let second = self.require(b)?;
            first
                .pair_id
                .clone()
                .or_else(|| second.pair_id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string())
        };
        let before = self.snapshot(&[a, b]);

        for id in [a, b] {
            let old = self.document.files.get(id).and_then(|item| item.pair_id.clone());
            if let Some(old) = old.filter(|old| *old != pair_id) {
                self.unindex_pair(&old, id);
            }
            if let Some(item) = self.document.files.get_mut(id) {
                item.set_pair(Some(pair_id.clone()));
            }
            self.pair_index
                .entry(pair_id.clone())
                .or_default()
                .insert(id.to_string());
        }

        self.save_or_restore(before)?;
        tracing::info!(a = %a, b = %b, pair_id = %pair_id, "items paired");
        Ok(pair_id)
    }

    /// 解除配对，两边的 pairId 和 isPaired 都清空
    pub fn unpair(&mut self, a: &str, b: &str) -> StoreResult<()> {
        self.require(a)?;
        self.require(b)?;
        let before = self.snapshot(&[a, b]);

        for id in [a, b] {
            let old = self.document.files.get(id).and_then(|item| item.pair_id.clone());
            if let Some(old) = old {
                self.unindex_pair(&old, id);
            }
            if let Some(item) = self.document.files.get_mut(id) {
                item.set_pair(None);
            }
        }

        self.save_or_restore(before)?;
        tracing::info!(a = %a, b = %b, "items unpaired");
        Ok(())
    }

    fn snapshot(&self, ids: &[&str]) -> Vec<TrackedItem> {
        ids.iter()
            .filter_map(|id| self.document.files.get(*id))
            .cloned()
            .collect()
    }

    /// 共享该 pairId 的所有条目
    pub fn pair_members(&self, pair_id: &str) -> Vec<&TrackedItem> {
        self.pair_index
            .get(pair_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.document.files.get(id))
            .collect()
    }

    // ========== 删除 ==========

    /// 删除条目及其文件。`Cascade` 时同时删除同一 pairId 下的条目
    ///
    /// 先保存元数据再删除文件；保存失败时内存和磁盘上的文件都不变。
    pub fn delete_file(&mut self, id: &str, mode: DeleteMode) -> StoreResult<Vec<String>> {
        let item = self.require(id)?;
        let mut ids = vec![id.to_string()];
        if let (DeleteMode::Cascade, Some(pair_id)) = (mode, &item.pair_id) {
            ids.extend(
                self.pair_index
                    .get(pair_id)
                    .into_iter()
                    .flatten()
                    .filter(|other| other.as_str() != id)
                    .cloned(),
            );
        }

        let mut removed = Vec::with_capacity(ids.len());
        for target in &ids {
            if let Some(item) = self.document.files.remove(target) {
                self.index_remove(&item);
                removed.push(item);
            }
        }
        self.save_or_restore(removed.clone())?;

        for item in &removed {
            let path = self.base_dir.join(&item.relative_path);
            match self.fs.remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(id = %item.id, path = %path.display(), error = %err, "failed to remove file")
                }
            }
        }
        tracing::info!(id = %id, deleted = ids.len(), "items deleted");
        Ok(ids)
    }

    // ========== 查询 ==========

    /// 到期条目，按到期时间排序
    pub fn due_items(&self, now: DateTime<Utc>, filter: DueFilter) -> Vec<&TrackedItem> {
        let mut due: Vec<&TrackedItem> = self
            .items()
            .filter(|item| item.is_due(now) && filter.matches(item))
            .collect();
        due.sort_by(|a, b| {
            a.next_training_date
                .cmp(&b.next_training_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        due
    }

    pub fn stats(&self, now: DateTime<Utc>) -> StoreStats {
        let mut stats = StoreStats {
            total: self.len(),
            ..Default::default()
        };
        let mut proficiency_sum = 0i64;
        for item in self.items() {
            match item.item_type {
                ItemType::Mistake => stats.mistakes += 1,
                ItemType::Answer => stats.answers += 1,
            }
            if item.is_paired {
                stats.paired += 1;
            }
            if item.is_frozen {
                stats.frozen += 1;
            }
            if item.is_due(now) && !item.is_frozen {
                stats.due += 1;
            }
            stats.total_reviews += item.training_records.len();
            proficiency_sum += item.proficiency as i64;
        }
        if stats.total > 0 {
            stats.average_proficiency = proficiency_sum as f64 / stats.total as f64;
        }
        stats
    }
}
