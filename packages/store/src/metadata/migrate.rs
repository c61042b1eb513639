//! 存储目录迁移
//!
//! 整个迁移是一个逻辑事务：任一文件复制或校验失败，都会删除本次在目标目录
//! 创建的文件，原目录、原元数据和内存状态保持不变。
//!
//! 执行顺序：
//! 1. 创建目标目录
//! 2. 读取目标目录已有的元数据，暂存可吸收的条目
//! 3. 复制所有文件，再并行比较源文件和副本的 SHA-256
//! 4. 有错误则回滚并返回 `success = false`
//! 5. 写入目标元数据，删除源文件和旧元数据，切换到新目录

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

use super::{load_document, MetadataStore, METADATA_FILE};
use crate::fs::{temp_path_for, write_atomic};
use crate::hasher;
use crate::models::{MetadataDocument, TrackedItem};
use crate::{StoreError, StoreResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub success: bool,
    /// 导致迁移失败的逐文件错误
    pub errors: Vec<String>,
    /// 迁移的条目数
    pub migrated: usize,
    /// 从目标目录已有元数据中吸收的条目数
    pub absorbed: usize,
    /// 不影响结果的问题，例如源文件删除失败
    pub warnings: Vec<String>,
}

impl MigrationReport {
    fn failed(mut self, error: String) -> Self {
        self.success = false;
        self.errors.push(error);
        self
    }
}

/// 一个待复制的文件
struct CopyPlan {
    id: String,
    source: PathBuf,
    target: PathBuf,
    relative_path: String,
}

impl MetadataStore {
    /// 把整个存储迁移到 `new_base_dir`
    ///
    /// 目标解析后与当前目录相同时返回 [`StoreError::Migration`]；其余失败都体现在报告中。
    pub fn migrate_storage(&mut self, new_base_dir: impl Into<PathBuf>) -> StoreResult<MigrationReport> {
        let new_base_dir = new_base_dir.into();
        let already_current = || {
            StoreError::Migration(format!(
                "{} is already the storage directory",
                new_base_dir.display()
            ))
        };
        if new_base_dir == self.base_dir {
            return Err(already_current());
        }

        let mut report = MigrationReport::default();
        if let Err(err) = self.fs.create_dir_all(&new_base_dir) {
            return Ok(report.failed(format!("create {}: {err}", new_base_dir.display())));
        }
        // `..` 或符号链接指向当前目录
        if self.same_location(&new_base_dir, &self.base_dir) {
            return Err(already_current());
        }

        tracing::info!(
            from = %self.base_dir.display(),
            to = %new_base_dir.display(),
            items = self.len(),
            "storage migration started"
        );

        let staged = match self.stage_destination(&new_base_dir, &mut report) {
            Ok(staged) => staged,
            Err(err) => return Ok(report.failed(format!("read destination metadata: {err}"))),
        };

        let plans = self.plan_copies(&new_base_dir, &staged);
        let mut created = Vec::with_capacity(plans.len());
        for plan in &plans {
            match self.copy_one(plan) {
                Ok(()) => created.push(plan.target.clone()),
                Err(err) => report.errors.push(format!("{}: {err}", plan.id)),
            }
        }
        if report.errors.is_empty() {
            self.verify_copies(&plans, &mut report);
        }

        if !report.errors.is_empty() {
            self.rollback(&new_base_dir, &created);
            tracing::error!(errors = report.errors.len(), "storage migration rolled back");
            report.success = false;
            return Ok(report);
        }

        // 组装目标文档
        let mut document = MetadataDocument::empty(&self.document.version, new_base_dir.clone());
        for plan in &plans {
            if let Some(item) = self.document.files.get(&plan.id) {
                let mut item = item.clone();
                item.relative_path = plan.relative_path.clone();
                document.files.insert(item.id.clone(), item);
            }
        }
        report.absorbed = staged.len();
        for item in staged {
            document.files.insert(item.id.clone(), item);
        }

        let new_metadata_path = new_base_dir.join(METADATA_FILE);
        let written = serde_json::to_vec_pretty(&document)
            .map_err(StoreError::from)
            .and_then(|json| Ok(write_atomic(self.fs.as_ref(), &new_metadata_path, &json)?));
        if let Err(err) = written {
            self.rollback(&new_base_dir, &created);
            tracing::error!(error = %err, "storage migration rolled back");
            return Ok(report.failed(format!("write destination metadata: {err}")));
        }

        // 副本已校验，源文件删除失败只记为警告
        for plan in &plans {
            if let Err(err) = self.fs.remove_file(&plan.source) {
                report.warnings.push(format!("remove {}: {err}", plan.source.display()));
            }
        }
        if !self.same_location(&self.metadata_path, &new_metadata_path) {
            if let Err(err) = self.fs.remove_file(&self.metadata_path) {
                report.warnings.push(format!("remove {}: {err}", self.metadata_path.display()));
            }
        }
        for warning in &report.warnings {
            tracing::warn!(warning = %warning, "storage migration cleanup");
        }

        report.migrated = plans.len();
        report.success = true;
        self.base_dir = new_base_dir;
        self.metadata_path = new_metadata_path;
        self.document = document;
        self.rebuild_indexes();

        tracing::info!(
            migrated = report.migrated,
            absorbed = report.absorbed,
            to = %self.base_dir.display(),
            "storage migration finished"
        );
        Ok(report)
    }

    /// 目标目录已有的条目：文件必须存在，内容不能与当前存储重复，id 冲突时重新分配
    fn stage_destination(
        &self,
        new_base_dir: &Path,
        report: &mut MigrationReport,
    ) -> StoreResult<Vec<TrackedItem>> {
        let path = new_base_dir.join(METADATA_FILE);
        let Some((document, _)) = load_document(self.fs.as_ref(), &path, new_base_dir, self.clock.now())?
        else {
            return Ok(Vec::new());
        };

        let mut taken: HashSet<String> = self.document.files.keys().cloned().collect();
        let mut staged = Vec::new();
        for (id, mut item) in document.files {
            if !self.fs.is_file(&new_base_dir.join(&item.relative_path)) {
                report
                    .warnings
                    .push(format!("destination entry {id} skipped: file missing"));
                continue;
            }
            if let Some(existing) = item.content_hash.as_deref().and_then(|h| self.hash_index.get(h)) {
                report
                    .warnings
                    .push(format!("destination entry {id} skipped: duplicate of {existing}"));
                continue;
            }
            if taken.contains(&item.id) {
                let fresh = Uuid::new_v4().to_string();
                tracing::debug!(old = %item.id, new = %fresh, "destination id remapped");
                item.id = fresh;
            }
            taken.insert(item.id.clone());
            staged.push(item);
        }
        Ok(staged)
    }

    /// 为每个条目决定目标路径，避开目标目录已有文件和已吸收条目
    fn plan_copies(&self, new_base_dir: &Path, staged: &[TrackedItem]) -> Vec<CopyPlan> {
        let mut claimed: HashSet<String> = staged.iter().map(|i| i.relative_path.clone()).collect();
        let mut ids: Vec<&String> = self.document.files.keys().collect();
        ids.sort();

        ids.into_iter()
            .filter_map(|id| self.document.files.get(id))
            .map(|item| {
                let relative_path = free_relative_path(&item.relative_path, |candidate| {
                    claimed.contains(candidate) || self.fs.exists(&new_base_dir.join(candidate))
                });
                claimed.insert(relative_path.clone());
                CopyPlan {
                    id: item.id.clone(),
                    source: self.base_dir.join(&item.relative_path),
                    target: new_base_dir.join(&relative_path),
                    relative_path,
                }
            })
            .collect()
    }

    /// 两个路径解析后是否指向同一位置；无法解析时按字面比较
    fn same_location(&self, a: &Path, b: &Path) -> bool {
        match (self.fs.canonicalize(a), self.fs.canonicalize(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => a == b,
        }
    }

    fn copy_one(&self, plan: &CopyPlan) -> std::io::Result<()> {
        if let Some(parent) = plan.target.parent() {
            self.fs.create_dir_all(parent)?;
        }
        self.fs.copy(&plan.source, &plan.target)?;
        Ok(())
    }

    /// 并行计算源文件和副本的哈希并比较
    fn verify_copies(&self, plans: &[CopyPlan], report: &mut MigrationReport) {
        let paths: Vec<PathBuf> = plans
            .iter()
            .flat_map(|plan| [plan.source.clone(), plan.target.clone()])
            .collect();
        let hashes = hasher::hash_many(self.fs.as_ref(), &paths);

        for (plan, pair) in plans.iter().zip(hashes.chunks(2)) {
            match pair {
                [Ok(source), Ok(target)] if source == target => {}
                [Ok(_), Ok(_)] => report
                    .errors
                    .push(format!("{}: content hash mismatch after copy", plan.id)),
                [Err(err), _] | [_, Err(err)] => report
                    .errors
                    .push(format!("{}: verify failed: {err}", plan.id)),
                _ => report.errors.push(format!("{}: verify incomplete", plan.id)),
            }
        }
    }

    fn rollback(&self, new_base_dir: &Path, created: &[PathBuf]) {
        for path in created {
            if let Err(err) = self.fs.remove_file(path) {
                tracing::warn!(path = %path.display(), error = %err, "rollback could not remove copy");
            }
        }
        let temp = temp_path_for(&new_base_dir.join(METADATA_FILE));
        if self.fs.exists(&temp) {
            let _ = self.fs.remove_file(&temp);
        }
    }
}

/// `dir/name.ext` 被占用时依次尝试 `dir/name-1.ext`, `dir/name-2.ext`, ...
fn free_relative_path(relative_path: &str, is_taken: impl Fn(&str) -> bool) -> String {
    if !is_taken(relative_path) {
        return relative_path.to_string();
    }
    let (dir, file) = match relative_path.rsplit_once('/') {
        Some((dir, file)) => (format!("{dir}/"), file),
        None => (String::new(), relative_path),
    };
    let (stem, ext) = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (file, String::new()),
    };
    (1u32..)
        .map(|n| format!("{dir}{stem}-{n}{ext}"))
        .find(|candidate| !is_taken(candidate))
        .unwrap_or_else(|| relative_path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_relative_path() {
        let taken = ["a.png", "a-1.png", "sub/b", "sub/b-1"];
        let is_taken = |p: &str| taken.contains(&p);
        assert_eq!(free_relative_path("c.png", is_taken), "c.png");
        assert_eq!(free_relative_path("a.png", is_taken), "a-2.png");
        assert_eq!(free_relative_path("sub/b", is_taken), "sub/b-2");
    }

    #[test]
    fn test_free_relative_path_hidden_file() {
        let is_taken = |p: &str| p == ".hidden";
        assert_eq!(free_relative_path(".hidden", is_taken), ".hidden-1");
    }
}
