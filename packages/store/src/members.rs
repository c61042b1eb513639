//! 成员管理
//!
//! 每个成员拥有独立的存储目录和考试记录。注册表保存在数据根目录的 `members.json`：
//!
//! ```text
//! <root>/members.json
//! <root>/members/<name>/images/.metadata.json
//! <root>/members/<name>/exams/{ongoing,completed}/
//! ```
//!
//! 成员可以设置密码。设置了密码的成员只能通过 [`MemberManager::login`] 进入，
//! 注册表中只保存 SHA-256 摘要。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::exam::ExamManager;
use crate::fs::{write_atomic, FileSystem};
use crate::metadata::{MetadataStore, MigrationReport};
use crate::{StoreError, StoreResult};

pub const REGISTRY_FILE: &str = "members.json";
pub const MEMBERS_DIR: &str = "members";
pub const DEFAULT_MEMBER: &str = "default";
const REGISTRY_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// 存储目录，迁移后可能位于成员目录之外
    pub base_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    /// `sha256("<name>:<password>")` 的十六进制摘要
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

impl MemberInfo {
    pub fn is_protected(&self) -> bool {
        self.password_hash.is_some()
    }
}

fn password_digest(name: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberRegistry {
    version: String,
    #[serde(default)]
    current: Option<String>,
    #[serde(default)]
    members: BTreeMap<String, MemberInfo>,
}

impl Default for MemberRegistry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION.to_string(),
            current: None,
            members: BTreeMap::new(),
        }
    }
}

/// 成员名不能为空，不能是 `.`/`..`，不能包含路径分隔符或控制字符
pub fn validate_member_name(name: &str) -> StoreResult<()> {
    let invalid = |reason: &str| Err(StoreError::Validation(format!("invalid member name {name:?}: {reason}")));
    if name.trim().is_empty() {
        return invalid("empty");
    }
    if name != name.trim() {
        return invalid("leading or trailing whitespace");
    }
    if name == "." || name == ".." {
        return invalid("reserved");
    }
    if name.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return invalid("contains a path separator or control character");
    }
    Ok(())
}

pub struct MemberManager {
    root: PathBuf,
    registry: MemberRegistry,
    current: String,
    store: MetadataStore,
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemberManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberManager")
            .field("root", &self.root)
            .field("current", &self.current)
            .field("members", &self.registry.members.len())
            .finish()
    }
}

impl MemberManager {
    /// 打开数据根目录；没有任何成员时创建并选中 `default`
    pub fn open(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
        let root = root.into();
        fs.create_dir_all(&root)?;

        let registry_path = root.join(REGISTRY_FILE);
        let mut registry = if fs.exists(&registry_path) {
            serde_json::from_str::<MemberRegistry>(&fs.read_to_string(&registry_path)?)?
        } else {
            MemberRegistry::default()
        };

        if registry.members.is_empty() {
            let info = provision(fs.as_ref(), &root, DEFAULT_MEMBER, clock.now())?;
            registry.members.insert(DEFAULT_MEMBER.to_string(), info);
            tracing::info!(root = %root.display(), "created default member");
        }

        let current = registry
            .current
            .clone()
            .filter(|name| registry.members.contains_key(name))
            .or_else(|| {
                registry
                    .members
                    .contains_key(DEFAULT_MEMBER)
                    .then(|| DEFAULT_MEMBER.to_string())
            })
            .or_else(|| registry.members.keys().next().cloned())
            .ok_or_else(|| StoreError::NotFound("member".into()))?;
        registry.current = Some(current.clone());

        let base_dir = registry
            .members
            .get(&current)
            .map(|info| info.base_dir.clone())
            .ok_or_else(|| StoreError::NotFound(format!("member {current}")))?;
        let store = MetadataStore::open(base_dir, fs.clone(), clock.clone())?;

        let manager = Self {
            root,
            registry,
            current,
            store,
            fs,
            clock,
        };
        manager.save_registry()?;
        Ok(manager)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn save_registry(&self) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(&self.registry)?;
        write_atomic(self.fs.as_ref(), &self.root.join(REGISTRY_FILE), &json)?;
        Ok(())
    }

    /// 成员目录 `<root>/members/<name>`
    pub fn member_dir(&self, name: &str) -> PathBuf {
        member_dir(&self.root, name)
    }

    pub fn create(&mut self, name: &str) -> StoreResult<MemberInfo> {
        self.register(name, None)
    }

    /// 创建需要密码才能进入的成员
    pub fn create_with_password(&mut self, name: &str, password: &str) -> StoreResult<MemberInfo> {
        if password.is_empty() {
            return Err(StoreError::Validation("password must not be empty".into()));
        }
        // 退出登录总是回到 default，它不能设密码
        if name == DEFAULT_MEMBER {
            return Err(StoreError::Validation(format!("member {DEFAULT_MEMBER} cannot have a password")));
        }
        self.register(name, Some(password))
    }

    fn register(&mut self, name: &str, password: Option<&str>) -> StoreResult<MemberInfo> {
        validate_member_name(name)?;
        if self.registry.members.contains_key(name) {
            return Err(StoreError::AlreadyExists(format!("member {name}")));
        }

        let mut info = provision(self.fs.as_ref(), &self.root, name, self.clock.now())?;
        info.password_hash = password.map(|password| password_digest(name, password));
        // 写出空的元数据文件
        MetadataStore::open(info.base_dir.clone(), self.fs.clone(), self.clock.clone())?;

        self.registry.members.insert(name.to_string(), info.clone());
        self.save_registry()?;
        tracing::info!(member = %name, protected = info.is_protected(), "member created");
        Ok(info)
    }

    /// 切换到没有密码的成员
    pub fn switch(&mut self, name: &str) -> StoreResult<()> {
        self.login(name, None)
    }

    /// 校验密码。没有设置密码的成员总是通过
    pub fn verify(&self, name: &str, password: Option<&str>) -> StoreResult<bool> {
        let info = self
            .registry
            .members
            .get(name)
            .ok_or_else(|| StoreError::NotFound(format!("member {name}")))?;
        Ok(match (&info.password_hash, password) {
            (None, _) => true,
            (Some(expected), Some(password)) => *expected == password_digest(name, password),
            (Some(_), None) => false,
        })
    }

    /// 校验密码后切换到该成员，并记录登录时间
    pub fn login(&mut self, name: &str, password: Option<&str>) -> StoreResult<()> {
        if !self.verify(name, password)? {
            tracing::warn!(member = %name, "login rejected");
            return Err(StoreError::Unauthorized(format!("wrong password for member {name}")));
        }
        let base_dir = self
            .registry
            .members
            .get(name)
            .map(|info| info.base_dir.clone())
            .ok_or_else(|| StoreError::NotFound(format!("member {name}")))?;
        let store = MetadataStore::open(base_dir, self.fs.clone(), self.clock.clone())?;

        self.store = store;
        self.current = name.to_string();
        self.registry.current = Some(self.current.clone());
        let now = self.clock.now();
        if let Some(info) = self.registry.members.get_mut(name) {
            info.last_login_at = Some(now);
        }
        self.save_registry()?;
        tracing::info!(member = %name, "switched member");
        Ok(())
    }

    /// 退出当前成员，回到 `default`；`default` 已被删除时重新创建
    pub fn logout(&mut self) -> StoreResult<()> {
        if !self.registry.members.contains_key(DEFAULT_MEMBER) {
            self.create(DEFAULT_MEMBER)?;
        }
        let previous = self.current.clone();
        self.login(DEFAULT_MEMBER, None)?;
        tracing::info!(member = %previous, "logged out");
        Ok(())
    }

    /// 删除成员及其目录。不能删除当前成员
    pub fn delete(&mut self, name: &str) -> StoreResult<()> {
        if name == self.current {
            return Err(StoreError::MemberInUse(name.to_string()));
        }
        let info = self
            .registry
            .members
            .get(name)
            .ok_or_else(|| StoreError::NotFound(format!("member {name}")))?;

        let dir = self.member_dir(name);
        if !info.base_dir.starts_with(&dir) {
            tracing::info!(member = %name, base_dir = %info.base_dir.display(), "storage outside member directory left in place");
        }
        match self.fs.remove_dir_all(&dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        self.registry.members.remove(name);
        self.save_registry()?;
        tracing::info!(member = %name, "member deleted");
        Ok(())
    }

    /// 按名称排序
    pub fn list(&self) -> Vec<&MemberInfo> {
        self.registry.members.values().collect()
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn current_info(&self) -> Option<&MemberInfo> {
        self.registry.members.get(&self.current)
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MetadataStore {
        &mut self.store
    }

    pub fn exam_manager(&self) -> StoreResult<ExamManager> {
        ExamManager::open(
            self.member_dir(&self.current).join("exams"),
            self.fs.clone(),
            self.clock.clone(),
        )
    }

    /// 迁移当前成员的存储目录，成功后写回注册表
    pub fn migrate_current(&mut self, new_dir: impl Into<PathBuf>) -> StoreResult<MigrationReport> {
        let report = self.store.migrate_storage(new_dir)?;
        if report.success {
            let base_dir = self.store.base_dir().to_path_buf();
            if let Some(info) = self.registry.members.get_mut(&self.current) {
                info.base_dir = base_dir;
            }
            self.save_registry()?;
        }
        Ok(report)
    }
}

fn member_dir(root: &Path, name: &str) -> PathBuf {
    root.join(MEMBERS_DIR).join(name)
}

fn provision(fs: &dyn FileSystem, root: &Path, name: &str, now: DateTime<Utc>) -> StoreResult<MemberInfo> {
    let dir = member_dir(root, name);
    let base_dir = dir.join("images");
    fs.create_dir_all(&base_dir)?;
    fs.create_dir_all(&dir.join("exams"))?;
    Ok(MemberInfo {
        name: name.to_string(),
        created_at: now,
        base_dir,
        last_login_at: None,
        password_hash: None,
    })
}
