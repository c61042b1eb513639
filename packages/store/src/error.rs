use cuotiben_algo::ConfigError;
use thiserror::Error;

/// 存储模块错误类型
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("数据未找到: {0}")]
    NotFound(String),

    #[error("文件内容已存在 (条目 {existing_id})")]
    DuplicateContent { existing_id: String },

    #[error("已存在: {0}")]
    AlreadyExists(String),

    #[error("成员正在使用中，无法删除: {0}")]
    MemberInUse(String),

    #[error("身份验证失败: {0}")]
    Unauthorized(String),

    #[error("无效路径: {0}")]
    InvalidPath(String),

    #[error("校验失败: {0}")]
    Validation(String),

    #[error("训练配置错误: {0}")]
    Config(#[from] ConfigError),

    #[error("迁移失败: {0}")]
    Migration(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateContent { .. })
    }
}
