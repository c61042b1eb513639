use std::path::PathBuf;

/// 运行时配置，来自环境变量 (可由 `.env` 提供)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// 数据根目录，保存成员注册表和各成员数据
    pub data_dir: PathBuf,
    /// 训练配置文件
    pub training_config_path: PathBuf,
    pub log_level: String,
    /// 文件日志目录；`None` 表示只输出到终端
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("CUOTIBEN_DATA_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let training_config_path = std::env::var("CUOTIBEN_TRAINING_CONFIG")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("training-config.json"));

        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let file_logs = std::env::var("ENABLE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let log_dir = file_logs.then(|| {
            std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./logs"))
        });

        Self {
            data_dir,
            training_config_path,
            log_level,
            log_dir,
        }
    }

    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            training_config_path: data_dir.join("training-config.json"),
            data_dir,
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("cuotiben"))
        .unwrap_or_else(|| PathBuf::from("./cuotiben-data"))
}
