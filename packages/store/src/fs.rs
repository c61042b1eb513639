//! 文件系统抽象
//!
//! 元数据存储只通过 [`FileSystem`] 访问磁盘，测试可以注入故障实现。

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// 文件状态
#[derive(Debug, Clone, PartialEq)]
pub struct FileStat {
    pub len: u64,
    pub is_file: bool,
    /// 创建时间，部分文件系统不提供
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

pub trait FileSystem: Send + Sync {
    fn stat(&self, path: &Path) -> io::Result<FileStat>;
    fn exists(&self, path: &Path) -> bool;
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    /// 目录下的直接子项，顺序不保证
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
    /// 解析 `..` 和符号链接后的绝对路径，路径必须存在
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    fn is_file(&self, path: &Path) -> bool {
        self.stat(path).map(|stat| stat.is_file).unwrap_or(false)
    }
}

/// 本地磁盘实现
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = fs::metadata(path)?;
        Ok(FileStat {
            len: meta.len(),
            is_file: meta.is_file(),
            created: meta.created().ok().map(DateTime::<Utc>::from),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(path)?))
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.write_all(contents)?;
        file.sync_all()
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        fs::copy(from, to)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }
}

/// 临时文件路径: `<path>.tmp`
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// 先写临时文件再 rename，崩溃时旧内容保持完整
pub fn write_atomic(fs: &dyn FileSystem, path: &Path, contents: &[u8]) -> io::Result<()> {
    let temp_path = temp_path_for(path);
    fs.write(&temp_path, contents)?;
    if let Err(err) = fs.rename(&temp_path, path) {
        let _ = fs.remove_file(&temp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_keeps_directory() {
        let path = Path::new("/data/images/.metadata.json");
        assert_eq!(temp_path_for(path), PathBuf::from("/data/images/.metadata.json.tmp"));
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("doc.json");
        let fs = LocalFs;

        write_atomic(&fs, &path, b"first").expect("Failed to write");
        write_atomic(&fs, &path, b"second").expect("Failed to write");

        assert_eq!(fs.read_to_string(&path).unwrap(), "second");
        assert!(!fs.exists(&temp_path_for(&path)));
        assert!(fs.is_file(&path));
        assert!(!fs.is_file(dir.path()));
    }
}
