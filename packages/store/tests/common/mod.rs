#![allow(dead_code)]

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use cuotiben_store::{FileStat, FileSystem, FixedClock, LocalFs, MetadataStore};
use tempfile::TempDir;

pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, 8, 9, 30, 0).unwrap()
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(test_now()))
}

/// 在临时目录中写一个 "图片"
pub fn write_image(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create image dir");
    }
    std::fs::write(&path, contents).expect("Failed to write image");
    path
}

pub fn open_store(base_dir: &Path, fs: Arc<dyn FileSystem>) -> MetadataStore {
    MetadataStore::open(base_dir.to_path_buf(), fs, fixed_clock()).expect("Failed to open store")
}

pub fn temp_store() -> (TempDir, MetadataStore) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = open_store(&dir.path().join("images"), Arc::new(LocalFs));
    (dir, store)
}

/// `arm()` 之后，源文件名包含 `fail_on` 的复制返回错误；
/// `set_fail_writes(true)` 之后所有写入返回错误。其余操作委托给本地磁盘
pub struct FlakyFs {
    inner: LocalFs,
    fail_on: String,
    armed: AtomicBool,
    fail_writes: AtomicBool,
    copies: AtomicUsize,
}

impl FlakyFs {
    pub fn failing_on(fail_on: &str) -> Self {
        Self {
            inner: LocalFs,
            fail_on: fail_on.to_string(),
            armed: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            copies: AtomicUsize::new(0),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn copy_count(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }
}

impl FileSystem for FlakyFs {
    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        self.inner.stat(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        self.inner.open_read(path)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.inner.read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        self.inner.write(path, contents)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let name = from.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if self.armed.load(Ordering::SeqCst) && name.contains(&self.fail_on) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected copy failure"));
        }
        self.copies.fetch_add(1, Ordering::SeqCst);
        self.inner.copy(from, to)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.inner.rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_dir_all(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        self.inner.read_dir(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        self.inner.canonicalize(path)
    }
}
