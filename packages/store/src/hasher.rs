//! 内容哈希 (SHA-256, 小写十六进制)
//!
//! 哈希只取决于文件字节，与文件名和路径无关，用于去重和迁移校验。

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::fs::FileSystem;

/// 流式读取的块大小
pub const HASH_CHUNK_SIZE: usize = 64 * 1024;

pub type ContentHash = String;

pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<ContentHash> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn hash_file(fs: &dyn FileSystem, path: &Path) -> io::Result<ContentHash> {
    let reader = fs.open_read(path)?;
    hash_reader(reader)
}

/// 并行计算一批文件的哈希，结果顺序与输入一致
pub fn hash_many(fs: &dyn FileSystem, paths: &[PathBuf]) -> Vec<io::Result<ContentHash>> {
    paths.par_iter().map(|path| hash_file(fs, path)).collect()
}
