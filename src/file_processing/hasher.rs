use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};
use crate::models::FileHashes;

fn hex_digest<D: Digest>(data: &[u8]) -> String {
    hex::encode(D::digest(data))
}

pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

pub fn sha1_hex(data: &[u8]) -> String {
    hex_digest::<Sha1>(data)
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex_digest::<Sha256>(data)
}

/// 同步计算三种摘要
pub fn file_hashes(data: &[u8]) -> FileHashes {
    FileHashes {
        md5: md5_hex(data),
        sha1: sha1_hex(data),
        sha256: sha256_hex(data),
    }
}

/// 在阻塞线程池中计算摘要，上传文件可能有上百MB
pub async fn file_hashes_blocking(data: Vec<u8>) -> AppResult<FileHashes> {
    tokio::task::spawn_blocking(move || file_hashes(&data))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("哈希计算任务失败: {}", e)))
}
