//! Transcoder Port - 音频转码抽象
//!
//! 原始录音文件 → 可分发格式。转码任务由进程级有界并发池执行，
//! 单个任务失败只记录日志，不影响所属录音会话。

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// 转码错误
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Worker unavailable")]
    WorkerUnavailable,
}

/// Transcoder Port
#[async_trait]
pub trait TranscoderPort: Send + Sync {
    /// 将原始音频文件转码为目标文件
    async fn transcode(&self, raw_path: &Path, target_path: &Path) -> Result<(), TranscodeError>;
}
