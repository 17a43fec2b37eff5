//! Synthesizer Port - 语音合成抽象
//!
//! 文本 → 音频字节。合成是外部调用且耗时无上界，
//! 调用方必须在独立任务中等待，不得阻塞其他群组。

use async_trait::async_trait;
use thiserror::Error;

/// 合成错误
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Synthesizer Port
#[async_trait]
pub trait SynthesizerPort: Send + Sync {
    /// 合成一段播报语音
    ///
    /// 失败的任务直接丢弃，从不重试
    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        slow: bool,
    ) -> Result<Vec<u8>, SynthError>;
}
