//! Session Context - Errors
//!
//! 面向调用方的错误分类。逐项失败（单条播报、单首曲目、单段转码）
//! 只记录日志并丢弃该项，绝不中断所属队列/管线。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("加入语音频道失败: {0}")]
    JoinFailed(String),

    #[error("当前群组没有活跃的语音连接")]
    NotConnected,

    #[error("语音会话已关闭")]
    SessionClosed,

    #[error("播报文本为空")]
    EmptyText,

    #[error("语音合成失败: {0}")]
    SynthesisFailed(String),

    #[error("音频流打开失败: {0}")]
    StreamOpenFailed(String),

    #[error("音频转码失败: {0}")]
    TranscodeFailed(String),

    #[error("曲目解析失败: {0}")]
    ResolveFailed(String),

    #[error("录音已在进行中")]
    AlreadyActive,

    #[error("没有进行中的录音")]
    NotActive,

    #[error("内部错误: {0}")]
    Internal(String),
}
