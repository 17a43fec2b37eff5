//! Packet Decoder Port - 音频包解码抽象
//!
//! opus 包 → PCM 字节。坏包在录音管线内直接丢弃，绝不向上传播。

use thiserror::Error;

/// 解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed packet: {0}")]
    Malformed(String),
}

/// Packet Decoder Port
///
/// 实现内部可持有解码器状态（如 opus 解码上下文），因此需要内部可变性
pub trait PacketDecoderPort: Send + Sync {
    /// 解码单个音频包为 PCM (s16le)
    fn decode(&self, packet: &[u8]) -> Result<Vec<u8>, DecodeError>;
}
