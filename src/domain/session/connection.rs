//! Session Context - 连接生命周期状态

use serde::{Deserialize, Serialize};

/// 语音连接状态
///
/// 状态机（由连接监督者独占驱动）:
/// - Disconnected → Connecting（拨号）→ Ready（握手成功，10s 超时）
/// - Ready → Disconnected（网络中断）→ Signalling/Connecting（5s 内恢复）
/// - 恢复失败 → Disconnected，整个会话被拆除
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// 未连接
    Disconnected,
    /// 正在拨号/握手
    Connecting,
    /// 已就绪，可以播放与接收音频
    Ready,
    /// 信令协商中（断线恢复的中间态）
    Signalling,
    /// 正在重连
    Reconnecting,
}

impl ConnectionState {
    /// 是否处于可恢复的中间态（断线后 5s 内进入即视为恢复中）
    pub fn is_recovering(&self) -> bool {
        matches!(
            self,
            ConnectionState::Signalling | ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Signalling => "signalling",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
