//! Transport Port - 语音频道传输抽象
//!
//! 封装低层语音传输：入会/离会、音轨播放、按说话者的接收流、
//! 连接状态观察。具体网络协议不在核心范围内。

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

use crate::domain::session::{ChannelRef, ConnectionState, Credentials, SpeakerId};

/// 传输层错误
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Join failed: {0}")]
    JoinFailed(String),

    #[error("Stream open failed: {0}")]
    StreamOpenFailed(String),

    #[error("Connection closed")]
    Closed,
}

/// 一段待播放的音频
#[derive(Debug)]
pub enum AudioSource {
    /// 内存中的完整音频数据（语音合成结果）
    Bytes(Vec<u8>),
    /// 远端流地址（音乐曲目，由传输层打开）
    Remote(String),
}

impl AudioSource {
    /// 日志用的简短描述
    pub fn describe(&self) -> String {
        match self {
            AudioSource::Bytes(data) => format!("bytes({})", data.len()),
            AudioSource::Remote(uri) => format!("remote({})", uri),
        }
    }
}

/// 音轨终结事件
///
/// 播放器级错误与正常播完同样处理：释放资源、推进所属队列
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEnd {
    Idle,
    Error(String),
}

/// 在播音轨的控制句柄
pub trait TrackControl: Send + Sync {
    fn pause(&self);
    fn resume(&self);
    /// 请求停止；音轨随后以 Idle 终结
    fn stop(&self);
    fn set_volume(&self, percent: u8);
}

/// 一次 play 调用的产物：控制句柄 + 终结信号
///
/// 发送端被丢弃时接收方按 Idle 处理
pub struct ActiveTrack {
    pub control: Box<dyn TrackControl>,
    pub done: oneshot::Receiver<PlaybackEnd>,
}

/// 接收侧事件（按说话者）
#[derive(Debug, Clone)]
pub enum ReceiveEvent {
    /// 检测到某说话者开始说话
    SpeakingStart(SpeakerId),
    /// 收到一个音频包（静音分段由核心录音管线判定）
    Packet { speaker: SpeakerId, payload: Vec<u8> },
}

/// 按说话者的接收流
#[async_trait]
pub trait VoiceReceiver: Send {
    /// 下一个接收事件；连接关闭后返回 None
    async fn recv(&mut self) -> Option<ReceiveEvent>;
}

/// 已建立的语音连接句柄
///
/// 同一群组的三个生产者共享一个句柄；句柄从不跨群组共享
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// 打开并播放一段音频，返回在播音轨
    ///
    /// 打开失败（网络、解码器初始化等）以 `StreamOpenFailed` 返回
    async fn play(&self, source: AudioSource) -> Result<ActiveTrack, TransportError>;

    /// 订阅接收侧事件流
    fn receiver(&self) -> Box<dyn VoiceReceiver>;

    /// 连接状态观察端（监督者据此驱动重连状态机）
    fn state_watch(&self) -> watch::Receiver<ConnectionState>;

    /// 离开频道；返回后句柄失效
    async fn leave(&self);
}

/// Transport Port
#[async_trait]
pub trait TransportPort: Send + Sync {
    /// 加入语音频道（握手由监督者限时等待）
    async fn join(
        &self,
        channel: &ChannelRef,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ConnectionHandle>, TransportError>;
}
