//! Notifier Port - 外部通知抽象
//!
//! fire-and-forget，通知失败不影响核心流程

use async_trait::async_trait;

use crate::domain::session::{GroupId, Track};

/// 面向用户的事件通知
#[derive(Debug, Clone)]
pub enum Notice {
    /// 开始播放一首曲目
    NowPlaying { track: Track, pending: usize },
    /// 队列播完
    QueueFinished,
    /// 曲目打开失败，自动跳过
    TrackSkipped { title: String, reason: String },
    /// 连续失败达到上限，播放硬停
    PlaybackHalted { failures: u32 },
}

/// Notifier Port
#[async_trait]
pub trait NotifierPort: Send + Sync {
    async fn notify(&self, group: &GroupId, notice: Notice);
}
