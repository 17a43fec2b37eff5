//! Tracing Notifier - 把用户通知落到结构化日志
//!
//! 没有接入外部聊天出口时的缺省实现；通知本身是 fire-and-forget

use async_trait::async_trait;

use crate::application::ports::{Notice, NotifierPort};
use crate::domain::session::GroupId;

pub struct TracingNotifier;

#[async_trait]
impl NotifierPort for TracingNotifier {
    async fn notify(&self, group: &GroupId, notice: Notice) {
        match notice {
            Notice::NowPlaying { track, pending } => {
                tracing::info!(
                    group = %group,
                    title = %track.title,
                    requested_by = track.requested_by.as_deref().unwrap_or("-"),
                    pending,
                    "Now playing"
                );
            }
            Notice::QueueFinished => {
                tracing::info!(group = %group, "Queue finished");
            }
            Notice::TrackSkipped { title, reason } => {
                tracing::warn!(group = %group, title = %title, reason = %reason, "Track skipped");
            }
            Notice::PlaybackHalted { failures } => {
                tracing::error!(group = %group, failures, "Playback halted");
            }
        }
    }
}
