//! Exclusive Player - 独占播放器仲裁
//!
//! 每个群组只有一个播放资源，同一时刻最多一个生产者持有。
//! 仲裁策略:
//! - 播报拥有绝对优先级：音乐持有播放器时，播报抢占（音乐暂停而非停止），
//!   播报终结后播放器归还音乐并恢复播放
//! - 同一生产者重复 acquire 是幂等 no-op
//! - 低优先级生产者在高优先级持有期间 acquire 会排队等待，不忙轮询
//! - 播放器级错误与正常播完（Idle）同样处理

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::application::ports::{
    ActiveTrack, AudioSource, ConnectionHandle, PlaybackEnd, TrackControl, TransportError,
};

/// 竞争独占播放器的生产者
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Producer {
    Announcement,
    Music,
}

impl Producer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Producer::Announcement => "announcement",
            Producer::Music => "music",
        }
    }
}

#[derive(Default)]
struct PlayerState {
    owner: Option<Producer>,
    /// 播报抢占期间置位；播报释放时据此归还音乐并恢复
    music_preempted: bool,
    music_control: Option<Box<dyn TrackControl>>,
    announcement_control: Option<Box<dyn TrackControl>>,
}

/// 独占播放器
///
/// 在会话 actor 与各生产者任务之间共享（Arc），内部状态由锁保护
pub struct ExclusivePlayer {
    connection: Arc<dyn ConnectionHandle>,
    state: Mutex<PlayerState>,
    handover: Notify,
    music_volume: AtomicU8,
}

impl ExclusivePlayer {
    pub fn new(connection: Arc<dyn ConnectionHandle>, initial_volume: u8) -> Self {
        Self {
            connection,
            state: Mutex::new(PlayerState::default()),
            handover: Notify::new(),
            music_volume: AtomicU8::new(initial_volume),
        }
    }

    /// 获取播放器
    ///
    /// 播报对音乐立即抢占；音乐在播报持有期间排队等待释放
    pub async fn acquire(&self, producer: Producer) -> bool {
        loop {
            let notified = self.handover.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                match state.owner {
                    None => {
                        state.owner = Some(producer);
                        return true;
                    }
                    Some(current) if current == producer => return true,
                    Some(Producer::Music) if producer == Producer::Announcement => {
                        // 抢占：暂停音乐，交接播放器
                        if let Some(control) = &state.music_control {
                            control.pause();
                        }
                        state.music_preempted = true;
                        state.owner = Some(Producer::Announcement);
                        tracing::debug!("Announcement preempted music playback");
                        return true;
                    }
                    // 音乐在播报持有期间等待交还
                    Some(_) => {}
                }
            }

            notified.await;
        }
    }

    /// 释放播放器
    ///
    /// 播报释放时若存在被抢占的音乐，播放器直接归还音乐并恢复播放
    pub async fn release(&self, producer: Producer) {
        {
            let mut state = self.state.lock().await;
            if state.owner != Some(producer) {
                return;
            }
            match producer {
                Producer::Announcement => {
                    state.announcement_control = None;
                    if state.music_preempted {
                        state.owner = Some(Producer::Music);
                        state.music_preempted = false;
                        if let Some(control) = &state.music_control {
                            control.resume();
                        }
                        tracing::debug!("Player returned to music, playback resumed");
                    } else {
                        state.owner = None;
                    }
                }
                Producer::Music => {
                    state.music_control = None;
                    state.music_preempted = false;
                    state.owner = None;
                }
            }
        }
        self.handover.notify_waiters();
    }

    /// 播放一段音频并等待终结
    ///
    /// 打开失败以 `TransportError` 返回；播放中的错误作为 `PlaybackEnd::Error`
    /// 返回，调用方与 Idle 同样处理
    pub async fn play(
        &self,
        producer: Producer,
        source: AudioSource,
    ) -> Result<PlaybackEnd, TransportError> {
        tracing::debug!(producer = producer.as_str(), source = %source.describe(), "Opening track");
        let ActiveTrack { control, done } = self.connection.play(source).await?;

        {
            let mut state = self.state.lock().await;
            match producer {
                Producer::Music => {
                    control.set_volume(self.music_volume.load(Ordering::Relaxed));
                    // 就位时已被播报抢占的音乐保持暂停，待播报释放时恢复
                    if state.music_preempted || state.owner == Some(Producer::Announcement) {
                        control.pause();
                        state.music_preempted = true;
                    }
                    state.music_control = Some(control);
                }
                Producer::Announcement => {
                    state.announcement_control = Some(control);
                }
            }
        }

        // 发送端被丢弃视为正常终结
        let end = done.await.unwrap_or(PlaybackEnd::Idle);

        let mut state = self.state.lock().await;
        match producer {
            Producer::Music => state.music_control = None,
            Producer::Announcement => state.announcement_control = None,
        }

        Ok(end)
    }

    /// 停止指定生产者的在播音轨（随后以 Idle 终结）
    pub async fn stop(&self, producer: Producer) {
        let state = self.state.lock().await;
        let control = match producer {
            Producer::Music => state.music_control.as_ref(),
            Producer::Announcement => state.announcement_control.as_ref(),
        };
        if let Some(control) = control {
            control.stop();
        }
    }

    /// 调整音乐音量，对在播音轨立即生效，同时作用于后续音轨
    pub async fn set_volume(&self, percent: u8) {
        self.music_volume.store(percent, Ordering::Relaxed);
        let state = self.state.lock().await;
        if let Some(control) = &state.music_control {
            control.set_volume(percent);
        }
    }

    pub async fn owner(&self) -> Option<Producer> {
        self.state.lock().await.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::TransportPort;
    use crate::domain::session::{ChannelRef, Credentials};
    use crate::infrastructure::adapters::{LoopbackTransport, LoopbackTransportConfig};
    use std::time::Duration;

    async fn player_fixture() -> (
        Arc<crate::infrastructure::adapters::LoopbackConnection>,
        Arc<ExclusivePlayer>,
    ) {
        let transport = LoopbackTransport::new(LoopbackTransportConfig::default());
        let connection = transport
            .join(&ChannelRef::new("ch"), &Credentials::default())
            .await
            .unwrap();
        let loopback = transport.last_connection().unwrap();
        let player = Arc::new(ExclusivePlayer::new(connection, 100));
        (loopback, player)
    }

    #[tokio::test]
    async fn test_acquire_is_idempotent_for_same_producer() {
        let (_conn, player) = player_fixture().await;
        assert!(player.acquire(Producer::Music).await);
        assert!(player.acquire(Producer::Music).await);
        assert_eq!(player.owner().await, Some(Producer::Music));
    }

    #[tokio::test]
    async fn test_announcement_preempts_and_returns_player() {
        let (conn, player) = player_fixture().await;

        assert!(player.acquire(Producer::Music).await);
        let music = {
            let player = player.clone();
            tokio::spawn(async move {
                player
                    .play(Producer::Music, AudioSource::Remote("song-a".into()))
                    .await
            })
        };

        // 等音乐音轨就位
        conn.wait_playbacks(1, Duration::from_secs(2)).await;
        let music_track = conn.playbacks()[0].clone();
        assert!(!music_track.is_paused());

        // 播报抢占：音乐被暂停
        assert!(player.acquire(Producer::Announcement).await);
        assert!(music_track.is_paused());
        assert_eq!(player.owner().await, Some(Producer::Announcement));

        // 播报释放：播放器归还音乐并恢复
        player.release(Producer::Announcement).await;
        assert!(!music_track.is_paused());
        assert_eq!(player.owner().await, Some(Producer::Music));

        music_track.finish(PlaybackEnd::Idle);
        let end = music.await.unwrap().unwrap();
        assert_eq!(end, PlaybackEnd::Idle);
    }

    #[tokio::test]
    async fn test_music_waits_while_announcement_holds() {
        let (_conn, player) = player_fixture().await;

        assert!(player.acquire(Producer::Announcement).await);

        let waiting = {
            let player = player.clone();
            tokio::spawn(async move { player.acquire(Producer::Music).await })
        };

        // 播报持有期间音乐拿不到播放器
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        player.release(Producer::Announcement).await;
        assert!(waiting.await.unwrap());
        assert_eq!(player.owner().await, Some(Producer::Music));
    }

    #[tokio::test]
    async fn test_release_by_non_owner_is_noop() {
        let (_conn, player) = player_fixture().await;
        assert!(player.acquire(Producer::Music).await);
        player.release(Producer::Announcement).await;
        assert_eq!(player.owner().await, Some(Producer::Music));
    }
}
