//! Session Registry - 群组 → 语音会话映射
//!
//! 不变量: 任一时刻每个群组最多一个语音会话。注册表是显式持有的对象，
//! 由调用方传递，不依赖任何全局可变状态；首次 join 创建会话，
//! leave 或终结性断线销毁会话。

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;

use super::actor::{SessionActor, SessionCommand, SessionConfig, SessionHandle};
use super::recorder::RecordingInfo;
use super::supervisor;
use crate::application::ports::{
    ConnectionHandle, NotifierPort, PacketDecoderPort, SynthesizerPort, TrackResolverPort,
    TransportPort,
};
use crate::domain::session::{
    ChannelRef, Credentials, GroupId, LoopMode, QueueSnapshot, Track, VoiceError,
};
use crate::infrastructure::worker::TranscodeQueue;

/// 注册表依赖的外部协作者
#[derive(Clone)]
pub struct SessionDeps {
    pub transport: Arc<dyn TransportPort>,
    pub synthesizer: Arc<dyn SynthesizerPort>,
    pub decoder: Arc<dyn PacketDecoderPort>,
    pub notifier: Arc<dyn NotifierPort>,
    pub resolver: Arc<dyn TrackResolverPort>,
    pub transcodes: TranscodeQueue,
}

/// 会话注册表
pub struct SessionRegistry {
    config: SessionConfig,
    credentials: Credentials,
    deps: SessionDeps,
    sessions: DashMap<GroupId, SessionHandle>,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig, credentials: Credentials, deps: SessionDeps) -> Self {
        Self {
            config,
            credentials,
            deps,
            sessions: DashMap::new(),
        }
    }

    /// 加入群组的语音频道
    ///
    /// 已有存活会话时幂等返回；握手超时返回 `JoinFailed`
    pub async fn join(&self, group: &GroupId, channel: &ChannelRef) -> Result<(), VoiceError> {
        if let Some(handle) = self.sessions.get(group) {
            if !handle.is_closed() {
                tracing::debug!(group = %group, "Session already active, join is a no-op");
                return Ok(());
            }
        }

        let connection = supervisor::connect(
            self.deps.transport.as_ref(),
            group,
            channel,
            &self.credentials,
            self.config.ready_timeout,
        )
        .await?;

        // 并发 join 竞争同一群组时，输掉的一方丢弃自己的连接
        let mut discard: Option<Arc<dyn ConnectionHandle>> = None;
        {
            use dashmap::mapref::entry::Entry;
            match self.sessions.entry(group.clone()) {
                Entry::Occupied(mut occupied) => {
                    if occupied.get().is_closed() {
                        occupied.insert(self.spawn_actor(group.clone(), connection));
                    } else {
                        discard = Some(connection);
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(self.spawn_actor(group.clone(), connection));
                }
            }
        }
        if let Some(connection) = discard {
            connection.leave().await;
        }
        Ok(())
    }

    fn spawn_actor(
        &self,
        group: GroupId,
        connection: Arc<dyn ConnectionHandle>,
    ) -> SessionHandle {
        SessionActor::spawn(
            group,
            self.config.clone(),
            connection,
            self.deps.synthesizer.clone(),
            self.deps.decoder.clone(),
            self.deps.notifier.clone(),
            self.deps.transcodes.clone(),
        )
    }

    /// 离开群组的语音频道；返回后会话已不存在
    pub async fn leave(&self, group: &GroupId) -> Result<(), VoiceError> {
        let handle = self.session(group)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        handle.send(SessionCommand::Leave { reply: reply_tx }).await?;
        let _ = reply_rx.await;
        self.sessions.remove(group);
        Ok(())
    }

    /// 入队一条播报
    pub async fn say(
        &self,
        group: &GroupId,
        text: impl Into<String>,
        language: Option<String>,
        slow: bool,
    ) -> Result<(), VoiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.session(group)?
            .send(SessionCommand::Say {
                text: text.into(),
                language,
                slow,
                reply: reply_tx,
            })
            .await?;
        reply_rx.await.map_err(|_| VoiceError::SessionClosed)?
    }

    /// 入队已解析的曲目，返回入队数量
    pub async fn play(&self, group: &GroupId, tracks: Vec<Track>) -> Result<usize, VoiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.session(group)?
            .send(SessionCommand::Play {
                tracks,
                reply: reply_tx,
            })
            .await?;
        reply_rx.await.map_err(|_| VoiceError::SessionClosed)?
    }

    /// 解析查询并入队（解析协作者产出曲目描述）
    pub async fn play_query(
        &self,
        group: &GroupId,
        query: &str,
        requested_by: &str,
    ) -> Result<usize, VoiceError> {
        let tracks = self
            .deps
            .resolver
            .resolve(query, requested_by)
            .await
            .map_err(|e| VoiceError::ResolveFailed(e.to_string()))?;
        self.play(group, tracks).await
    }

    /// 跳过当前曲目，返回被跳过的标题
    pub async fn skip(&self, group: &GroupId) -> Result<Option<String>, VoiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.session(group)?
            .send(SessionCommand::Skip { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| VoiceError::SessionClosed)?
    }

    /// 清空待播队列（当前曲目不受影响），返回清除数量
    pub async fn clear(&self, group: &GroupId) -> Result<usize, VoiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.session(group)?
            .send(SessionCommand::Clear { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| VoiceError::SessionClosed)?
    }

    pub async fn set_loop(&self, group: &GroupId, mode: LoopMode) -> Result<(), VoiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.session(group)?
            .send(SessionCommand::SetLoop {
                mode,
                reply: reply_tx,
            })
            .await?;
        reply_rx.await.map_err(|_| VoiceError::SessionClosed)?
    }

    pub async fn set_volume(&self, group: &GroupId, percent: u8) -> Result<(), VoiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.session(group)?
            .send(SessionCommand::SetVolume {
                percent,
                reply: reply_tx,
            })
            .await?;
        reply_rx.await.map_err(|_| VoiceError::SessionClosed)?
    }

    /// 音乐队列只读快照
    pub async fn queue(&self, group: &GroupId) -> Result<QueueSnapshot, VoiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.session(group)?
            .send(SessionCommand::Queue { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| VoiceError::SessionClosed)
    }

    /// 开始录音，返回输出目录
    pub async fn start_recording(&self, group: &GroupId) -> Result<PathBuf, VoiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.session(group)?
            .send(SessionCommand::StartRecording { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| VoiceError::SessionClosed)?
    }

    /// 停止录音；等待全部转码任务落定后返回输出目录
    pub async fn stop_recording(&self, group: &GroupId) -> Result<PathBuf, VoiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.session(group)?
            .send(SessionCommand::StopRecording { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| VoiceError::SessionClosed)?
    }

    pub async fn recording_info(
        &self,
        group: &GroupId,
    ) -> Result<Option<RecordingInfo>, VoiceError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.session(group)?
            .send(SessionCommand::RecordingInfo { reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| VoiceError::SessionClosed)
    }

    pub async fn is_recording(&self, group: &GroupId) -> bool {
        matches!(self.recording_info(group).await, Ok(Some(_)))
    }

    /// 当前有存活会话的群组
    pub fn active_groups(&self) -> Vec<GroupId> {
        self.sessions
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// 逐群组优雅关闭（主进程退出路径）
    pub async fn shutdown(&self) {
        for group in self.active_groups() {
            if let Err(e) = self.leave(&group).await {
                tracing::warn!(group = %group, error = %e, "Failed to leave during shutdown");
            }
        }
    }

    /// 取群组的存活会话句柄；已终结的条目顺手移除
    fn session(&self, group: &GroupId) -> Result<SessionHandle, VoiceError> {
        let handle = self
            .sessions
            .get(group)
            .ok_or(VoiceError::NotConnected)?
            .clone();
        if handle.is_closed() {
            self.sessions.remove_if(group, |_, h| h.is_closed());
            return Err(VoiceError::NotConnected);
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use crate::application::ports::{DecodeError, Notice, PlaybackEnd, ReceiveEvent};
    use crate::application::session::recorder::RecorderConfig;
    use crate::domain::session::{ConnectionState, SourceKind, SpeakerId};
    use crate::infrastructure::adapters::{
        FakeResolver, FakeSynthesizer, LoopbackConnection, LoopbackTransport,
        LoopbackTransportConfig, PcmWavTranscoder,
    };
    use crate::infrastructure::worker::{TranscodeWorker, TranscodeWorkerConfig};

    /// 记录全部通知供断言
    struct CapturingNotifier {
        notices: std::sync::Mutex<Vec<Notice>>,
    }

    impl CapturingNotifier {
        fn new() -> Self {
            Self {
                notices: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn snapshot(&self) -> Vec<Notice> {
            self.notices.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotifierPort for CapturingNotifier {
        async fn notify(&self, _group: &GroupId, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    /// 原样透传的解码器
    struct PassthroughDecoder;

    impl crate::application::ports::PacketDecoderPort for PassthroughDecoder {
        fn decode(&self, packet: &[u8]) -> Result<Vec<u8>, DecodeError> {
            Ok(packet.to_vec())
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        transport: Arc<LoopbackTransport>,
        notifier: Arc<CapturingNotifier>,
        resolver: Arc<FakeResolver>,
        registry: SessionRegistry,
    }

    impl Fixture {
        async fn join(&self, group: &str) -> Arc<LoopbackConnection> {
            self.registry
                .join(&GroupId::new(group), &ChannelRef::new("ch"))
                .await
                .unwrap();
            self.transport.last_connection().unwrap()
        }
    }

    fn fixture_with(
        transport_config: LoopbackTransportConfig,
        synthesizer: Arc<dyn SynthesizerPort>,
    ) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let transport = Arc::new(LoopbackTransport::new(transport_config));
        let notifier = Arc::new(CapturingNotifier::new());
        let resolver = Arc::new(FakeResolver::new());

        let (transcodes, worker) = TranscodeWorker::new(
            TranscodeWorkerConfig::default(),
            Arc::new(PcmWavTranscoder::new(48000, 2)),
        );
        tokio::spawn(worker.run());

        let config = SessionConfig {
            ready_timeout: Duration::from_millis(500),
            recover_timeout: Duration::from_millis(100),
            max_consecutive_failures: 2,
            recorder: RecorderConfig {
                output_base: tmp.path().to_path_buf(),
                silence_timeout: Duration::from_millis(50),
                flush_grace: Duration::from_millis(20),
            },
            ..Default::default()
        };
        let deps = SessionDeps {
            transport: transport.clone(),
            synthesizer,
            decoder: Arc::new(PassthroughDecoder),
            notifier: notifier.clone(),
            resolver: resolver.clone(),
            transcodes,
        };
        let registry = SessionRegistry::new(config, Credentials::new("token"), deps);

        Fixture {
            _tmp: tmp,
            transport,
            notifier,
            resolver,
            registry,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            LoopbackTransportConfig::default(),
            Arc::new(FakeSynthesizer::new()),
        )
    }

    fn track(title: &str) -> Track {
        Track {
            title: title.to_string(),
            source_uri: title.to_string(),
            duration_display: None,
            thumbnail: None,
            source_kind: SourceKind::Primary,
            requested_by: Some("tester".to_string()),
        }
    }

    #[tokio::test]
    async fn test_join_is_idempotent_for_live_session() {
        let f = fixture();
        let group = GroupId::new("g1");
        f.join("g1").await;
        f.registry
            .join(&group, &ChannelRef::new("ch"))
            .await
            .unwrap();

        assert_eq!(f.transport.connection_count(), 1);
        assert_eq!(f.registry.active_groups(), vec![group]);
    }

    #[tokio::test]
    async fn test_ops_without_session_return_not_connected() {
        let f = fixture();
        let group = GroupId::new("nope");

        assert!(matches!(
            f.registry.say(&group, "hi", None, false).await,
            Err(VoiceError::NotConnected)
        ));
        assert!(matches!(
            f.registry.skip(&group).await,
            Err(VoiceError::NotConnected)
        ));
        assert!(matches!(
            f.registry.leave(&group).await,
            Err(VoiceError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_leave_tears_down_session() {
        let f = fixture();
        let conn = f.join("g1").await;

        f.registry.leave(&GroupId::new("g1")).await.unwrap();
        assert!(conn.left());
        assert!(f.registry.active_groups().is_empty());
    }

    #[tokio::test]
    async fn test_empty_announcement_rejected_at_boundary() {
        let f = fixture();
        f.join("g1").await;
        let result = f.registry.say(&GroupId::new("g1"), "   ", None, false).await;
        assert!(matches!(result, Err(VoiceError::EmptyText)));
    }

    #[tokio::test]
    async fn test_announcements_play_in_fifo_order() {
        let f = fixture();
        let conn = f.join("g1").await;
        let group = GroupId::new("g1");

        f.registry.say(&group, "one", None, false).await.unwrap();
        f.registry.say(&group, "two", None, false).await.unwrap();

        assert!(conn.wait_playbacks(1, Duration::from_secs(2)).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        // single-flight: 第一条未终结时第二条不开播
        assert_eq!(conn.playbacks().len(), 1);
        assert_eq!(conn.playbacks()[0].label(), "one");

        conn.playbacks()[0].finish(PlaybackEnd::Idle);
        assert!(conn.wait_playbacks(2, Duration::from_secs(2)).await);
        assert_eq!(conn.playbacks()[1].label(), "two");
    }

    #[tokio::test]
    async fn test_announcement_preempts_music_then_resumes() {
        let f = fixture();
        let conn = f.join("g1").await;
        let group = GroupId::new("g1");

        f.registry.play(&group, vec![track("song-a")]).await.unwrap();
        assert!(conn.wait_playbacks(1, Duration::from_secs(2)).await);
        let music = conn.playbacks()[0].clone();
        assert_eq!(music.label(), "song-a");
        assert!(!music.is_paused());

        f.registry.say(&group, "announcement", None, false).await.unwrap();
        assert!(conn.wait_playbacks(2, Duration::from_secs(2)).await);
        // 播报就位后音乐被暂停而非停止
        assert!(music.is_paused());
        assert!(!music.is_finished());

        conn.playbacks()[1].finish(PlaybackEnd::Idle);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!music.is_paused());

        music.finish(PlaybackEnd::Idle);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f
            .notifier
            .snapshot()
            .iter()
            .any(|n| matches!(n, Notice::QueueFinished)));
    }

    #[tokio::test]
    async fn test_synthesis_failure_skips_to_next_announcement() {
        let f = fixture_with(
            LoopbackTransportConfig::default(),
            Arc::new(FakeSynthesizer::failing_on("boom")),
        );
        let conn = f.join("g1").await;
        let group = GroupId::new("g1");

        f.registry.say(&group, "boom boom", None, false).await.unwrap();
        f.registry.say(&group, "fine", None, false).await.unwrap();

        // 合成失败的任务被丢弃，只有第二条开播
        assert!(conn.wait_playbacks(1, Duration::from_secs(2)).await);
        assert_eq!(conn.playbacks()[0].label(), "fine");
    }

    #[tokio::test]
    async fn test_skip_returns_title_and_advances() {
        let f = fixture();
        let conn = f.join("g1").await;
        let group = GroupId::new("g1");

        f.registry
            .play(&group, vec![track("song-a"), track("song-b")])
            .await
            .unwrap();
        assert!(conn.wait_playbacks(1, Duration::from_secs(2)).await);

        let skipped = f.registry.skip(&group).await.unwrap();
        assert_eq!(skipped.as_deref(), Some("song-a"));

        assert!(conn.wait_playbacks(2, Duration::from_secs(2)).await);
        assert_eq!(conn.playbacks()[1].label(), "song-b");
    }

    #[tokio::test]
    async fn test_clear_keeps_current_track_playing() {
        let f = fixture();
        let conn = f.join("g1").await;
        let group = GroupId::new("g1");

        f.registry
            .play(&group, vec![track("song-a"), track("song-b"), track("song-c")])
            .await
            .unwrap();
        assert!(conn.wait_playbacks(1, Duration::from_secs(2)).await);

        assert_eq!(f.registry.clear(&group).await.unwrap(), 2);
        let snapshot = f.registry.queue(&group).await.unwrap();
        assert_eq!(snapshot.current.map(|t| t.title), Some("song-a".to_string()));
        assert!(snapshot.pending.is_empty());
        assert!(!conn.playbacks()[0].is_finished());
    }

    #[tokio::test]
    async fn test_set_volume_applies_to_active_track() {
        let f = fixture();
        let conn = f.join("g1").await;
        let group = GroupId::new("g1");

        f.registry.play(&group, vec![track("song-a")]).await.unwrap();
        assert!(conn.wait_playbacks(1, Duration::from_secs(2)).await);
        assert_eq!(conn.playbacks()[0].volume(), 100);

        f.registry.set_volume(&group, 150).await.unwrap();
        assert_eq!(conn.playbacks()[0].volume(), 150);
    }

    #[tokio::test]
    async fn test_open_failures_autoskip_then_halt() {
        let f = fixture_with(
            LoopbackTransportConfig {
                fail_marker: Some("bad".to_string()),
                ..Default::default()
            },
            Arc::new(FakeSynthesizer::new()),
        );
        f.join("g1").await;
        let group = GroupId::new("g1");

        // max_consecutive_failures = 2：两首坏曲目后硬停
        f.registry
            .play(&group, vec![track("bad-1"), track("bad-2"), track("song-c")])
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let notices = f.notifier.snapshot();
        let skipped: Vec<_> = notices
            .iter()
            .filter_map(|n| match n {
                Notice::TrackSkipped { title, .. } => Some(title.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, vec!["bad-1".to_string(), "bad-2".to_string()]);
        assert!(notices
            .iter()
            .any(|n| matches!(n, Notice::PlaybackHalted { failures: 2 })));

        // 硬停后队列保留，等待新的 play
        let snapshot = f.registry.queue(&group).await.unwrap();
        assert!(!snapshot.playing);
        assert_eq!(snapshot.pending.len(), 1);
    }

    #[tokio::test]
    async fn test_play_query_uses_resolver() {
        let f = fixture();
        let conn = f.join("g1").await;
        let group = GroupId::new("g1");

        f.resolver
            .register("my playlist", vec![track("song-a"), track("song-b")]);
        let count = f
            .registry
            .play_query(&group, "my playlist", "tester")
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert!(conn.wait_playbacks(1, Duration::from_secs(2)).await);

        let unknown = f.registry.play_query(&group, "unknown", "tester").await;
        assert!(matches!(unknown, Err(VoiceError::ResolveFailed(_))));
    }

    #[tokio::test]
    async fn test_recording_lifecycle_is_exclusive() {
        let f = fixture();
        let conn = f.join("g1").await;
        let group = GroupId::new("g1");

        let dir = f.registry.start_recording(&group).await.unwrap();
        assert!(matches!(
            f.registry.start_recording(&group).await,
            Err(VoiceError::AlreadyActive)
        ));
        assert!(f.registry.is_recording(&group).await);

        conn.feed(ReceiveEvent::SpeakingStart(SpeakerId::new("alice")));
        conn.feed(ReceiveEvent::Packet {
            speaker: SpeakerId::new("alice"),
            payload: vec![1, 2, 3, 4],
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let stopped_dir = f.registry.stop_recording(&group).await.unwrap();
        assert_eq!(stopped_dir, dir);
        assert!(stopped_dir.join("alice.wav").exists());

        assert!(matches!(
            f.registry.stop_recording(&group).await,
            Err(VoiceError::NotActive)
        ));
        assert!(!f.registry.is_recording(&group).await);
    }

    #[tokio::test]
    async fn test_unrecoverable_disconnect_tears_down_session() {
        let f = fixture();
        let conn = f.join("g1").await;
        let group = GroupId::new("g1");

        conn.set_state(ConnectionState::Disconnected);
        // recover_timeout = 100ms，超时后会话整体拆除
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(matches!(
            f.registry.say(&group, "hi", None, false).await,
            Err(VoiceError::NotConnected)
        ));
        assert!(f.registry.active_groups().is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_after_teardown_creates_new_session() {
        let f = fixture();
        let group = GroupId::new("g1");
        f.join("g1").await;

        f.registry.leave(&group).await.unwrap();
        f.join("g1").await;

        assert_eq!(f.transport.connection_count(), 2);
        assert_eq!(f.registry.active_groups(), vec![group]);
    }
}
