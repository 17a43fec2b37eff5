//! Session Actor - 每群组串行化事件循环
//!
//! 一个群组的全部会话状态只由它自己的 actor 任务修改：命令与内部事件
//! （播放终结、打开失败、连接终结）通过通道汇入同一个 select 循环，
//! 天然避免同群组的并发竞争；不同群组的 actor 相互独立并行。
//!
//! drain/advance 不用递归：播放任务在终结时发回事件，由循环驱动下一步，
//! 控制流因此可以按离散转移测试。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::player::{ExclusivePlayer, Producer};
use super::recorder::{RecorderConfig, RecordingInfo, RecordingSession};
use super::supervisor;
use crate::application::ports::{
    AudioSource, ConnectionHandle, Notice, NotifierPort, PacketDecoderPort, PlaybackEnd,
    SynthesizerPort,
};
use crate::domain::session::{
    Advance, AnnouncementJob, AnnouncementQueue, GroupId, LoopMode, MusicQueueState,
    QueueSnapshot, Track, VoiceError,
};
use crate::infrastructure::worker::TranscodeQueue;

/// 会话级配置（由应用配置装配）
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 握手就绪超时
    pub ready_timeout: Duration,
    /// 断线恢复超时
    pub recover_timeout: Duration,
    /// 播报文本长度上限（字符）
    pub text_cap: usize,
    /// 播报默认语言
    pub default_language: String,
    /// 音乐连续打开失败上限，达到后硬停
    pub max_consecutive_failures: u32,
    /// 默认音量百分比
    pub default_volume: u8,
    /// 录音管线配置
    pub recorder: RecorderConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            recover_timeout: Duration::from_secs(5),
            text_cap: 500,
            default_language: "vi".to_string(),
            max_consecutive_failures: 3,
            default_volume: 100,
            recorder: RecorderConfig::default(),
        }
    }
}

/// 对会话 actor 的外部命令
pub enum SessionCommand {
    Say {
        text: String,
        language: Option<String>,
        slow: bool,
        reply: oneshot::Sender<Result<(), VoiceError>>,
    },
    Play {
        tracks: Vec<Track>,
        reply: oneshot::Sender<Result<usize, VoiceError>>,
    },
    Skip {
        reply: oneshot::Sender<Result<Option<String>, VoiceError>>,
    },
    Clear {
        reply: oneshot::Sender<Result<usize, VoiceError>>,
    },
    SetLoop {
        mode: LoopMode,
        reply: oneshot::Sender<Result<(), VoiceError>>,
    },
    SetVolume {
        percent: u8,
        reply: oneshot::Sender<Result<(), VoiceError>>,
    },
    Queue {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    StartRecording {
        reply: oneshot::Sender<Result<PathBuf, VoiceError>>,
    },
    StopRecording {
        reply: oneshot::Sender<Result<PathBuf, VoiceError>>,
    },
    RecordingInfo {
        reply: oneshot::Sender<Option<RecordingInfo>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

/// 会话内部事件（播放任务与 watchdog 发回）
#[derive(Debug)]
pub enum SessionEvent {
    /// 当前播报终结（播放完成、播放出错或合成失败，统一处理）
    AnnouncementDone,
    /// 当前曲目终结（Idle 与播放器错误同样推进队列）
    MusicEnded(PlaybackEnd),
    /// 曲目流打开失败（自动跳过路径）
    MusicOpenFailed(String),
    /// 断线恢复超时，会话整体拆除
    ConnectionTerminal,
}

/// 会话句柄（命令发送端）
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub(crate) async fn send(&self, command: SessionCommand) -> Result<(), VoiceError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| VoiceError::SessionClosed)
    }
}

/// 每群组语音会话 actor
pub struct SessionActor {
    group: GroupId,
    config: SessionConfig,
    connection: Arc<dyn ConnectionHandle>,
    player: Arc<ExclusivePlayer>,
    announcements: AnnouncementQueue,
    music: MusicQueueState,
    recording: Option<RecordingSession>,
    synthesizer: Arc<dyn SynthesizerPort>,
    decoder: Arc<dyn PacketDecoderPort>,
    notifier: Arc<dyn NotifierPort>,
    transcodes: TranscodeQueue,
    commands: mpsc::Receiver<SessionCommand>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    watchdog: JoinHandle<()>,
}

impl SessionActor {
    /// 创建并启动会话 actor，返回命令句柄
    pub fn spawn(
        group: GroupId,
        config: SessionConfig,
        connection: Arc<dyn ConnectionHandle>,
        synthesizer: Arc<dyn SynthesizerPort>,
        decoder: Arc<dyn PacketDecoderPort>,
        notifier: Arc<dyn NotifierPort>,
        transcodes: TranscodeQueue,
    ) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(64);

        let watchdog = supervisor::spawn_watchdog(
            group.clone(),
            connection.clone(),
            config.recover_timeout,
            events_tx.clone(),
        );

        let player = Arc::new(ExclusivePlayer::new(
            connection.clone(),
            config.default_volume,
        ));
        let music = MusicQueueState::new(config.default_volume);

        let actor = Self {
            group,
            config,
            connection,
            player,
            announcements: AnnouncementQueue::new(),
            music,
            recording: None,
            synthesizer,
            decoder,
            notifier,
            transcodes,
            commands: commands_rx,
            events_tx,
            events_rx,
            watchdog,
        };
        tokio::spawn(actor.run());

        SessionHandle {
            commands: commands_tx,
        }
    }

    async fn run(mut self) {
        tracing::info!(group = %self.group, "Voice session started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Leave { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                Some(event) = self.events_rx.recv() => {
                    if matches!(event, SessionEvent::ConnectionTerminal) {
                        tracing::warn!(group = %self.group, "Unrecoverable disconnect, tearing down session");
                        self.teardown().await;
                        break;
                    }
                    self.handle_event(event).await;
                }
            }
        }
        tracing::info!(group = %self.group, "Voice session closed");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Say {
                text,
                language,
                slow,
                reply,
            } => {
                let language = language.unwrap_or_else(|| self.config.default_language.clone());
                let result = AnnouncementJob::new(text, language, slow, self.config.text_cap)
                    .map(|job| {
                        self.announcements.push(job);
                        self.drain_announcements();
                    });
                let _ = reply.send(result);
            }
            SessionCommand::Play { tracks, reply } => {
                let count = self.music.enqueue(tracks);
                tracing::debug!(group = %self.group, count, "Tracks enqueued");
                if !self.music.is_playing() {
                    self.advance_music().await;
                }
                let _ = reply.send(Ok(count));
            }
            SessionCommand::Skip { reply } => {
                let skipped = self.music.current().map(|t| t.title.clone());
                if skipped.is_some() {
                    // 停止产生与自然播完相同的 Idle 事件，由它驱动 advance
                    self.player.stop(Producer::Music).await;
                }
                let _ = reply.send(Ok(skipped));
            }
            SessionCommand::Clear { reply } => {
                let cleared = self.music.clear_pending();
                tracing::debug!(group = %self.group, cleared, "Pending queue cleared");
                let _ = reply.send(Ok(cleared));
            }
            SessionCommand::SetLoop { mode, reply } => {
                self.music.set_loop(mode);
                let _ = reply.send(Ok(()));
            }
            SessionCommand::SetVolume { percent, reply } => {
                self.music.set_volume(percent);
                self.player.set_volume(self.music.volume_percent()).await;
                let _ = reply.send(Ok(()));
            }
            SessionCommand::Queue { reply } => {
                let _ = reply.send(self.music.snapshot());
            }
            SessionCommand::StartRecording { reply } => {
                let result = if self.recording.is_some() {
                    Err(VoiceError::AlreadyActive)
                } else {
                    match RecordingSession::start(
                        self.group.clone(),
                        &self.connection,
                        self.decoder.clone(),
                        self.transcodes.clone(),
                        self.config.recorder.clone(),
                    )
                    .await
                    {
                        Ok(session) => {
                            let dir = session.output_dir().to_path_buf();
                            self.recording = Some(session);
                            Ok(dir)
                        }
                        Err(e) => Err(e),
                    }
                };
                let _ = reply.send(result);
            }
            SessionCommand::StopRecording { reply } => {
                let result = match self.recording.take() {
                    Some(session) => Ok(session.stop().await),
                    None => Err(VoiceError::NotActive),
                };
                let _ = reply.send(result);
            }
            SessionCommand::RecordingInfo { reply } => {
                let _ = reply.send(self.recording.as_ref().map(|r| r.info()));
            }
            // Leave 在 run 循环里单独处理
            SessionCommand::Leave { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::AnnouncementDone => {
                self.announcements.finish_current();
                self.drain_announcements();
            }
            SessionEvent::MusicEnded(end) => {
                if let PlaybackEnd::Error(error) = &end {
                    // 播放器级错误与正常播完同样处理，只记录
                    tracing::warn!(group = %self.group, error = %error, "Music playback error");
                }
                self.music.finish_current();
                self.advance_music().await;
            }
            SessionEvent::MusicOpenFailed(reason) => {
                let title = self
                    .music
                    .current()
                    .map(|t| t.title.clone())
                    .unwrap_or_default();
                tracing::warn!(group = %self.group, title = %title, reason = %reason, "Track stream failed, skipping");
                self.notifier
                    .notify(&self.group, Notice::TrackSkipped { title, reason })
                    .await;

                if self.music.fail_current(self.config.max_consecutive_failures) {
                    // 连续失败达到上限：硬停，避免坏队列上的无限跳过
                    let failures = self.config.max_consecutive_failures;
                    tracing::error!(group = %self.group, failures, "Too many consecutive stream failures, halting playback");
                    self.notifier
                        .notify(&self.group, Notice::PlaybackHalted { failures })
                        .await;
                    self.music.halt();
                } else {
                    self.advance_music().await;
                }
            }
            SessionEvent::ConnectionTerminal => {}
        }
    }

    /// 播报 drain：single-flight，弹出队头任务并在独立任务里合成与播放
    ///
    /// 合成失败短路：直接进入 drain-next，不播放任何东西
    fn drain_announcements(&mut self) {
        let Some(job) = self.announcements.take_next() else {
            return;
        };

        let group = self.group.clone();
        let synthesizer = self.synthesizer.clone();
        let player = self.player.clone();
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            match synthesizer
                .synthesize(job.text(), job.language(), job.slow())
                .await
            {
                Ok(audio) => {
                    player.acquire(Producer::Announcement).await;
                    match player
                        .play(Producer::Announcement, AudioSource::Bytes(audio))
                        .await
                    {
                        Ok(PlaybackEnd::Idle) => {}
                        Ok(PlaybackEnd::Error(e)) => {
                            tracing::warn!(group = %group, error = %e, "Announcement playback error");
                        }
                        Err(e) => {
                            tracing::warn!(group = %group, error = %e, "Announcement stream open failed");
                        }
                    }
                    player.release(Producer::Announcement).await;
                }
                Err(e) => {
                    tracing::warn!(group = %group, error = %e, "Speech synthesis failed, job dropped");
                }
            }
            let _ = events.send(SessionEvent::AnnouncementDone).await;
        });
    }

    /// 音乐 advance：域状态机决定下一首，播放在独立任务里进行
    async fn advance_music(&mut self) {
        match self.music.advance() {
            Advance::Finished => {
                tracing::info!(group = %self.group, "Music queue finished");
                self.notifier
                    .notify(&self.group, Notice::QueueFinished)
                    .await;
            }
            Advance::Play(track) => {
                tracing::info!(group = %self.group, title = %track.title, source = %track.source_kind, "Now playing");
                self.notifier
                    .notify(
                        &self.group,
                        Notice::NowPlaying {
                            track: track.clone(),
                            pending: self.music.pending_len(),
                        },
                    )
                    .await;

                let player = self.player.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    // 在播报持有期间排队等待，不忙轮询
                    player.acquire(Producer::Music).await;
                    let result = player
                        .play(Producer::Music, AudioSource::Remote(track.source_uri))
                        .await;
                    player.release(Producer::Music).await;
                    let event = match result {
                        Ok(end) => SessionEvent::MusicEnded(end),
                        Err(e) => SessionEvent::MusicOpenFailed(e.to_string()),
                    };
                    let _ = events.send(event).await;
                });
            }
        }
    }

    /// 整体拆除：录音按「如同用户请求停止」处理，队列清空，离开频道
    async fn teardown(&mut self) {
        if let Some(recording) = self.recording.take() {
            let dir = recording.stop().await;
            tracing::info!(group = %self.group, dir = %dir.display(), "Recording stopped during teardown");
        }
        self.player.stop(Producer::Announcement).await;
        self.player.stop(Producer::Music).await;
        self.announcements.clear();
        self.music.clear_pending();
        self.music.halt();
        self.watchdog.abort();
        self.connection.leave().await;
    }
}
