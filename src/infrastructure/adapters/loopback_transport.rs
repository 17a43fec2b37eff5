//! Loopback Transport - 进程内传输实现
//!
//! 不接触网络的 `TransportPort` 实现：连接状态、在播音轨与接收事件
//! 全部可由外部驱动。用于测试与本地演示运行。

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};

use crate::application::ports::{
    ActiveTrack, AudioSource, ConnectionHandle, PlaybackEnd, ReceiveEvent, TrackControl,
    TransportError, TransportPort, VoiceReceiver,
};
use crate::domain::session::{ChannelRef, ConnectionState, Credentials};

/// Loopback 传输配置
#[derive(Debug, Clone)]
pub struct LoopbackTransportConfig {
    /// 入会后进入 Ready 的延迟；`None` 表示永不就绪（握手超时路径）
    pub ready_delay: Option<Duration>,
    /// 音轨自动以 Idle 终结的延迟；`None` 表示等待外部 `finish`
    pub auto_finish: Option<Duration>,
    /// 远端地址包含该子串时打开失败（自动跳过路径）
    pub fail_marker: Option<String>,
}

impl Default for LoopbackTransportConfig {
    fn default() -> Self {
        Self {
            ready_delay: Some(Duration::ZERO),
            auto_finish: None,
            fail_marker: None,
        }
    }
}

/// Loopback 传输
pub struct LoopbackTransport {
    config: LoopbackTransportConfig,
    connections: Mutex<Vec<Arc<LoopbackConnection>>>,
}

impl LoopbackTransport {
    pub fn new(config: LoopbackTransportConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(Vec::new()),
        }
    }

    /// 最近一次 join 产生的连接
    pub fn last_connection(&self) -> Option<Arc<LoopbackConnection>> {
        lock(&self.connections).last().cloned()
    }

    /// 迄今 join 产生的连接总数
    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }
}

#[async_trait]
impl TransportPort for LoopbackTransport {
    async fn join(
        &self,
        channel: &ChannelRef,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn ConnectionHandle>, TransportError> {
        let connection = Arc::new(LoopbackConnection::new(self.config.clone()));
        tracing::debug!(channel = %channel, "Loopback connection created");

        match self.config.ready_delay {
            Some(delay) if delay.is_zero() => {
                connection.set_state(ConnectionState::Ready);
            }
            Some(delay) => {
                let conn = connection.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    conn.set_state(ConnectionState::Ready);
                });
            }
            None => {}
        }

        lock(&self.connections).push(connection.clone());
        Ok(connection)
    }
}

/// 一条 loopback 连接
pub struct LoopbackConnection {
    config: LoopbackTransportConfig,
    states: watch::Sender<ConnectionState>,
    playbacks: Mutex<Vec<Arc<LoopbackTrack>>>,
    playback_added: Notify,
    feeds: Mutex<Vec<mpsc::UnboundedSender<ReceiveEvent>>>,
    left: AtomicBool,
}

impl LoopbackConnection {
    fn new(config: LoopbackTransportConfig) -> Self {
        let (states, _) = watch::channel(ConnectionState::Connecting);
        Self {
            config,
            states,
            playbacks: Mutex::new(Vec::new()),
            playback_added: Notify::new(),
            feeds: Mutex::new(Vec::new()),
            left: AtomicBool::new(false),
        }
    }

    /// 外部驱动连接状态（断线、恢复信号等）
    pub fn set_state(&self, state: ConnectionState) {
        self.states.send_replace(state);
    }

    /// 向所有接收流注入一个事件
    pub fn feed(&self, event: ReceiveEvent) {
        let mut feeds = lock(&self.feeds);
        feeds.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// 迄今打开过的全部音轨
    pub fn playbacks(&self) -> Vec<Arc<LoopbackTrack>> {
        lock(&self.playbacks).clone()
    }

    /// 等待至少 `count` 条音轨就位
    pub async fn wait_playbacks(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.playback_added.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if lock(&self.playbacks).len() >= count {
                return true;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return false,
            }
        }
    }

    pub fn left(&self) -> bool {
        self.left.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionHandle for LoopbackConnection {
    async fn play(&self, source: AudioSource) -> Result<ActiveTrack, TransportError> {
        if self.left() {
            return Err(TransportError::Closed);
        }
        if let (AudioSource::Remote(uri), Some(marker)) = (&source, &self.config.fail_marker) {
            if uri.contains(marker.as_str()) {
                return Err(TransportError::StreamOpenFailed(format!(
                    "cannot open stream: {}",
                    uri
                )));
            }
        }

        // 标签取可读内容，便于断言播放顺序
        let label = match &source {
            AudioSource::Bytes(data) => String::from_utf8_lossy(data).into_owned(),
            AudioSource::Remote(uri) => uri.clone(),
        };

        let (done_tx, done_rx) = oneshot::channel();
        let track = Arc::new(LoopbackTrack {
            label,
            paused: AtomicBool::new(false),
            volume: AtomicU8::new(100),
            done: Mutex::new(Some(done_tx)),
        });

        if let Some(delay) = self.config.auto_finish {
            let track = track.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                track.finish(PlaybackEnd::Idle);
            });
        }

        lock(&self.playbacks).push(track.clone());
        self.playback_added.notify_waiters();

        Ok(ActiveTrack {
            control: Box::new(track),
            done: done_rx,
        })
    }

    fn receiver(&self) -> Box<dyn VoiceReceiver> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.feeds).push(tx);
        Box::new(LoopbackReceiver { events: rx })
    }

    fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.states.subscribe()
    }

    async fn leave(&self) {
        self.left.store(true, Ordering::SeqCst);
        // 丢弃接收端发送者，接收循环随之结束
        lock(&self.feeds).clear();
        for track in lock(&self.playbacks).iter() {
            track.finish(PlaybackEnd::Idle);
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

/// 一条已打开的 loopback 音轨
pub struct LoopbackTrack {
    label: String,
    paused: AtomicBool,
    volume: AtomicU8,
    done: Mutex<Option<oneshot::Sender<PlaybackEnd>>>,
}

impl LoopbackTrack {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::SeqCst)
    }

    /// 以给定结果终结音轨；重复调用是 no-op
    pub fn finish(&self, end: PlaybackEnd) {
        if let Some(tx) = lock(&self.done).take() {
            let _ = tx.send(end);
        }
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.done).is_none()
    }
}

impl TrackControl for Arc<LoopbackTrack> {
    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.finish(PlaybackEnd::Idle);
    }

    fn set_volume(&self, percent: u8) {
        self.volume.store(percent, Ordering::SeqCst);
    }
}

struct LoopbackReceiver {
    events: mpsc::UnboundedReceiver<ReceiveEvent>,
}

#[async_trait]
impl VoiceReceiver for LoopbackReceiver {
    async fn recv(&mut self) -> Option<ReceiveEvent> {
        self.events.recv().await
    }
}

/// 锁中毒时继续使用内部数据，loopback 状态不存在跨锁不变量
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
