//! Recording Pipeline - 多说话者录音管线
//!
//! 订阅连接接收侧的说话事件，为每个说话者惰性打开独立的原始音轨
//! （append 模式，同一说话者的多次发言累积到同一文件）。静音超时
//! （默认 500ms）关闭当前分段并提交一次异步转码；坏包直接丢弃。
//!
//! stop 语义：停止订阅 → 强制关闭所有打开的 sink → 留出写入宽限期 →
//! 等待本次录音提交的全部转码任务落定（成功或失败）后返回输出目录。

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::application::ports::{ConnectionHandle, PacketDecoderPort, ReceiveEvent, VoiceReceiver};
use crate::domain::session::{GroupId, SpeakerId, VoiceError};
use crate::infrastructure::worker::{Settlement, TranscodeJob, TranscodeQueue};

/// 录音管线配置
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// 录音输出根目录（每次录音在其下建 `<group>_<timestamp>/`）
    pub output_base: PathBuf,
    /// 静音分段超时
    pub silence_timeout: Duration,
    /// stop 时的写入宽限期
    pub flush_grace: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_base: PathBuf::from("data/recordings"),
            silence_timeout: Duration::from_millis(500),
            flush_grace: Duration::from_millis(500),
        }
    }
}

/// 录音状态概要
#[derive(Debug, Clone)]
pub struct RecordingInfo {
    pub started_at: DateTime<Utc>,
    pub active_speakers: usize,
    pub output_dir: PathBuf,
}

/// 一个说话者的打开中的原始音轨
struct SpeakerCapture {
    file: tokio::fs::File,
    raw_path: PathBuf,
    target_path: PathBuf,
    last_activity: Instant,
}

/// 一次进行中的录音会话（每群组最多一个）
pub struct RecordingSession {
    started_at: DateTime<Utc>,
    output_dir: PathBuf,
    active_speakers: Arc<AtomicUsize>,
    stop_tx: Option<oneshot::Sender<()>>,
    capture_task: Option<JoinHandle<Vec<Settlement>>>,
}

impl RecordingSession {
    /// 开始录音
    ///
    /// 输出目录按群组与开始时间命名；已在录音的群组由会话 actor 拒绝
    pub async fn start(
        group: GroupId,
        connection: &Arc<dyn ConnectionHandle>,
        decoder: Arc<dyn PacketDecoderPort>,
        transcodes: TranscodeQueue,
        config: RecorderConfig,
    ) -> Result<Self, VoiceError> {
        let started_at = Utc::now();
        let timestamp = started_at.format("%Y-%m-%dT%H-%M-%S");
        let output_dir = config.output_base.join(format!("{}_{}", group, timestamp));
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| VoiceError::Internal(format!("create recording dir: {}", e)))?;

        let receiver = connection.receiver();
        let (stop_tx, stop_rx) = oneshot::channel();
        let active_speakers = Arc::new(AtomicUsize::new(0));

        let capture_task = tokio::spawn(capture_loop(
            group.clone(),
            receiver,
            decoder,
            transcodes,
            output_dir.clone(),
            config,
            active_speakers.clone(),
            stop_rx,
        ));

        tracing::info!(group = %group, dir = %output_dir.display(), "Recording started");

        Ok(Self {
            started_at,
            output_dir,
            active_speakers,
            stop_tx: Some(stop_tx),
            capture_task: Some(capture_task),
        })
    }

    pub fn info(&self) -> RecordingInfo {
        RecordingInfo {
            started_at: self.started_at,
            active_speakers: self.active_speakers.load(Ordering::Relaxed),
            output_dir: self.output_dir.clone(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 停止录音，等待全部转码任务落定后返回输出目录
    pub async fn stop(mut self) -> PathBuf {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        let settlements = match self.capture_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        // allSettled：逐个等待，失败与取消同样算落定
        let total = settlements.len();
        for settlement in settlements {
            let _ = settlement.await;
        }

        tracing::info!(
            dir = %self.output_dir.display(),
            transcodes = total,
            "Recording stopped, all transcodes settled"
        );
        self.output_dir
    }
}

/// 接收循环：惰性开轨、写入解码后的 PCM、静音分段、提交转码
#[allow(clippy::too_many_arguments)]
async fn capture_loop(
    group: GroupId,
    mut receiver: Box<dyn VoiceReceiver>,
    decoder: Arc<dyn PacketDecoderPort>,
    transcodes: TranscodeQueue,
    output_dir: PathBuf,
    config: RecorderConfig,
    active_speakers: Arc<AtomicUsize>,
    mut stop_rx: oneshot::Receiver<()>,
) -> Vec<Settlement> {
    let mut captures: HashMap<SpeakerId, SpeakerCapture> = HashMap::new();
    let mut settlements: Vec<Settlement> = Vec::new();

    loop {
        // 最近的静音判定时刻；没有打开的音轨时取一个远期兜底值
        let deadline = captures
            .values()
            .map(|c| c.last_activity + config.silence_timeout)
            .min()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            _ = &mut stop_rx => break,
            event = receiver.recv() => match event {
                None => break, // 连接关闭
                Some(ReceiveEvent::SpeakingStart(speaker)) => {
                    if let Err(e) = touch_capture(&group, &mut captures, &speaker, &output_dir, &active_speakers).await {
                        tracing::error!(group = %group, speaker = %speaker, error = %e, "Failed to open capture sink");
                    }
                }
                Some(ReceiveEvent::Packet { speaker, payload }) => {
                    let pcm = match decoder.decode(&payload) {
                        Ok(pcm) => pcm,
                        Err(e) => {
                            // 坏包丢弃，不中断音轨
                            tracing::trace!(group = %group, speaker = %speaker, error = %e, "Dropping malformed packet");
                            continue;
                        }
                    };
                    match touch_capture(&group, &mut captures, &speaker, &output_dir, &active_speakers).await {
                        Ok(capture) => {
                            if let Err(e) = capture.file.write_all(&pcm).await {
                                tracing::warn!(group = %group, speaker = %speaker, error = %e, "Capture write failed, packet dropped");
                            }
                        }
                        Err(e) => {
                            tracing::error!(group = %group, speaker = %speaker, error = %e, "Failed to open capture sink");
                        }
                    }
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                // 静音超时：关闭到期分段并提交转码
                let now = Instant::now();
                let ended: Vec<SpeakerId> = captures
                    .iter()
                    .filter(|(_, c)| now >= c.last_activity + config.silence_timeout)
                    .map(|(speaker, _)| speaker.clone())
                    .collect();
                for speaker in ended {
                    if let Some(capture) = captures.remove(&speaker) {
                        active_speakers.fetch_sub(1, Ordering::Relaxed);
                        tracing::debug!(group = %group, speaker = %speaker, "Speech segment ended");
                        settlements.push(close_and_submit(&group, capture, &transcodes).await);
                    }
                }
            }
        }
    }

    // 停止：强制关闭所有打开的 sink 并提交收尾转码
    for (speaker, capture) in captures.drain() {
        active_speakers.fetch_sub(1, Ordering::Relaxed);
        tracing::debug!(group = %group, speaker = %speaker, "Capture force-closed on stop");
        settlements.push(close_and_submit(&group, capture, &transcodes).await);
    }

    // 写入宽限期
    tokio::time::sleep(config.flush_grace).await;
    settlements
}

/// 取得（或惰性打开）某说话者的原始音轨
async fn touch_capture<'a>(
    group: &GroupId,
    captures: &'a mut HashMap<SpeakerId, SpeakerCapture>,
    speaker: &SpeakerId,
    output_dir: &Path,
    active_speakers: &Arc<AtomicUsize>,
) -> std::io::Result<&'a mut SpeakerCapture> {
    if !captures.contains_key(speaker) {
        let raw_path = output_dir.join(format!("{}.pcm", speaker));
        let target_path = output_dir.join(format!("{}.wav", speaker));
        // append 模式：同一说话者的后续发言累积到同一原始文件
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&raw_path)
            .await?;
        active_speakers.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(group = %group, speaker = %speaker, "Capture sink opened");
        captures.insert(
            speaker.clone(),
            SpeakerCapture {
                file,
                raw_path,
                target_path,
                last_activity: Instant::now(),
            },
        );
    }
    let capture = captures
        .get_mut(speaker)
        .ok_or_else(|| std::io::Error::other("capture vanished"))?;
    capture.last_activity = Instant::now();
    Ok(capture)
}

/// 刷新并关闭分段，提交该说话者迄今写入内容的转码
async fn close_and_submit(
    group: &GroupId,
    mut capture: SpeakerCapture,
    transcodes: &TranscodeQueue,
) -> Settlement {
    if let Err(e) = capture.file.flush().await {
        tracing::warn!(group = %group, error = %e, "Capture flush failed");
    }
    if let Err(e) = capture.file.sync_all().await {
        tracing::warn!(group = %group, error = %e, "Capture sync failed");
    }
    drop(capture.file);
    transcodes.submit(TranscodeJob::new(
        group.clone(),
        capture.raw_path,
        capture.target_path,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{DecodeError, TransportPort};
    use crate::domain::session::{ChannelRef, Credentials};
    use crate::infrastructure::adapters::{
        LoopbackTransport, LoopbackTransportConfig, PcmWavTranscoder,
    };
    use crate::infrastructure::worker::{TranscodeWorker, TranscodeWorkerConfig};

    /// 原样透传的解码器；0xFF 开头的包视为坏包
    struct PassthroughDecoder;

    impl PacketDecoderPort for PassthroughDecoder {
        fn decode(&self, packet: &[u8]) -> Result<Vec<u8>, DecodeError> {
            if packet.first() == Some(&0xFF) {
                return Err(DecodeError::Malformed("bad magic".to_string()));
            }
            Ok(packet.to_vec())
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        conn: Arc<crate::infrastructure::adapters::LoopbackConnection>,
        connection: Arc<dyn ConnectionHandle>,
        transcodes: TranscodeQueue,
        config: RecorderConfig,
    }

    async fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let transport = LoopbackTransport::new(LoopbackTransportConfig::default());
        let connection = transport
            .join(&ChannelRef::new("ch"), &Credentials::default())
            .await
            .unwrap();
        let conn = transport.last_connection().unwrap();

        let (transcodes, worker) = TranscodeWorker::new(
            TranscodeWorkerConfig::default(),
            Arc::new(PcmWavTranscoder::new(48000, 2)),
        );
        tokio::spawn(worker.run());

        let config = RecorderConfig {
            output_base: tmp.path().to_path_buf(),
            silence_timeout: Duration::from_millis(60),
            flush_grace: Duration::from_millis(20),
        };
        Fixture {
            _tmp: tmp,
            conn,
            connection,
            transcodes,
            config,
        }
    }

    fn speech(speaker: &str, payload: &[u8]) -> [ReceiveEvent; 2] {
        [
            ReceiveEvent::SpeakingStart(SpeakerId::new(speaker)),
            ReceiveEvent::Packet {
                speaker: SpeakerId::new(speaker),
                payload: payload.to_vec(),
            },
        ]
    }

    #[tokio::test]
    async fn test_stop_waits_for_all_transcodes_to_settle() {
        let f = fixture().await;
        let session = RecordingSession::start(
            GroupId::new("g1"),
            &f.connection,
            Arc::new(PassthroughDecoder),
            f.transcodes.clone(),
            f.config.clone(),
        )
        .await
        .unwrap();

        // 三个说话者各产生一个分段
        for speaker in ["alice", "bob", "carol"] {
            for event in speech(speaker, &[1, 2, 3, 4]) {
                f.conn.feed(event);
            }
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let dir = session.stop().await;
        // stop 返回时三个转码产物必须全部就位
        for speaker in ["alice", "bob", "carol"] {
            assert!(dir.join(format!("{}.pcm", speaker)).exists());
            assert!(dir.join(format!("{}.wav", speaker)).exists());
        }
    }

    #[tokio::test]
    async fn test_silence_timeout_closes_segment_and_transcodes() {
        let f = fixture().await;
        let session = RecordingSession::start(
            GroupId::new("g1"),
            &f.connection,
            Arc::new(PassthroughDecoder),
            f.transcodes.clone(),
            f.config.clone(),
        )
        .await
        .unwrap();

        for event in speech("alice", &[9, 9, 9, 9]) {
            f.conn.feed(event);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.info().active_speakers, 1);

        // 静音超时后分段关闭并转码
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(session.info().active_speakers, 0);
        assert!(session.output_dir().join("alice.wav").exists());

        session.stop().await;
    }

    #[tokio::test]
    async fn test_repeated_bursts_append_to_same_artifact() {
        let f = fixture().await;
        let session = RecordingSession::start(
            GroupId::new("g1"),
            &f.connection,
            Arc::new(PassthroughDecoder),
            f.transcodes.clone(),
            f.config.clone(),
        )
        .await
        .unwrap();

        for event in speech("alice", &[1, 1, 1, 1]) {
            f.conn.feed(event);
        }
        // 等第一个分段因静音关闭
        tokio::time::sleep(Duration::from_millis(150)).await;

        for event in speech("alice", &[2, 2, 2, 2]) {
            f.conn.feed(event);
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let dir = session.stop().await;
        let raw = std::fs::read(dir.join("alice.pcm")).unwrap();
        // 两次发言都累积在同一个原始文件里
        assert_eq!(raw, vec![1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[tokio::test]
    async fn test_malformed_packets_are_dropped() {
        let f = fixture().await;
        let session = RecordingSession::start(
            GroupId::new("g1"),
            &f.connection,
            Arc::new(PassthroughDecoder),
            f.transcodes.clone(),
            f.config.clone(),
        )
        .await
        .unwrap();

        f.conn
            .feed(ReceiveEvent::SpeakingStart(SpeakerId::new("alice")));
        f.conn.feed(ReceiveEvent::Packet {
            speaker: SpeakerId::new("alice"),
            payload: vec![0xFF, 0xFF],
        });
        f.conn.feed(ReceiveEvent::Packet {
            speaker: SpeakerId::new("alice"),
            payload: vec![7, 7],
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let dir = session.stop().await;
        let raw = std::fs::read(dir.join("alice.pcm")).unwrap();
        assert_eq!(raw, vec![7, 7]);
    }
}
