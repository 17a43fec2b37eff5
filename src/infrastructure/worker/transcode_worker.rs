//! Transcode Worker - 后台录音转码处理
//!
//! 进程级转码池，被所有群组的录音共享。用 semaphore 限制并发，
//! 避免无上界的资源占用。单个任务失败只记录日志并落定为失败，
//! 绝不影响所属录音会话的其余任务。

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use uuid::Uuid;

use crate::application::ports::{TranscodeError, TranscoderPort};
use crate::domain::session::GroupId;

/// Worker 配置
#[derive(Debug, Clone)]
pub struct TranscodeWorkerConfig {
    /// 最大并发转码数
    pub max_concurrent: usize,
    /// 任务队列容量
    pub queue_capacity: usize,
}

impl Default for TranscodeWorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            queue_capacity: 256,
        }
    }
}

/// 一个转码任务：原始录音文件 → 可分发文件
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub job_id: String,
    pub group: GroupId,
    pub raw_path: PathBuf,
    pub target_path: PathBuf,
}

impl TranscodeJob {
    pub fn new(group: GroupId, raw_path: PathBuf, target_path: PathBuf) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            group,
            raw_path,
            target_path,
        }
    }
}

struct QueuedJob {
    job: TranscodeJob,
    done: oneshot::Sender<Result<(), TranscodeError>>,
}

/// 任务落定信号：成功与失败都算落定；发送端被丢弃同样视为落定
pub type Settlement = oneshot::Receiver<Result<(), TranscodeError>>;

/// 转码队列提交端（可克隆，跨群组共享）
#[derive(Clone)]
pub struct TranscodeQueue {
    sender: mpsc::Sender<QueuedJob>,
}

impl TranscodeQueue {
    /// 提交转码任务，返回落定信号
    ///
    /// 队列满或 worker 已停时任务立即落定为失败
    pub fn submit(&self, job: TranscodeJob) -> Settlement {
        let (done_tx, done_rx) = oneshot::channel();
        let queued = QueuedJob {
            job,
            done: done_tx,
        };
        match self.sender.try_send(queued) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(queued))
            | Err(mpsc::error::TrySendError::Closed(queued)) => {
                tracing::warn!(
                    job_id = %queued.job.job_id,
                    group = %queued.job.group,
                    "Transcode queue unavailable, job settled as failed"
                );
                let _ = queued.done.send(Err(TranscodeError::WorkerUnavailable));
            }
        }
        done_rx
    }
}

/// 转码 Worker
///
/// 后台任务处理器，从队列消费任务并以有界并发执行转码
pub struct TranscodeWorker {
    config: TranscodeWorkerConfig,
    receiver: mpsc::Receiver<QueuedJob>,
    transcoder: Arc<dyn TranscoderPort>,
}

impl TranscodeWorker {
    /// 创建 worker 与其提交端
    pub fn new(
        config: TranscodeWorkerConfig,
        transcoder: Arc<dyn TranscoderPort>,
    ) -> (TranscodeQueue, Self) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        (
            TranscodeQueue { sender },
            Self {
                config,
                receiver,
                transcoder,
            },
        )
    }

    /// 启动 Worker
    pub async fn run(mut self) {
        tracing::info!(
            max_concurrent = self.config.max_concurrent,
            "TranscodeWorker started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));

        while let Some(queued) = self.receiver.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let transcoder = self.transcoder.clone();

            tokio::spawn(async move {
                let _permit = permit; // 持有 permit 直到任务完成
                let QueuedJob { job, done } = queued;

                tracing::debug!(
                    job_id = %job.job_id,
                    group = %job.group,
                    raw = %job.raw_path.display(),
                    "Transcode started"
                );

                let result = transcoder.transcode(&job.raw_path, &job.target_path).await;
                match &result {
                    Ok(()) => tracing::info!(
                        job_id = %job.job_id,
                        group = %job.group,
                        target = %job.target_path.display(),
                        "Transcode completed"
                    ),
                    Err(e) => tracing::error!(
                        job_id = %job.job_id,
                        group = %job.group,
                        error = %e,
                        "Transcode failed"
                    ),
                }

                let _ = done.send(result);
            });
        }

        tracing::info!("TranscodeWorker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 记录峰值并发的慢速转码器
    struct SlowTranscoder {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TranscoderPort for SlowTranscoder {
        async fn transcode(&self, raw: &Path, _target: &Path) -> Result<(), TranscodeError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if raw.to_string_lossy().contains("bad") {
                return Err(TranscodeError::InvalidInput("bad input".to_string()));
            }
            Ok(())
        }
    }

    fn job(name: &str) -> TranscodeJob {
        TranscodeJob::new(
            GroupId::new("g1"),
            PathBuf::from(format!("/tmp/{}.pcm", name)),
            PathBuf::from(format!("/tmp/{}.wav", name)),
        )
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let transcoder = Arc::new(SlowTranscoder {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let (queue, worker) = TranscodeWorker::new(
            TranscodeWorkerConfig {
                max_concurrent: 2,
                queue_capacity: 16,
            },
            transcoder.clone(),
        );
        tokio::spawn(worker.run());

        let settlements: Vec<_> = (0..6).map(|i| queue.submit(job(&format!("s{}", i)))).collect();
        for settlement in settlements {
            assert!(settlement.await.unwrap().is_ok());
        }
        assert!(transcoder.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failed_job_settles_without_blocking_others() {
        let transcoder = Arc::new(SlowTranscoder {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let (queue, worker) =
            TranscodeWorker::new(TranscodeWorkerConfig::default(), transcoder);
        tokio::spawn(worker.run());

        let bad = queue.submit(job("bad"));
        let good = queue.submit(job("good"));

        assert!(bad.await.unwrap().is_err());
        assert!(good.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_submit_after_worker_stop_settles_failed() {
        let transcoder = Arc::new(SlowTranscoder {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let (queue, worker) =
            TranscodeWorker::new(TranscodeWorkerConfig::default(), transcoder);
        drop(worker);

        let settlement = queue.submit(job("late"));
        assert!(matches!(
            settlement.await,
            Ok(Err(TranscodeError::WorkerUnavailable))
        ));
    }
}
