//! Infrastructure Workers - 后台任务处理

mod transcode_worker;

pub use transcode_worker::{
    Settlement, TranscodeJob, TranscodeQueue, TranscodeWorker, TranscodeWorkerConfig,
};
