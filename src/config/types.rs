//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::application::session::{RecorderConfig, SessionConfig};
use crate::infrastructure::worker::TranscodeWorkerConfig;

/// 应用主配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// 语音连接配置
    #[serde(default)]
    pub voice: VoiceConfig,

    /// 播报配置
    #[serde(default)]
    pub announce: AnnounceConfig,

    /// 音乐播放配置
    #[serde(default)]
    pub music: MusicConfig,

    /// 合成服务配置
    #[serde(default)]
    pub synth: SynthConfig,

    /// 录音配置
    #[serde(default)]
    pub recording: RecordingConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            voice: VoiceConfig::default(),
            announce: AnnounceConfig::default(),
            music: MusicConfig::default(),
            synth: SynthConfig::default(),
            recording: RecordingConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// 装配会话级配置
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ready_timeout: Duration::from_secs(self.voice.ready_timeout_secs),
            recover_timeout: Duration::from_secs(self.voice.recover_timeout_secs),
            text_cap: self.announce.text_cap,
            default_language: self.announce.default_language.clone(),
            max_consecutive_failures: self.music.max_consecutive_failures,
            default_volume: self.music.default_volume,
            recorder: RecorderConfig {
                output_base: self.recording.output_dir.clone(),
                silence_timeout: Duration::from_millis(self.recording.silence_timeout_ms),
                flush_grace: Duration::from_millis(self.recording.flush_grace_ms),
            },
        }
    }

    /// 装配转码 worker 配置
    pub fn transcode_worker_config(&self) -> TranscodeWorkerConfig {
        TranscodeWorkerConfig {
            max_concurrent: self.recording.max_concurrent_transcodes,
            queue_capacity: self.recording.transcode_queue_capacity,
        }
    }
}

/// 语音连接配置
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    /// 接入凭据（对核心不透明，原样传给传输层）
    #[serde(default)]
    pub token: String,

    /// 握手就绪超时（秒）
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// 断线恢复超时（秒）
    #[serde(default = "default_recover_timeout")]
    pub recover_timeout_secs: u64,
}

fn default_ready_timeout() -> u64 {
    10
}

fn default_recover_timeout() -> u64 {
    5
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            ready_timeout_secs: default_ready_timeout(),
            recover_timeout_secs: default_recover_timeout(),
        }
    }
}

/// 播报配置
#[derive(Debug, Clone, Deserialize)]
pub struct AnnounceConfig {
    /// 文本长度上限（字符），超出部分截断
    #[serde(default = "default_text_cap")]
    pub text_cap: usize,

    /// 默认语言代码
    #[serde(default = "default_language")]
    pub default_language: String,
}

fn default_text_cap() -> usize {
    500
}

fn default_language() -> String {
    "vi".to_string()
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            text_cap: default_text_cap(),
            default_language: default_language(),
        }
    }
}

/// 音乐播放配置
#[derive(Debug, Clone, Deserialize)]
pub struct MusicConfig {
    /// 连续打开失败上限，达到后硬停
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,

    /// 默认音量百分比
    #[serde(default = "default_volume")]
    pub default_volume: u8,
}

fn default_max_failures() -> u32 {
    3
}

fn default_volume() -> u8 {
    100
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_failures(),
            default_volume: default_volume(),
        }
    }
}

/// 合成服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct SynthConfig {
    /// 合成服务基础 URL
    #[serde(default = "default_synth_url")]
    pub url: String,

    /// 请求超时时间（秒）
    #[serde(default = "default_synth_timeout")]
    pub timeout_secs: u64,
}

fn default_synth_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_synth_timeout() -> u64 {
    30
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            url: default_synth_url(),
            timeout_secs: default_synth_timeout(),
        }
    }
}

/// 录音配置
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    /// 录音输出根目录
    #[serde(default = "default_recording_dir")]
    pub output_dir: PathBuf,

    /// 静音分段超时（毫秒）
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_ms: u64,

    /// stop 时的写入宽限期（毫秒）
    #[serde(default = "default_flush_grace")]
    pub flush_grace_ms: u64,

    /// 最大并发转码数
    #[serde(default = "default_max_transcodes")]
    pub max_concurrent_transcodes: usize,

    /// 转码队列容量
    #[serde(default = "default_transcode_queue")]
    pub transcode_queue_capacity: usize,

    /// 录音采样率（Hz）
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// 录音声道数
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_recording_dir() -> PathBuf {
    PathBuf::from("data/recordings")
}

fn default_silence_timeout() -> u64 {
    500
}

fn default_flush_grace() -> u64 {
    500
}

fn default_max_transcodes() -> usize {
    2
}

fn default_transcode_queue() -> usize {
    256
}

fn default_sample_rate() -> u32 {
    48000
}

fn default_channels() -> u16 {
    2
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_recording_dir(),
            silence_timeout_ms: default_silence_timeout(),
            flush_grace_ms: default_flush_grace(),
            max_concurrent_transcodes: default_max_transcodes(),
            transcode_queue_capacity: default_transcode_queue(),
            sample_rate: default_sample_rate(),
            channels: default_channels(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否启用 JSON 格式
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
