//! Chorus - 群组语音会话编排系统
//!
//! 架构设计: DDD + Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - Session Context: 播报队列、音乐队列、连接状态等纯状态机
//!
//! 应用层 (application/):
//! - Ports: 端口定义（Transport, Synthesizer, PacketDecoder, Transcoder,
//!   TrackResolver, Notifier）
//! - Session: 每群组会话 actor、独占播放器、连接监督者、录音管线、
//!   会话注册表
//!
//! 基础设施层 (infrastructure/):
//! - Adapters: Loopback 传输、HTTP 合成客户端、opus 解码、PCM→WAV 转码
//! - Worker: 进程级有界并发转码池

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::session::{SessionConfig, SessionDeps, SessionRegistry};
pub use config::{load_config, AppConfig};
