//! Session Context - 群组语音会话上下文
//!
//! 每个群组同一时刻最多存在一个语音会话。会话内三个独立的音频生产者
//! （语音播报、音乐队列、多人录音）共享同一个连接与独占播放器。
//!
//! 本模块只包含纯状态与状态转移逻辑，所有 I/O 由应用层编排。

mod announcement;
mod connection;
mod errors;
mod music;
mod value_objects;

pub use announcement::{AnnouncementJob, AnnouncementQueue};
pub use connection::ConnectionState;
pub use errors::VoiceError;
pub use music::{Advance, LoopMode, MusicQueueState, QueueSnapshot, SourceKind, Track};
pub use value_objects::{ChannelRef, Credentials, GroupId, SpeakerId};
