//! Application Session - 语音会话编排
//!
//! 会话层把域状态机（播报队列、音乐队列）、独占播放器、连接监督者
//! 与录音管线装配成每群组一个的 actor，再由注册表维护群组 → 会话映射

pub mod actor;
pub mod player;
pub mod recorder;
pub mod registry;
pub mod supervisor;

pub use actor::{SessionActor, SessionConfig, SessionHandle};
pub use player::{ExclusivePlayer, Producer};
pub use recorder::{RecorderConfig, RecordingInfo, RecordingSession};
pub use registry::{SessionDeps, SessionRegistry};
