//! Domain Layer - 领域层
//!
//! Session Context: 群组语音会话上下文（纯状态机，无 I/O）

pub mod session;
