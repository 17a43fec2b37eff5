//! Application Layer - 用例编排与出站端口

pub mod ports;
pub mod session;
