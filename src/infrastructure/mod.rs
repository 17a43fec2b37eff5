//! Infrastructure Layer - 端口的具体实现与后台 worker

pub mod adapters;
pub mod worker;
