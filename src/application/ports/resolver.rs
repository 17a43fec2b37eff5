//! Track Resolver Port - 曲目解析抽象
//!
//! 查询串 → 曲目列表。各第三方目录的具体实现不在核心范围内，
//! 核心只消费解析产出的曲目描述。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::session::Track;

/// 解析错误
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No results for query: {0}")]
    NoResults(String),

    #[error("Catalog error: {0}")]
    CatalogError(String),
}

/// Track Resolver Port
#[async_trait]
pub trait TrackResolverPort: Send + Sync {
    /// 解析查询为一批曲目（单曲、歌单皆可）
    async fn resolve(&self, query: &str, requested_by: &str) -> Result<Vec<Track>, ResolveError>;
}
