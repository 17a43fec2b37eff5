//! Fake Resolver - 用于测试与本地运行的曲目解析
//!
//! 预先注册 查询 → 曲目列表 的映射；未注册的查询返回 NoResults

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::application::ports::{ResolveError, TrackResolverPort};
use crate::domain::session::{SourceKind, Track};

pub struct FakeResolver {
    catalog: Mutex<HashMap<String, Vec<Track>>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self {
            catalog: Mutex::new(HashMap::new()),
        }
    }

    /// 注册一个查询的解析结果
    pub fn register(&self, query: impl Into<String>, tracks: Vec<Track>) {
        self.catalog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(query.into(), tracks);
    }

    /// 注册一个以查询串本身为标题与地址的单曲
    pub fn register_single(&self, query: impl Into<String>) {
        let query = query.into();
        let track = Track {
            title: query.clone(),
            source_uri: query.clone(),
            duration_display: None,
            thumbnail: None,
            source_kind: SourceKind::Primary,
            requested_by: None,
        };
        self.register(query, vec![track]);
    }
}

impl Default for FakeResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackResolverPort for FakeResolver {
    async fn resolve(&self, query: &str, requested_by: &str) -> Result<Vec<Track>, ResolveError> {
        let tracks = self
            .catalog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(query)
            .cloned()
            .ok_or_else(|| ResolveError::NoResults(query.to_string()))?;

        Ok(tracks
            .into_iter()
            .map(|mut track| {
                track.requested_by = Some(requested_by.to_string());
                track
            })
            .collect())
    }
}
