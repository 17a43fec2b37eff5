//! Fake Synthesizer - 用于测试的合成客户端
//!
//! 不调用外部服务，把文本字节原样当作"音频"返回

use async_trait::async_trait;

use crate::application::ports::{SynthError, SynthesizerPort};

/// Fake 合成客户端
///
/// 文本包含 `fail_marker` 时返回合成失败（合成失败跳过路径）
pub struct FakeSynthesizer {
    fail_marker: Option<String>,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self { fail_marker: None }
    }

    pub fn failing_on(marker: impl Into<String>) -> Self {
        Self {
            fail_marker: Some(marker.into()),
        }
    }
}

impl Default for FakeSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SynthesizerPort for FakeSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        _slow: bool,
    ) -> Result<Vec<u8>, SynthError> {
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(SynthError::ServiceError("synthesis rejected".to_string()));
            }
        }
        tracing::debug!(
            text_len = text.chars().count(),
            language = %language,
            "FakeSynthesizer: returning text bytes as audio"
        );
        Ok(text.as_bytes().to_vec())
    }
}
