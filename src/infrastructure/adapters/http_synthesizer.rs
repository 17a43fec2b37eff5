//! HTTP Synthesizer - 调用外部语音合成 HTTP 服务
//!
//! 实现 SynthesizerPort trait，通过 HTTP 调用外部合成服务
//!
//! 外部合成 API:
//! POST {base_url}/api/synthesize
//! Request: {"text": "...", "language": "vi", "slow": false}  (JSON)
//! Response: 音频二进制 (audio/mpeg)

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::application::ports::{SynthError, SynthesizerPort};

/// 合成请求体 (JSON)
#[derive(Debug, Serialize)]
struct SynthHttpRequest<'a> {
    /// 要合成的文本
    text: &'a str,
    /// 语言代码
    language: &'a str,
    /// 慢速朗读
    slow: bool,
}

/// HTTP 合成客户端配置
#[derive(Debug, Clone)]
pub struct HttpSynthesizerConfig {
    /// 合成服务基础 URL
    pub base_url: String,
    /// 请求超时时间（秒）
    pub timeout_secs: u64,
}

impl Default for HttpSynthesizerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeout_secs: 30,
        }
    }
}

impl HttpSynthesizerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// HTTP 合成客户端
pub struct HttpSynthesizer {
    client: Client,
    config: HttpSynthesizerConfig,
}

impl HttpSynthesizer {
    pub fn new(config: HttpSynthesizerConfig) -> Result<Self, SynthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SynthError::NetworkError(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn synthesize_url(&self) -> String {
        format!("{}/api/synthesize", self.config.base_url)
    }
}

#[async_trait]
impl SynthesizerPort for HttpSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        slow: bool,
    ) -> Result<Vec<u8>, SynthError> {
        let request = SynthHttpRequest {
            text,
            language,
            slow,
        };

        tracing::debug!(
            url = %self.synthesize_url(),
            text_len = text.chars().count(),
            language = %language,
            slow,
            "Sending synthesis request"
        );

        let response = self
            .client
            .post(self.synthesize_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SynthError::Timeout
                } else if e.is_connect() {
                    SynthError::NetworkError(format!("Cannot connect to synth service: {}", e))
                } else {
                    SynthError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SynthError::ServiceError(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SynthError::InvalidResponse(format!("Failed to read audio: {}", e)))?
            .to_vec();

        if audio.is_empty() {
            return Err(SynthError::InvalidResponse("Empty audio body".to_string()));
        }

        tracing::info!(audio_size = audio.len(), language = %language, "Synthesis completed");
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HttpSynthesizerConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_config_builder() {
        let config = HttpSynthesizerConfig::new("http://synth:9000").with_timeout(10);
        assert_eq!(config.base_url, "http://synth:9000");
        assert_eq!(config.timeout_secs, 10);
    }
}
