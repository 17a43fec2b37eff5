//! PCM → WAV Transcoder - 原始录音的打包转码
//!
//! 录音管线落盘的是裸 PCM (s16le)，按固定采样率与声道数
//! 封装 RIFF/WAVE 头即可分发。

use async_trait::async_trait;
use std::path::Path;

use crate::application::ports::{TranscodeError, TranscoderPort};

/// PCM → WAV 转码器
pub struct PcmWavTranscoder {
    sample_rate: u32,
    channels: u16,
}

impl PcmWavTranscoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// 为裸 PCM 数据生成 44 字节 RIFF/WAVE 头
    fn wav_header(&self, data_size: usize) -> Vec<u8> {
        let bits_per_sample: u16 = 16;
        let byte_rate = self.sample_rate * self.channels as u32 * (bits_per_sample / 8) as u32;
        let block_align = self.channels * (bits_per_sample / 8);
        let file_size = 36 + data_size;

        let mut header = Vec::with_capacity(44);
        header.extend_from_slice(b"RIFF");
        header.extend_from_slice(&(file_size as u32).to_le_bytes());
        header.extend_from_slice(b"WAVE");

        header.extend_from_slice(b"fmt ");
        header.extend_from_slice(&16u32.to_le_bytes());
        header.extend_from_slice(&1u16.to_le_bytes()); // PCM
        header.extend_from_slice(&self.channels.to_le_bytes());
        header.extend_from_slice(&self.sample_rate.to_le_bytes());
        header.extend_from_slice(&byte_rate.to_le_bytes());
        header.extend_from_slice(&block_align.to_le_bytes());
        header.extend_from_slice(&bits_per_sample.to_le_bytes());

        header.extend_from_slice(b"data");
        header.extend_from_slice(&(data_size as u32).to_le_bytes());
        header
    }
}

#[async_trait]
impl TranscoderPort for PcmWavTranscoder {
    async fn transcode(&self, raw_path: &Path, target_path: &Path) -> Result<(), TranscodeError> {
        let pcm = tokio::fs::read(raw_path)
            .await
            .map_err(|e| TranscodeError::IoError(format!("read {}: {}", raw_path.display(), e)))?;

        if pcm.is_empty() {
            return Err(TranscodeError::InvalidInput(format!(
                "empty raw capture: {}",
                raw_path.display()
            )));
        }

        let mut wav = self.wav_header(pcm.len());
        wav.extend_from_slice(&pcm);

        tokio::fs::write(target_path, &wav).await.map_err(|e| {
            TranscodeError::IoError(format!("write {}: {}", target_path.display(), e))
        })?;

        tracing::debug!(
            raw = %raw_path.display(),
            target = %target_path.display(),
            pcm_size = pcm.len(),
            "Raw capture packaged as WAV"
        );
        Ok(())
    }
}
