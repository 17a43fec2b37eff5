//! Opus Packet Decoder - 接收包解码
//!
//! 把接收侧的 opus 包解成 PCM (s16le)。解码上下文有状态，
//! 用互斥量满足端口的 `&self` 约定；坏包由录音管线丢弃。

use std::sync::Mutex;

use crate::application::ports::{DecodeError, PacketDecoderPort};

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: usize = 2;
/// 单包最大帧长 120ms @ 48kHz
const MAX_FRAME_SAMPLES: usize = 5760;

/// Opus 包解码器
pub struct OpusPacketDecoder {
    decoder: Mutex<opus::Decoder>,
}

impl OpusPacketDecoder {
    pub fn new() -> Result<Self, DecodeError> {
        let decoder = opus::Decoder::new(SAMPLE_RATE, opus::Channels::Stereo)
            .map_err(|e| DecodeError::Malformed(format!("decoder init: {}", e)))?;
        Ok(Self {
            decoder: Mutex::new(decoder),
        })
    }
}

impl PacketDecoderPort for OpusPacketDecoder {
    fn decode(&self, packet: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let mut samples = vec![0i16; MAX_FRAME_SAMPLES * CHANNELS];
        let frames = {
            let mut decoder = self
                .decoder
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            decoder
                .decode(packet, &mut samples, false)
                .map_err(|e| DecodeError::Malformed(e.to_string()))?
        };

        let mut pcm = Vec::with_capacity(frames * CHANNELS * 2);
        for sample in &samples[..frames * CHANNELS] {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(pcm)
    }
}
