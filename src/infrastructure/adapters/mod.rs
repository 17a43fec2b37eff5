//! Infrastructure Adapters - 出站端口的具体实现

mod fake_resolver;
mod fake_synthesizer;
mod http_synthesizer;
mod loopback_transport;
mod opus_decoder;
mod pcm_wav_transcoder;
mod tracing_notifier;

pub use fake_resolver::FakeResolver;
pub use fake_synthesizer::FakeSynthesizer;
pub use http_synthesizer::{HttpSynthesizer, HttpSynthesizerConfig};
pub use loopback_transport::{
    LoopbackConnection, LoopbackTrack, LoopbackTransport, LoopbackTransportConfig,
};
pub use opus_decoder::OpusPacketDecoder;
pub use pcm_wav_transcoder::PcmWavTranscoder;
pub use tracing_notifier::TracingNotifier;
