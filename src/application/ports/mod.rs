//! Application Ports - 出站端口定义
//!
//! 定义核心与外部协作者之间的抽象接口，具体实现在 infrastructure/adapters 层

mod decoder;
mod notifier;
mod resolver;
mod synthesizer;
mod transcoder;
mod transport;

pub use decoder::{DecodeError, PacketDecoderPort};
pub use notifier::{Notice, NotifierPort};
pub use resolver::{ResolveError, TrackResolverPort};
pub use synthesizer::{SynthError, SynthesizerPort};
pub use transcoder::{TranscodeError, TranscoderPort};
pub use transport::{
    ActiveTrack, AudioSource, ConnectionHandle, PlaybackEnd, ReceiveEvent, TrackControl,
    TransportError, TransportPort, VoiceReceiver,
};
