//! Chorus - 群组语音会话编排系统
//!
//! 装配顺序:
//! - Domain: session/ 纯状态机
//! - Application: ports, session (actor / player / supervisor / recorder / registry)
//! - Infrastructure: adapters, worker

use std::sync::Arc;

use chorus::application::session::{SessionDeps, SessionRegistry};
use chorus::config::{load_config, print_config};
use chorus::domain::session::Credentials;
use chorus::infrastructure::adapters::{
    FakeResolver, HttpSynthesizer, HttpSynthesizerConfig, LoopbackTransport,
    LoopbackTransportConfig, OpusPacketDecoder, PcmWavTranscoder, TracingNotifier,
};
use chorus::infrastructure::worker::TranscodeWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // 初始化日志
    let log_filter = format!("{},chorus={}", config.log.level, config.log.level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter)),
        )
        .init();

    tracing::info!("Chorus - 群组语音会话编排系统");
    print_config(&config);

    // 确保录音目录存在
    tokio::fs::create_dir_all(&config.recording.output_dir).await?;

    // 传输层：进程内 loopback（真实网络传输在部署侧接入）
    let transport = Arc::new(LoopbackTransport::new(LoopbackTransportConfig::default()));

    // HTTP 合成客户端
    let synth_config = HttpSynthesizerConfig {
        base_url: config.synth.url.clone(),
        timeout_secs: config.synth.timeout_secs,
    };
    let synthesizer = Arc::new(HttpSynthesizer::new(synth_config)?);

    // 接收包解码器
    let decoder =
        Arc::new(OpusPacketDecoder::new().map_err(|e| anyhow::anyhow!("opus init: {}", e))?);

    // 转码 worker（进程级，跨群组共享）
    let transcoder = Arc::new(PcmWavTranscoder::new(
        config.recording.sample_rate,
        config.recording.channels,
    ));
    let (transcodes, worker) = TranscodeWorker::new(config.transcode_worker_config(), transcoder);
    tokio::spawn(worker.run());

    // 会话注册表
    let deps = SessionDeps {
        transport,
        synthesizer,
        decoder,
        notifier: Arc::new(TracingNotifier),
        resolver: Arc::new(FakeResolver::new()),
        transcodes,
    };
    let registry = SessionRegistry::new(
        config.session_config(),
        Credentials::new(config.voice.token.clone()),
        deps,
    );

    tracing::info!("Session registry ready");

    // 等待关闭信号，逐群组优雅拆除会话
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    registry.shutdown().await;
    tracing::info!("All voice sessions closed");

    Ok(())
}
