//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（config.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::AppConfig;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["config", "config.local"];

/// 加载应用配置
///
/// 按优先级从高到低合并配置：
/// 1. 环境变量（前缀 `CHORUS_`，层级分隔符 `__`）
/// 2. 配置文件（config.toml 或 config.local.toml）
/// 3. 默认值
///
/// # 环境变量示例
/// - `CHORUS_VOICE__TOKEN=xxxx`
/// - `CHORUS_VOICE__READY_TIMEOUT_SECS=10`
/// - `CHORUS_SYNTH__URL=http://synth:8000`
/// - `CHORUS_RECORDING__OUTPUT_DIR=/data/recordings`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(None)
}

/// 从指定路径加载配置
///
/// # 参数
/// - `config_path` - 可选的配置文件路径，如果为 None 则使用默认搜索路径
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 首先设置默认值（最低优先级）
    builder = builder
        .set_default("voice.token", "")?
        .set_default("voice.ready_timeout_secs", 10)?
        .set_default("voice.recover_timeout_secs", 5)?
        .set_default("announce.text_cap", 500)?
        .set_default("announce.default_language", "vi")?
        .set_default("music.max_consecutive_failures", 3)?
        .set_default("music.default_volume", 100)?
        .set_default("synth.url", "http://localhost:8000")?
        .set_default("synth.timeout_secs", 30)?
        .set_default("recording.output_dir", "data/recordings")?
        .set_default("recording.silence_timeout_ms", 500)?
        .set_default("recording.flush_grace_ms", 500)?
        .set_default("recording.max_concurrent_transcodes", 2)?
        .set_default("recording.transcode_queue_capacity", 256)?
        .set_default("recording.sample_rate", 48000)?
        .set_default("recording.channels", 2)?
        .set_default("log.level", "info")?
        .set_default("log.json", false)?;

    // 2. 添加配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        // 搜索默认配置文件
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 添加环境变量（最高优先级）
    // 前缀: CHORUS_
    // 层级分隔符: __ (双下划线)
    // 例如: CHORUS_SYNTH__URL=http://synth:8000
    builder = builder.add_source(
        Environment::with_prefix("CHORUS")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    // 4. 构建配置
    let config = builder.build()?;

    // 5. 反序列化为 AppConfig
    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::ParseError(format!("Failed to deserialize config: {}", e)))?;

    // 6. 验证配置
    validate_config(&app_config)?;

    Ok(app_config)
}

/// 验证配置有效性
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.voice.ready_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "Ready timeout cannot be 0".to_string(),
        ));
    }

    if config.announce.text_cap == 0 {
        return Err(ConfigError::ValidationError(
            "Announcement text cap cannot be 0".to_string(),
        ));
    }

    if config.music.max_consecutive_failures == 0 {
        return Err(ConfigError::ValidationError(
            "Max consecutive failures cannot be 0".to_string(),
        ));
    }

    if config.synth.url.is_empty() {
        return Err(ConfigError::ValidationError(
            "Synth URL cannot be empty".to_string(),
        ));
    }

    if config.recording.max_concurrent_transcodes == 0 {
        return Err(ConfigError::ValidationError(
            "Max concurrent transcodes cannot be 0".to_string(),
        ));
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Application Configuration ===");
    tracing::info!("Ready Timeout: {}s", config.voice.ready_timeout_secs);
    tracing::info!("Recover Timeout: {}s", config.voice.recover_timeout_secs);
    tracing::info!("Announce Text Cap: {} chars", config.announce.text_cap);
    tracing::info!("Announce Language: {}", config.announce.default_language);
    tracing::info!(
        "Music Failure Cap: {}",
        config.music.max_consecutive_failures
    );
    tracing::info!("Synth URL: {}", config.synth.url);
    tracing::info!("Synth Timeout: {}s", config.synth.timeout_secs);
    tracing::info!("Recording Directory: {:?}", config.recording.output_dir);
    tracing::info!(
        "Recording Silence Timeout: {}ms",
        config.recording.silence_timeout_ms
    );
    tracing::info!(
        "Transcode Concurrency: {}",
        config.recording.max_concurrent_transcodes
    );
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}
