//! Duo Chat Core 配置模块
//!
//! 该模块提供了客户端核心的配置管理功能，包括：
//! - 配置文件加载和解析（单文件或目录）
//! - 环境特定配置覆盖
//! - 消息日志、附件存储、录音、口令等各组件配置定义

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use toml::Value;
use tracing::warn;

use crate::error::ChatError;

// 导入配置管理器模块
mod manager;
pub use manager::ConfigManager;

/// 全局应用配置实例，使用 OnceLock 确保只初始化一次
static APP_CONFIG: OnceLock<DuoChatConfig> = OnceLock::new();

/// 订阅窗口下限
pub const MIN_SUBSCRIPTION_WINDOW: usize = 50;
/// 订阅窗口上限（同时也是默认值）
pub const MAX_SUBSCRIPTION_WINDOW: usize = 100;

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别（RUST_LOG 优先）
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub with_target: bool,
    #[serde(default)]
    pub with_thread_ids: bool,
    #[serde(default)]
    pub with_file: bool,
    #[serde(default)]
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: false,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// 登录口令配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GateConfig {
    /// 共享口令
    #[serde(default)]
    pub passcode: String,
}

/// 后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogBackend {
    #[default]
    Memory,
    File,
    Firebase,
}

/// 消息日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct MessageLogConfig {
    /// 后端类型
    #[serde(default)]
    pub backend: LogBackend,
    /// 订阅窗口（最近 N 条）
    #[serde(default = "default_window")]
    pub window: usize,
    /// Realtime Database 地址
    #[serde(default)]
    pub database_url: Option<String>,
    /// 消息路径
    #[serde(default = "default_messages_path")]
    pub path: String,
    /// JSONL 日志文件路径
    #[serde(default)]
    pub file_path: Option<String>,
}

impl Default for MessageLogConfig {
    fn default() -> Self {
        Self {
            backend: LogBackend::default(),
            window: default_window(),
            database_url: None,
            path: default_messages_path(),
            file_path: None,
        }
    }
}

impl MessageLogConfig {
    /// 订阅窗口，限制在 50..=100 之间
    pub fn effective_window(&self) -> usize {
        self.window
            .clamp(MIN_SUBSCRIPTION_WINDOW, MAX_SUBSCRIPTION_WINDOW)
    }
}

fn default_window() -> usize {
    MAX_SUBSCRIPTION_WINDOW
}

fn default_messages_path() -> String {
    "private-chat-messages".to_string()
}

/// 附件存储后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaBackend {
    #[default]
    Memory,
    Local,
    Firebase,
}

/// 附件存储配置
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    #[serde(default)]
    pub backend: MediaBackend,
    /// 本地存储目录
    #[serde(default)]
    pub local_storage_dir: Option<String>,
    /// 本地基础 URL
    #[serde(default)]
    pub local_base_url: Option<String>,
    /// Storage 存储桶
    #[serde(default)]
    pub bucket: Option<String>,
    /// 上传路径前缀
    #[serde(default = "default_upload_prefix")]
    pub upload_prefix: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            backend: MediaBackend::default(),
            local_storage_dir: None,
            local_base_url: None,
            bucket: None,
            upload_prefix: default_upload_prefix(),
        }
    }
}

fn default_upload_prefix() -> String {
    "uploads".to_string()
}

/// 录音配置
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingConfig {
    /// 最小有效负载（字节），低于该值的录音视为误触并丢弃
    #[serde(default = "default_min_payload_bytes")]
    pub min_payload_bytes: usize,
    /// 录音内容类型
    #[serde(default = "default_recording_content_type")]
    pub content_type: String,
    /// 录音文件名前缀
    #[serde(default = "default_recording_prefix")]
    pub file_prefix: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            min_payload_bytes: default_min_payload_bytes(),
            content_type: default_recording_content_type(),
            file_prefix: default_recording_prefix(),
        }
    }
}

fn default_min_payload_bytes() -> usize {
    1024
}

fn default_recording_content_type() -> String {
    "audio/webm".to_string()
}

fn default_recording_prefix() -> String {
    "voice-note".to_string()
}

/// 登录会话持久化配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionConfig {
    /// 会话文件路径，未配置时仅保存在内存中
    #[serde(default)]
    pub store_path: Option<String>,
}

/// 展示配置
#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// 消息时间显示时区（IANA 名称）
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

impl DisplayConfig {
    /// 解析时区，无法识别时退回 UTC
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or_else(|_| {
            warn!(timezone = %self.timezone, "unknown display timezone, using UTC");
            chrono_tz::UTC
        })
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Duo Chat 应用配置主结构体
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DuoChatConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub message_log: MessageLogConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

impl DuoChatConfig {
    /// 校验各组件配置是否完整
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.gate.passcode.trim().is_empty() {
            return Err(ChatError::Config("gate.passcode must not be empty".into()));
        }

        match self.message_log.backend {
            LogBackend::Firebase if self.message_log.database_url.is_none() => {
                return Err(ChatError::Config(
                    "message_log.database_url is required for the firebase backend".into(),
                ));
            }
            LogBackend::File if self.message_log.file_path.is_none() => {
                return Err(ChatError::Config(
                    "message_log.file_path is required for the file backend".into(),
                ));
            }
            _ => {}
        }

        match self.media.backend {
            MediaBackend::Firebase if self.media.bucket.is_none() => {
                return Err(ChatError::Config(
                    "media.bucket is required for the firebase backend".into(),
                ));
            }
            MediaBackend::Local if self.media.local_storage_dir.is_none() => {
                return Err(ChatError::Config(
                    "media.local_storage_dir is required for the local backend".into(),
                ));
            }
            _ => {}
        }

        if self.recording.min_payload_bytes == 0 {
            warn!("recording.min_payload_bytes is 0, accidental taps will be sent");
        }

        Ok(())
    }
}

/// 加载配置
pub fn load_config(path: Option<&str>) -> &'static DuoChatConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    APP_CONFIG.get_or_init(|| load_with_fallback(&candidates, &ConfigManager::get_environment()))
}

/// 获取应用配置（未加载时返回默认配置）
pub fn app_config() -> &'static DuoChatConfig {
    APP_CONFIG.get_or_init(DuoChatConfig::default)
}

/// 从字符串解析配置
pub fn load_config_from_str(content: &str) -> Result<DuoChatConfig> {
    toml::from_str(content).context("invalid config format")
}

/// 依次尝试候选路径，第一个能解析且通过校验的配置生效
///
/// 解析成功但校验失败（例如口令为空）的来源同样被跳过
fn load_with_fallback(candidates: &[PathBuf], env: &str) -> DuoChatConfig {
    for path in candidates {
        let loaded = load_config_with_environment(path, env).and_then(|cfg| {
            cfg.validate()
                .with_context(|| format!("configuration in {} was rejected", path.display()))?;
            Ok(cfg)
        });
        match loaded {
            Ok(cfg) => return cfg,
            Err(err) => warn!(path = %path.display(), "skipping configuration source: {err:#}"),
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    DuoChatConfig::default()
}

/// 加载配置并合并指定环境的覆盖文件
pub fn load_config_with_environment(path: &Path, env: &str) -> Result<DuoChatConfig> {
    let source = ConfigSource::locate(path)?;
    let mut value = source.merge_layers()?;

    // 环境覆盖失败不影响基础配置
    if let Err(e) = ConfigManager::apply_environment(&mut value, &source.root, env) {
        warn!("failed to load environment config: {e:#}");
    }

    value
        .try_into()
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

/// 从源加载配置（不含环境覆盖）
pub fn load_config_from_source(path: &Path) -> Result<DuoChatConfig> {
    ConfigSource::locate(path)?
        .merge_layers()?
        .try_into()
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

/// 一个配置来源：根目录与按合并顺序排列的片段文件
///
/// 目录来源为 `base.toml` 加 `overrides/*.toml`（按文件名排序），
/// 单文件来源只有它自己；两者的 `environments/` 都相对于根目录查找
struct ConfigSource {
    root: PathBuf,
    layers: Vec<PathBuf>,
}

impl ConfigSource {
    fn locate(path: &Path) -> Result<Self> {
        let metadata = path
            .metadata()
            .with_context(|| format!("configuration path {} is not readable", path.display()))?;

        if !metadata.is_dir() {
            return Ok(Self {
                root: path.parent().map(Path::to_path_buf).unwrap_or_default(),
                layers: vec![path.to_path_buf()],
            });
        }

        let base = path.join("base.toml");
        if !base.is_file() {
            bail!("missing base configuration: {}", base.display());
        }
        let mut layers = vec![base];
        layers.extend(toml_fragments(&path.join("overrides"))?);

        Ok(Self {
            root: path.to_path_buf(),
            layers,
        })
    }

    /// 按顺序叠加所有片段，后者覆盖前者
    fn merge_layers(&self) -> Result<Value> {
        let mut merged = Value::Table(toml::Table::new());
        for layer in &self.layers {
            overlay(&mut merged, read_table(layer)?);
        }
        Ok(merged)
    }
}

/// 列出目录中的 `.toml` 片段，目录不存在时为空
fn toml_fragments(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut fragments: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .and_then(OsStr::to_str)
                .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"))
        })
        .collect();
    fragments.sort();
    Ok(fragments)
}

/// 读取一个片段，顶层必须是表
pub(crate) fn read_table(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let table: toml::Table = toml::from_str(&content)
        .with_context(|| format!("invalid TOML table in fragment {}", path.display()))?;
    Ok(Value::Table(table))
}

/// 把 `layer` 叠加到 `base`：表逐键递归合并，其余值整体替换
pub(crate) fn overlay(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Table(base_table), Value::Table(layer_table)) => {
            for (key, value) in layer_table {
                match base_table.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
