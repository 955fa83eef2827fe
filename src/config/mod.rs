/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖和配置验证
use crate::impl_default;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod particles;

pub use particles::{BoundsConfig, GpuParticleConfig};

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 模拟主配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// GPU 粒子配置
    #[serde(default)]
    pub particles: GpuParticleConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SimulationConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("GPU_PARTICLES_TEX_SIZE") {
            if let Ok(size) = val.parse() {
                self.particles.tex_size = size;
            }
        }
        if let Ok(val) = env::var("GPU_PARTICLES_TILE_SIZE") {
            if let Ok(size) = val.parse() {
                self.particles.tile_size = size;
            }
        }
        if let Ok(val) = env::var("GPU_PARTICLES_TILES_PER_INSTANCE") {
            if let Ok(count) = val.parse() {
                self.particles.tiles_per_instance = count;
            }
        }
        if let Ok(val) = env::var("GPU_PARTICLES_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                self.logging.level = level;
            }
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.particles.validate()
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./gpu_particles.toml
    /// 2. ./gpu_particles.json
    /// 3. ~/.config/gpu_particles/config.toml
    /// 4. 使用默认配置
    ///
    /// 无效的配置文件会被跳过。
    pub fn load_or_default() -> Self {
        if let Some(config) = Self::try_load("gpu_particles.toml", |p| Self::from_toml_file(p)) {
            return config;
        }

        if let Some(config) = Self::try_load("gpu_particles.json", |p| Self::from_json_file(p)) {
            return config;
        }

        if let Some(home) = env::var_os("HOME") {
            let config_path = PathBuf::from(home)
                .join(".config")
                .join("gpu_particles")
                .join("config.toml");

            if let Some(config) = Self::try_load(&config_path, |p| Self::from_toml_file(p)) {
                return config;
            }
        }

        tracing::info!(target: "config", "Using default configuration");
        Self::default()
    }

    fn try_load<P: AsRef<Path>>(
        path: P,
        load: impl Fn(&Path) -> ConfigResult<Self>,
    ) -> Option<Self> {
        let path = path.as_ref();
        let config = load(path).ok()?;
        match config.validate() {
            Ok(()) => {
                tracing::info!(target: "config", "Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!(target: "config", "Ignoring invalid config {:?}: {}", path, e);
                None
            }
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到控制台
    pub log_to_console: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_console: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    /// 解析日志级别（大小写不敏感）
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}
