//! 统一错误处理模块
//!
//! 提供粒子模拟核心范围内的统一错误类型定义
//!
//! ## 错误类型分层
//!
//! - **渲染后端错误** (`RenderError`): 资源创建、句柄失效、计算调度和回读失败
//! - **配置错误** (`config::ConfigError`): 配置文件读取、解析和验证
//!
//! 图集耗尽不是错误：分配器返回 `None`，调用方按部分接纳处理。
//! `EngineError` 可以同时承载以上两类错误。

use crate::config::ConfigError;
use thiserror::Error;

/// 核心错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Initialization error: {0}")]
    Init(String),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 渲染后端错误
///
/// 由渲染后端产生，核心不做重试，直接向上传播，本帧视为失败。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Failed to request adapter: no compatible GPU found")]
    NoAdapter,

    #[error("Failed to request device: {0}")]
    DeviceRequest(String),

    #[error("Failed to create buffer: {0}")]
    BufferCreation(String),

    #[error("Failed to create texture: {0}")]
    TextureCreation(String),

    #[error("Invalid resource handle: {0}")]
    InvalidHandle(String),

    #[error("Buffer access out of bounds: offset {offset} + {len} bytes exceeds {size} bytes")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("Material not registered with backend: {0}")]
    MissingMaterial(String),

    #[error("Material {material} is missing parameter {name}")]
    MissingParameter { material: String, name: String },

    #[error("Invalid render state: {0}")]
    InvalidState(String),

    #[error("GPU read-back failed: {0}")]
    ReadBack(String),
}

/// 结果类型别名
pub type EngineResult<T> = Result<T, EngineError>;
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let render_err = RenderError::InvalidState("no render target".to_string());
        let engine_err: EngineError = render_err.into();
        assert!(matches!(engine_err, EngineError::Render(_)));

        let config_err = ConfigError::ValidationError("tile_size".to_string());
        let engine_err: EngineError = config_err.into();
        assert!(matches!(engine_err, EngineError::Config(_)));
    }

    #[test]
    fn test_error_display() {
        let err = RenderError::NoAdapter;
        assert_eq!(
            err.to_string(),
            "Failed to request adapter: no compatible GPU found"
        );

        let err = RenderError::OutOfBounds {
            offset: 8,
            len: 16,
            size: 16,
        };
        assert_eq!(
            err.to_string(),
            "Buffer access out of bounds: offset 8 + 16 bytes exceeds 16 bytes"
        );
    }
}
