//! WGPU 渲染后端
//!
//! ## 模块结构
//!
//! - `types`: 抽象类型到 wgpu 类型的转换
//! - `backend`: `WgpuBackend`，实现 [`RenderBackend`](crate::render::backend::RenderBackend)
//!
//! ## 使用方式
//!
//! ```ignore
//! use gpu_particles::render::wgpu_modules::{WgpuBackend, WgpuMaterialPipeline};
//! ```

pub mod backend;
pub mod types;

// 重导出主要类型
pub use backend::{PipelineKind, WgpuBackend, WgpuMaterialPipeline};
pub use types::StreamLayout;
