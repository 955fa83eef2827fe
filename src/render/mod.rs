//! 渲染模块
//!
//! - `backend`: 渲染后端抽象
//! - `material`: 材质与参数绑定
//! - `recording`: 记录命令的内存后端
//! - `wgpu_modules`: wgpu 后端
//! - `particles`: GPU 粒子模拟核心

pub mod backend;
pub mod material;
pub mod particles;
pub mod recording;
pub mod wgpu_modules;

pub use backend::{
    BackendCapabilities, BufferDescriptor, BufferHandle, BufferUsage, DrawIndexed, IndexFormat,
    RenderBackend, RenderTargetHandle, TextureDescriptor, TextureFormat, TextureHandle,
    TextureUsage, VertexElement, VertexFormat, VertexLayout, VertexStepMode,
};
pub use material::{Material, MaterialParam};
pub use recording::{RecordedCommand, RecordingBackend};
pub use wgpu_modules::WgpuBackend;

// Re-export GPU Particle components
pub use particles::{
    Aabb, AtlasLayout, GpuParticle, GpuParticleSimulation, GpuParticleSystem, ParticleSimulationData,
    ParticleSystemId, SimulationStats, TileId,
};
