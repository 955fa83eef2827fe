//! GPU 粒子模拟核心
//!
//! 粒子状态保存在 GPU 上的双缓冲纹理图集中，模拟期间从不回读到主机
//! （可选的包围盒计算除外）。
//!
//! ## 架构设计
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 GpuParticleSimulation                    │
//! ├─────────────────────────────────────────────────────────┤
//! │  GpuParticleResources                                    │
//! │     - 两组状态图集（位置+时间 RGBA32F，速度 RGBA16F）      │
//! │     - TileAllocator：tile 空闲栈                          │
//! │                                                          │
//! │  GpuParticleSystem（每个粒子系统一个）                     │
//! │     - 拥有的 tile、过期时间、剩余槽位                      │
//! │     - tile UV 缓冲区、粒子索引缓冲区                       │
//! │                                                          │
//! │  每帧 GPU 批处理                                          │
//! │     1. Clear：清除新分配的 tile                           │
//! │     2. Inject：写入新粒子                                 │
//! │     3. Simulate：读图集 → 写图集                          │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod bounds;
pub mod helper_buffers;
pub mod layout;
pub mod materials;
pub mod particle;
pub mod resources;
pub mod simulation;
pub mod system;


pub use bounds::{Aabb, BoundsDispatch, GpuParticleBoundsPass, GroupBounds};
pub use helper_buffers::GpuParticleHelperBuffers;
pub use layout::{AtlasLayout, TileId, OUT_OF_ATLAS_UV};
pub use materials::{
    uv_to_ndc, BoundsMaterial, ClearTilesMaterial, InjectParticlesMaterial,
    SimulateParticlesMaterial,
};
pub use particle::{GpuParticle, GpuParticleVertex, ParticleSimulationData, ParticleSystemId};
pub use resources::{GpuParticleResources, GpuParticleStateTextures, TileAllocator};
pub use simulation::{GpuParticleSimulation, SimulationStats};
pub use system::{GpuParticleSystem, GpuParticleTile, SlotAllocation};
