//! # GPU Particles
//!
//! GPU 驻留的粒子模拟核心。
//!
//! ## 特性
//!
//! - **Tile 图集**: 粒子状态存放在双缓冲纹理图集中，按 tile 分配给粒子系统
//! - **Tile 追踪**: 每个粒子系统追踪自己的 tile、过期时间和剩余槽位
//! - **批量 GPU pass**: 每帧一次清除、注入、模拟，分块上传以限制 GPU 缓冲区大小
//! - **包围盒**: 可选的计算着色器归约，回读粒子系统的 AABB
//! - **后端抽象**: 核心只依赖 [`render::RenderBackend`]，提供 wgpu 后端和记录后端
//!
//! ## 示例
//!
//! ```ignore
//! use gpu_particles::config::GpuParticleConfig;
//! use gpu_particles::render::{GpuParticleSimulation, ParticleSimulationData, WgpuBackend};
//!
//! let mut backend = WgpuBackend::new_headless()?;
//! let mut simulation = GpuParticleSimulation::new(&mut backend, &GpuParticleConfig::default())?;
//! let id = simulation.create_system();
//! let mut data = ParticleSimulationData::new();
//! simulation.simulate(&mut backend, &mut data, 1.0 / 60.0)?;
//! ```
//!
//! ## 模块
//!
//! - [`core`]: 错误类型、日志初始化
//! - [`config`]: 配置加载与验证
//! - [`render`]: 渲染后端抽象与粒子模拟

pub mod config;
pub mod core;
pub mod render;

pub use crate::core::{EngineError, EngineResult, RenderError, RenderResult};
