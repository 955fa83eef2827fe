//! 待注入的粒子和每帧输入

use glam::{Vec2, Vec3};
use std::collections::HashMap;

/// 粒子系统标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleSystemId(pub u32);

/// 新生成、等待注入图集的粒子
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GpuParticle {
    pub position: Vec3,
    /// 粒子当前年龄（秒）
    pub time: f32,
    pub velocity: Vec3,
    /// 寿命（秒）
    pub lifetime: f32,
    /// 在图集中的 UV，分配槽位时写入
    pub data_uv: Vec2,
}

impl GpuParticle {
    pub fn new(position: Vec3, velocity: Vec3, lifetime: f32) -> Self {
        Self {
            position,
            velocity,
            lifetime,
            ..Default::default()
        }
    }

    /// 转换为注入用的顶点数据
    pub fn vertex(&self) -> GpuParticleVertex {
        GpuParticleVertex {
            position_and_time: self.position.extend(self.time).to_array(),
            velocity: self.velocity.extend(0.0).to_array(),
            data_uv: self.data_uv.to_array(),
        }
    }
}

/// 注入顶点（每实例一个）
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuParticleVertex {
    pub position_and_time: [f32; 4],
    pub velocity: [f32; 4],
    pub data_uv: [f32; 2],
}

/// 每帧输入：各粒子系统本帧新生成的粒子
#[derive(Debug, Clone, Default)]
pub struct ParticleSimulationData {
    pub gpu_data: HashMap<ParticleSystemId, Vec<GpuParticle>>,
}

impl ParticleSimulationData {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加某个系统的新粒子
    pub fn push(&mut self, system: ParticleSystemId, particles: impl IntoIterator<Item = GpuParticle>) {
        self.gpu_data.entry(system).or_default().extend(particles);
    }

    pub fn particles(&self, system: ParticleSystemId) -> Option<&[GpuParticle]> {
        self.gpu_data.get(&system).map(|p| p.as_slice())
    }

    pub fn particles_mut(&mut self, system: ParticleSystemId) -> Option<&mut Vec<GpuParticle>> {
        self.gpu_data.get_mut(&system)
    }

    /// 所有系统的新粒子总数
    pub fn total_particles(&self) -> usize {
        self.gpu_data.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.gpu_data.clear();
    }
}
