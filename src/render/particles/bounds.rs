//! 粒子包围盒计算
//!
//! 计算着色器把每个工作组负责的粒子位置归约为一条 min/max 记录，
//! 回读后在 CPU 上合并。回读会等待 GPU，只用于离线工具和编辑器。

use super::materials::{BoundsMaterial, BoundsParams};
use crate::config::BoundsConfig;
use crate::core::{RenderError, RenderResult};
use crate::render::backend::{BufferDescriptor, BufferHandle, BufferUsage, RenderBackend, TextureHandle};
use glam::{Vec3, Vec4Swizzles};

/// 轴对齐包围盒
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }
}

/// 单个工作组的输出记录
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GroupBounds {
    pub min: [f32; 4],
    pub max: [f32; 4],
}

/// 调度参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundsDispatch {
    pub groups: u32,
    pub params: BoundsParams,
}

impl BoundsDispatch {
    /// 前 `num_extra_iterations` 个工作组多执行一次迭代；没有粒子时返回 `None`
    pub fn new(num_particles: u32, threads_per_group: u32, max_groups: u32) -> Option<Self> {
        if num_particles == 0 {
            return None;
        }

        let iterations = num_particles.div_ceil(threads_per_group);
        let groups = iterations.min(max_groups);

        Some(Self {
            groups,
            params: BoundsParams {
                iterations_per_group: iterations / groups,
                num_extra_iterations: iterations % groups,
                num_particles,
                _padding: 0,
            },
        })
    }
}

/// 合并各工作组的结果：最小值取分量最小，最大值取分量最大
pub fn fold_group_bounds(groups: &[GroupBounds]) -> Option<Aabb> {
    if groups.is_empty() {
        return None;
    }

    let (min, max) = groups.iter().fold(
        (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
        |(min, max), group| {
            (
                min.min(glam::Vec4::from_array(group.min).xyz()),
                max.max(glam::Vec4::from_array(group.max).xyz()),
            )
        },
    );

    Some(Aabb::new(min, max))
}

/// 包围盒计算 pass
#[derive(Debug, Clone)]
pub struct GpuParticleBoundsPass {
    material: BoundsMaterial,
    config: BoundsConfig,
}

impl GpuParticleBoundsPass {
    pub fn new(config: &BoundsConfig) -> Self {
        Self {
            material: BoundsMaterial::new(config.threads_per_group),
            config: config.clone(),
        }
    }

    /// 计算 `indices` 中前 `num_particles` 个粒子的包围盒
    ///
    /// 同步回读，会阻塞直到 GPU 完成。
    pub fn execute(
        &mut self,
        backend: &mut dyn RenderBackend,
        position_and_time: TextureHandle,
        indices: BufferHandle,
        num_particles: u32,
    ) -> RenderResult<Option<Aabb>> {
        let Some(dispatch) = BoundsDispatch::new(
            num_particles,
            self.config.threads_per_group,
            self.config.max_groups,
        ) else {
            return Ok(None);
        };

        let output_size = u64::from(dispatch.groups) * std::mem::size_of::<GroupBounds>() as u64;
        let output = backend.create_buffer(&BufferDescriptor::new(
            "Particle Bounds Output",
            output_size,
            BufferUsage::STORAGE | BufferUsage::COPY_SRC,
        ))?;

        let result = self.dispatch_and_read(backend, &dispatch, position_and_time, indices, output);
        backend.destroy_buffer(output);
        let bytes = result?;

        if (bytes.len() as u64) < output_size {
            return Err(RenderError::ReadBack(format!(
                "expected {} bytes of bounds output, got {}",
                output_size,
                bytes.len()
            )));
        }

        let groups: Vec<GroupBounds> = bytemuck::pod_collect_to_vec(&bytes[..output_size as usize]);
        let bounds = fold_group_bounds(&groups);

        tracing::debug!(
            target: "particles",
            "Particle bounds read back ({} particles, {} groups), GPU stalled: {:?}",
            num_particles,
            dispatch.groups,
            bounds
        );
        Ok(bounds)
    }

    fn dispatch_and_read(
        &mut self,
        backend: &mut dyn RenderBackend,
        dispatch: &BoundsDispatch,
        position_and_time: TextureHandle,
        indices: BufferHandle,
        output: BufferHandle,
    ) -> RenderResult<Vec<u8>> {
        self.material
            .bind(backend, &dispatch.params, position_and_time, indices, output)?;
        backend.dispatch_compute(dispatch.groups)?;
        backend.read_buffer(output)
    }
}
