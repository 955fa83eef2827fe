//! 粒子模拟各个 pass 的材质
//!
//! 着色器资源名和参数名与着色器资源约定一致，由注册着色器的一方保证。

use super::resources::GpuParticleStateTextures;
use crate::core::RenderResult;
use crate::render::backend::{BackendCapabilities, BufferHandle, RenderBackend, TextureHandle};
use crate::render::material::Material;
use glam::Vec4;

pub const CLEAR_SHADER: &str = "GpuParticleClear";
pub const INJECT_SHADER: &str = "GpuParticleInject";
pub const SIMULATE_SHADER: &str = "GpuParticleSimulate";
pub const BOUNDS_SHADER: &str = "GpuParticleBounds";

pub const PARAM_INPUT: &str = "Input";
pub const PARAM_TILE_UVS: &str = "gTileUVs";
pub const PARAM_POS_AND_TIME_TEX: &str = "gPosAndTimeTex";
pub const PARAM_VELOCITY_TEX: &str = "gVelocityTex";
pub const PARAM_PARTICLE_INDICES: &str = "gParticleIndices";
pub const PARAM_OUTPUT: &str = "gOutput";

pub const DEFINE_TILES_PER_INSTANCE: &str = "TILES_PER_INSTANCE";
pub const DEFINE_NUM_THREADS: &str = "NUM_THREADS";

/// tile 顶点着色器的常量块
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TileVertexParams {
    /// xy 缩放，zw 偏移
    pub uv_to_ndc: [f32; 4],
}

/// 包围盒计算着色器的常量块
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BoundsParams {
    pub iterations_per_group: u32,
    pub num_extra_iterations: u32,
    pub num_particles: u32,
    pub _padding: u32,
}

/// UV `[0, 1]` 到 NDC `[-1, 1]` 的变换，默认翻转 Y
///
/// `uv_y_axis_up` 和 `ndc_y_axis_down` 各自翻转一次 Y，同时设置时相互抵消。
pub fn uv_to_ndc(caps: &BackendCapabilities) -> Vec4 {
    let mut transform = Vec4::new(2.0, -2.0, -1.0, 1.0);
    if caps.uv_y_axis_up ^ caps.ndc_y_axis_down {
        transform.y = -transform.y;
        transform.w = -transform.w;
    }
    transform
}

fn tile_vertex_material(shader: &'static str, caps: &BackendCapabilities) -> Material {
    let mut material = Material::new(shader);
    material.set_uniform(
        PARAM_INPUT,
        &TileVertexParams {
            uv_to_ndc: uv_to_ndc(caps).to_array(),
        },
    );
    material
}

/// 清除新分配的 tile
#[derive(Debug, Clone)]
pub struct ClearTilesMaterial {
    material: Material,
}

impl ClearTilesMaterial {
    pub fn new(caps: &BackendCapabilities, tiles_per_instance: u32) -> Self {
        let material = tile_vertex_material(CLEAR_SHADER, caps)
            .with_define(DEFINE_TILES_PER_INSTANCE, tiles_per_instance);
        Self { material }
    }

    /// 绑定材质，`tile_uvs` 为待清除 tile 的 UV
    pub fn bind(&mut self, backend: &mut dyn RenderBackend, tile_uvs: BufferHandle) -> RenderResult<()> {
        self.material.set_buffer(PARAM_TILE_UVS, tile_uvs);
        backend.bind_material(&self.material)
    }

    pub fn material(&self) -> &Material {
        &self.material
    }
}

/// 把新粒子写入状态图集
#[derive(Debug, Clone)]
pub struct InjectParticlesMaterial {
    material: Material,
}

impl InjectParticlesMaterial {
    pub fn new(caps: &BackendCapabilities) -> Self {
        Self {
            material: tile_vertex_material(INJECT_SHADER, caps),
        }
    }

    pub fn bind(&self, backend: &mut dyn RenderBackend) -> RenderResult<()> {
        backend.bind_material(&self.material)
    }

    pub fn material(&self) -> &Material {
        &self.material
    }
}

/// 从读状态模拟一步，输出到当前渲染目标
#[derive(Debug, Clone)]
pub struct SimulateParticlesMaterial {
    material: Material,
}

impl SimulateParticlesMaterial {
    pub fn new(caps: &BackendCapabilities, tiles_per_instance: u32) -> Self {
        let material = tile_vertex_material(SIMULATE_SHADER, caps)
            .with_define(DEFINE_TILES_PER_INSTANCE, tiles_per_instance);
        Self { material }
    }

    /// 设置输入状态纹理
    pub fn set_state(&mut self, read_state: &GpuParticleStateTextures) {
        self.material
            .set_texture(PARAM_POS_AND_TIME_TEX, read_state.position_and_time);
        self.material
            .set_texture(PARAM_VELOCITY_TEX, read_state.velocity);
    }

    /// 绑定某个粒子系统的 tile UV
    pub fn bind(&mut self, backend: &mut dyn RenderBackend, tile_uvs: BufferHandle) -> RenderResult<()> {
        self.material.set_buffer(PARAM_TILE_UVS, tile_uvs);
        backend.bind_material(&self.material)
    }

    pub fn material(&self) -> &Material {
        &self.material
    }
}

/// 并行归约粒子位置
#[derive(Debug, Clone)]
pub struct BoundsMaterial {
    material: Material,
}

impl BoundsMaterial {
    pub fn new(threads_per_group: u32) -> Self {
        Self {
            material: Material::new(BOUNDS_SHADER).with_define(DEFINE_NUM_THREADS, threads_per_group),
        }
    }

    pub fn bind(
        &mut self,
        backend: &mut dyn RenderBackend,
        params: &BoundsParams,
        position_and_time: TextureHandle,
        indices: BufferHandle,
        output: BufferHandle,
    ) -> RenderResult<()> {
        self.material.set_uniform(PARAM_INPUT, params);
        self.material
            .set_texture(PARAM_POS_AND_TIME_TEX, position_and_time);
        self.material.set_buffer(PARAM_PARTICLE_INDICES, indices);
        self.material.set_buffer(PARAM_OUTPUT, output);
        backend.bind_material(&self.material)
    }

    pub fn material(&self) -> &Material {
        &self.material
    }
}
