//! 所有粒子系统共享的几何缓冲区和 scratch 缓冲区

use super::layout::AtlasLayout;
use super::particle::GpuParticleVertex;
use crate::config::GpuParticleConfig;
use crate::core::RenderResult;
use crate::render::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, RenderBackend, VertexFormat, VertexLayout,
    VertexStepMode,
};
use glam::Vec2;

/// 四边形的四个角，配合索引 (0,1,2),(0,2,3)
const QUAD_CORNERS: [Vec2; 4] = [
    Vec2::new(0.0, 0.0),
    Vec2::new(1.0, 0.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(0.0, 1.0),
];

/// `quads` 个按 `scale` 缩放的单位四边形
pub fn quad_uv_data(quads: u32, scale: f32) -> Vec<Vec2> {
    (0..quads)
        .flat_map(|_| QUAD_CORNERS.iter().map(move |corner| *corner * scale))
        .collect()
}

/// 16 位四边形索引，每个四边形两个三角形
pub fn quad_index_data(quads: u32) -> Vec<u16> {
    (0..quads)
        .flat_map(|quad| {
            let base = (quad * 4) as u16;
            [base, base + 1, base + 2, base, base + 2, base + 3]
        })
        .collect()
}

/// 清除和模拟使用的顶点布局：每顶点一个 float2 纹理坐标
pub fn tile_vertex_layout() -> VertexLayout {
    VertexLayout::new().with_element(VertexFormat::Float2, 0, 0, VertexStepMode::Vertex)
}

/// 注入使用的顶点布局
///
/// 流 0 每实例：位置+时间、速度、数据 UV；流 1 每顶点：精灵 UV。
pub fn inject_vertex_layout() -> VertexLayout {
    VertexLayout::new()
        .with_element(VertexFormat::Float4, 0, 0, VertexStepMode::Instance)
        .with_element(VertexFormat::Float4, 1, 0, VertexStepMode::Instance)
        .with_element(VertexFormat::Float2, 2, 0, VertexStepMode::Instance)
        .with_element(VertexFormat::Float2, 3, 1, VertexStepMode::Vertex)
}

/// 共享辅助缓冲区
#[derive(Debug)]
pub struct GpuParticleHelperBuffers {
    /// 每实例 `tiles_per_instance` 个 tile 大小的四边形
    pub sprite_uvs: BufferHandle,
    /// 每实例 `particles_per_instance` 个像素大小的四边形
    pub particle_uvs: BufferHandle,
    pub sprite_indices: BufferHandle,
    pub tile_vertex_layout: VertexLayout,
    pub inject_vertex_layout: VertexLayout,
    /// 待清除 tile 的 UV
    pub tile_scratch: BufferHandle,
    /// 待注入粒子的顶点
    pub inject_scratch: BufferHandle,
    num_scratch_tiles: u32,
    num_scratch_particles: u32,
}

impl GpuParticleHelperBuffers {
    pub fn new(backend: &mut dyn RenderBackend, config: &GpuParticleConfig) -> RenderResult<Self> {
        let mut created = Vec::new();
        let result = Self::create(backend, config, &mut created);
        if result.is_err() {
            for buffer in created {
                backend.destroy_buffer(buffer);
            }
        }
        result
    }

    fn create(
        backend: &mut dyn RenderBackend,
        config: &GpuParticleConfig,
        created: &mut Vec<BufferHandle>,
    ) -> RenderResult<Self> {
        let layout: AtlasLayout = config.atlas_layout();
        // 验证过的配置保证不超出 16 位索引范围
        let particles_per_instance = config.particles_per_instance() as u32;

        let sprite_uv_scale = layout.tile_size() as f32 / layout.tex_size() as f32;
        let sprite_uvs = upload(
            backend,
            created,
            "Particle Sprite UVs",
            BufferUsage::VERTEX,
            bytemuck::cast_slice(&quad_uv_data(config.tiles_per_instance, sprite_uv_scale)),
        )?;

        let particle_uvs = upload(
            backend,
            created,
            "Particle UVs",
            BufferUsage::VERTEX,
            bytemuck::cast_slice(&quad_uv_data(
                particles_per_instance,
                1.0 / layout.tex_size() as f32,
            )),
        )?;

        let sprite_indices = upload(
            backend,
            created,
            "Particle Sprite Indices",
            BufferUsage::INDEX,
            bytemuck::cast_slice(&quad_index_data(particles_per_instance)),
        )?;

        let tile_scratch = backend.create_buffer(&BufferDescriptor::new(
            "Particle Tile Scratch",
            u64::from(config.scratch_tiles) * std::mem::size_of::<Vec2>() as u64,
            BufferUsage::STORAGE | BufferUsage::COPY_DST,
        ))?;
        created.push(tile_scratch);

        let inject_scratch = backend.create_buffer(&BufferDescriptor::new(
            "Particle Inject Scratch",
            u64::from(config.scratch_particles) * std::mem::size_of::<GpuParticleVertex>() as u64,
            BufferUsage::VERTEX | BufferUsage::COPY_DST,
        ))?;
        created.push(inject_scratch);

        Ok(Self {
            sprite_uvs,
            particle_uvs,
            sprite_indices,
            tile_vertex_layout: tile_vertex_layout(),
            inject_vertex_layout: inject_vertex_layout(),
            tile_scratch,
            inject_scratch,
            num_scratch_tiles: config.scratch_tiles,
            num_scratch_particles: config.scratch_particles,
        })
    }

    /// tile scratch 缓冲区容量（tile 数）
    pub fn num_scratch_tiles(&self) -> u32 {
        self.num_scratch_tiles
    }

    /// 注入 scratch 缓冲区容量（粒子数）
    pub fn num_scratch_particles(&self) -> u32 {
        self.num_scratch_particles
    }

    pub fn destroy(self, backend: &mut dyn RenderBackend) {
        for buffer in [
            self.sprite_uvs,
            self.particle_uvs,
            self.sprite_indices,
            self.tile_scratch,
            self.inject_scratch,
        ] {
            backend.destroy_buffer(buffer);
        }
    }
}

fn upload(
    backend: &mut dyn RenderBackend,
    created: &mut Vec<BufferHandle>,
    label: &str,
    usage: BufferUsage,
    data: &[u8],
) -> RenderResult<BufferHandle> {
    let buffer = backend.create_buffer(&BufferDescriptor::new(
        label,
        data.len() as u64,
        usage | BufferUsage::COPY_DST,
    ))?;
    created.push(buffer);
    backend.write_buffer(buffer, 0, data)?;
    Ok(buffer)
}
