//! 单个粒子系统的 tile 追踪
//!
//! 追踪器拥有一组 tile，记录每个 tile 的过期时间和剩余槽位，
//! 并维护描述自身 tile 布局的 GPU 缓冲区（tile UV 和粒子索引）。
//!
//! 每帧调用顺序：
//!
//! ```text
//! detect_inactive_tiles → allocate_slots_for → advance_time → free_inactive_tiles
//!     → rebuild_gpu_layout_buffers（tile 有增减时）
//! ```

use super::layout::{AtlasLayout, TileId, OUT_OF_ATLAS_UV};
use super::particle::{GpuParticle, ParticleSystemId};
use super::resources::TileAllocator;
use crate::core::RenderResult;
use crate::render::backend::{BufferDescriptor, BufferHandle, BufferUsage, RenderBackend};
use glam::{UVec2, Vec2};

/// 追踪器拥有的一个 tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuParticleTile {
    pub id: TileId,
    /// tile 内最晚死亡的粒子的死亡时间（追踪器时钟）
    pub lifetime: f32,
    pub num_free_particles: u32,
}

/// 槽位分配结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotAllocation {
    /// 获得槽位的粒子数，总是输入的前缀
    pub admitted: usize,
    /// 是否从分配器取得了新 tile
    pub tiles_added: bool,
}

#[derive(Debug, Clone, Copy)]
struct LayoutBuffer {
    handle: BufferHandle,
    size: u64,
}

/// 粒子系统 tile 追踪器
#[derive(Debug)]
pub struct GpuParticleSystem {
    id: ParticleSystemId,
    layout: AtlasLayout,
    tiles_per_instance: u32,
    tiles: Vec<GpuParticleTile>,
    active_tiles: Vec<bool>,
    num_active_tiles: usize,
    /// 缓存的最近分配 tile（`tiles` 中的下标）
    last_allocated_tile: Option<usize>,
    time: f32,
    tile_uvs: Option<LayoutBuffer>,
    particle_indices: Option<LayoutBuffer>,
}

impl GpuParticleSystem {
    pub fn new(id: ParticleSystemId, layout: AtlasLayout, tiles_per_instance: u32) -> Self {
        Self {
            id,
            layout,
            tiles_per_instance,
            tiles: Vec::new(),
            active_tiles: Vec::new(),
            num_active_tiles: 0,
            last_allocated_tile: None,
            time: 0.0,
            tile_uvs: None,
            particle_indices: None,
        }
    }

    /// 为新粒子分配槽位并写入它们的 `data_uv`
    ///
    /// 目标 tile 的优先级：
    /// 1. 缓存的最近分配 tile（还有空位时）
    /// 2. 第一个非活跃 tile
    /// 3. 从分配器取新 tile，其 ID 追加到 `new_tiles`
    ///
    /// 分配器耗尽时停止，只有前 `admitted` 个粒子获得槽位。
    pub fn allocate_slots_for(
        &mut self,
        allocator: &mut TileAllocator,
        particles: &mut [GpuParticle],
        new_tiles: &mut Vec<TileId>,
    ) -> SlotAllocation {
        let layout = self.layout;
        let particles_per_tile = layout.particles_per_tile();
        let mut tiles_added = false;

        for (i, particle) in particles.iter_mut().enumerate() {
            let cached = self
                .last_allocated_tile
                .filter(|&idx| self.tiles[idx].num_free_particles > 0);

            let idx = match cached {
                Some(idx) => idx,
                None => {
                    let idx = match self.active_tiles.iter().position(|active| !active) {
                        Some(idx) => idx,
                        None => {
                            let Some(tile) = allocator.allocate_tile() else {
                                return SlotAllocation {
                                    admitted: i,
                                    tiles_added,
                                };
                            };

                            new_tiles.push(tile);
                            self.tiles.push(GpuParticleTile {
                                id: tile,
                                lifetime: 0.0,
                                num_free_particles: 0,
                            });
                            self.active_tiles.push(false);
                            tiles_added = true;
                            self.tiles.len() - 1
                        }
                    };

                    self.active_tiles[idx] = true;
                    self.tiles[idx].num_free_particles = particles_per_tile;
                    self.last_allocated_tile = Some(idx);
                    self.num_active_tiles += 1;
                    idx
                }
            };

            let tile = &mut self.tiles[idx];
            let slot = particles_per_tile - tile.num_free_particles;
            particle.data_uv = layout.tile_coords(tile.id) + layout.particle_coords(slot);

            tile.num_free_particles -= 1;
            tile.lifetime = tile.lifetime.max(self.time + particle.lifetime);
        }

        SlotAllocation {
            admitted: particles.len(),
            tiles_added,
        }
    }

    /// 按当前时钟重新划分活跃/非活跃 tile
    pub fn detect_inactive_tiles(&mut self) {
        self.num_active_tiles = 0;
        for (idx, tile) in self.tiles.iter().enumerate() {
            let active = tile.lifetime >= self.time;
            self.active_tiles[idx] = active;

            if active {
                self.num_active_tiles += 1;
            } else if self.last_allocated_tile == Some(idx) {
                self.last_allocated_tile = None;
            }
        }
    }

    /// 推进追踪器时钟
    pub fn advance_time(&mut self, dt: f32) {
        self.time += dt;
    }

    /// 移除非活跃 tile 并归还给分配器，有 tile 被移除时返回 `true`
    pub fn free_inactive_tiles(&mut self, allocator: &mut TileAllocator) -> bool {
        let mut freed = false;

        // 倒序遍历时，换到当前位置的尾部元素已经检查过
        for idx in (0..self.tiles.len()).rev() {
            if self.active_tiles[idx] {
                continue;
            }

            let tile = self.tiles.swap_remove(idx);
            self.active_tiles.swap_remove(idx);
            allocator.free_tile(tile.id);
            freed = true;
        }

        if freed {
            // 下标已失效
            self.last_allocated_tile = None;
            self.num_active_tiles = self.tiles.len();
        }

        freed
    }

    /// tile UV 数据，按实例对齐，填充项为图集外的哨兵值
    pub fn tile_uv_data(&self) -> Vec<Vec2> {
        let padded_len = self.padded_tile_count() as usize;
        let mut uvs: Vec<Vec2> = self
            .tiles
            .iter()
            .map(|tile| self.layout.tile_coords(tile.id))
            .collect();
        uvs.resize(padded_len, OUT_OF_ATLAS_UV);
        uvs
    }

    /// 每个槽位的打包像素坐标，tile 内行优先
    pub fn particle_index_data(&self) -> Vec<u32> {
        let tile_size = self.layout.tile_size();
        let mut indices = Vec::with_capacity(self.num_particle_slots() as usize);

        for tile in &self.tiles {
            let origin = self.layout.tile_offset(tile.id);
            for y in 0..tile_size {
                for x in 0..tile_size {
                    indices.push(AtlasLayout::pack_particle_index(origin + UVec2::new(x, y)));
                }
            }
        }

        indices
    }

    /// 按 tile 列表重建 GPU 布局缓冲区
    ///
    /// 大小不变时复用已有缓冲区；没有 tile 时销毁缓冲区。
    pub fn rebuild_gpu_layout_buffers(&mut self, backend: &mut dyn RenderBackend) -> RenderResult<()> {
        if self.tiles.is_empty() {
            self.destroy_gpu_buffers(backend);
            return Ok(());
        }

        let uvs = self.tile_uv_data();
        self.tile_uvs = Some(upload_layout_buffer(
            backend,
            self.tile_uvs.take(),
            "Particle Tile UVs",
            bytemuck::cast_slice(&uvs),
        )?);

        let indices = self.particle_index_data();
        self.particle_indices = Some(upload_layout_buffer(
            backend,
            self.particle_indices.take(),
            "Particle Indices",
            bytemuck::cast_slice(&indices),
        )?);

        tracing::trace!(
            target: "particles",
            "System {} layout rebuilt: {} tiles",
            self.id.0,
            self.tiles.len()
        );
        Ok(())
    }

    /// 归还所有 tile 并销毁 GPU 缓冲区
    pub fn release_all_tiles(&mut self, allocator: &mut TileAllocator, backend: &mut dyn RenderBackend) {
        for tile in self.tiles.drain(..) {
            allocator.free_tile(tile.id);
        }
        self.active_tiles.clear();
        self.num_active_tiles = 0;
        self.last_allocated_tile = None;
        self.destroy_gpu_buffers(backend);
    }

    fn destroy_gpu_buffers(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(buffer) = self.tile_uvs.take() {
            backend.destroy_buffer(buffer.handle);
        }
        if let Some(buffer) = self.particle_indices.take() {
            backend.destroy_buffer(buffer.handle);
        }
    }

    fn padded_tile_count(&self) -> u32 {
        let tiles = self.tiles.len() as u32;
        tiles.div_ceil(self.tiles_per_instance) * self.tiles_per_instance
    }

    pub fn id(&self) -> ParticleSystemId {
        self.id
    }

    pub fn num_tiles(&self) -> u32 {
        self.tiles.len() as u32
    }

    pub fn num_active_tiles(&self) -> usize {
        self.num_active_tiles
    }

    pub fn tiles(&self) -> &[GpuParticleTile] {
        &self.tiles
    }

    pub fn active_tiles(&self) -> &[bool] {
        &self.active_tiles
    }

    pub fn last_allocated_tile(&self) -> Option<usize> {
        self.last_allocated_tile
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn tile_uvs(&self) -> Option<BufferHandle> {
        self.tile_uvs.map(|b| b.handle)
    }

    pub fn particle_indices(&self) -> Option<BufferHandle> {
        self.particle_indices.map(|b| b.handle)
    }

    /// 所有 tile 的槽位总数
    pub fn num_particle_slots(&self) -> u32 {
        self.num_tiles() * self.layout.particles_per_tile()
    }

    /// 模拟绘制所需的实例数
    pub fn num_instances(&self) -> u32 {
        self.num_tiles().div_ceil(self.tiles_per_instance)
    }
}

fn upload_layout_buffer(
    backend: &mut dyn RenderBackend,
    existing: Option<LayoutBuffer>,
    label: &str,
    data: &[u8],
) -> RenderResult<LayoutBuffer> {
    let size = data.len() as u64;
    let buffer = match existing {
        Some(buffer) if buffer.size == size => buffer,
        other => {
            if let Some(old) = other {
                backend.destroy_buffer(old.handle);
            }
            let handle = backend.create_buffer(&BufferDescriptor::new(
                label,
                size,
                BufferUsage::STORAGE | BufferUsage::COPY_DST,
            ))?;
            LayoutBuffer { handle, size }
        }
    };

    // 调用方已交出旧句柄，写入失败时不能留下缓冲区
    if let Err(e) = backend.write_buffer(buffer.handle, 0, data) {
        backend.destroy_buffer(buffer.handle);
        return Err(e);
    }
    Ok(buffer)
}
