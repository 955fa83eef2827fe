//! 粒子状态图集和 tile 分配器
//!
//! 图集双缓冲：每帧交换读/写角色，上一帧写入的状态成为本帧读取的输入。
//! tile 的所有权只通过 [`TileAllocator`] 的空闲栈追踪。

use super::layout::{AtlasLayout, TileId};
use crate::core::RenderResult;
use crate::render::backend::{
    RenderBackend, RenderTargetHandle, TextureDescriptor, TextureFormat, TextureHandle,
};

/// Tile 分配器
///
/// 空闲 tile 保存在栈中，初始顺序保证 tile 0 最先分配。
#[derive(Debug, Clone)]
pub struct TileAllocator {
    layout: AtlasLayout,
    free_tiles: Vec<TileId>,
    is_free: Vec<bool>,
}

impl TileAllocator {
    pub fn new(layout: AtlasLayout) -> Self {
        let count = layout.tile_count();
        Self {
            layout,
            free_tiles: (0..count).rev().map(TileId).collect(),
            is_free: vec![true; count as usize],
        }
    }

    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    /// 分配一个 tile，图集已满时返回 `None`
    pub fn allocate_tile(&mut self) -> Option<TileId> {
        let tile = self.free_tiles.pop()?;
        self.is_free[tile.index()] = false;
        Some(tile)
    }

    /// 归还 tile
    ///
    /// 越界或重复释放属于调用方的错误：debug 构建下断言失败，
    /// release 构建下记录错误并忽略。
    pub fn free_tile(&mut self, tile: TileId) {
        if !self.layout.contains(tile) {
            debug_assert!(false, "tile {:?} is outside the atlas", tile);
            tracing::error!(target: "particles", "Ignoring free of out-of-range tile {}", tile.0);
            return;
        }

        if self.is_free[tile.index()] {
            debug_assert!(false, "tile {:?} freed twice", tile);
            tracing::error!(target: "particles", "Ignoring double free of tile {}", tile.0);
            return;
        }

        self.is_free[tile.index()] = true;
        self.free_tiles.push(tile);
    }

    pub fn num_free_tiles(&self) -> u32 {
        self.free_tiles.len() as u32
    }

    pub fn num_allocated_tiles(&self) -> u32 {
        self.tile_count() - self.num_free_tiles()
    }

    pub fn tile_count(&self) -> u32 {
        self.layout.tile_count()
    }

    /// tile 当前是否已被分配
    pub fn is_allocated(&self, tile: TileId) -> bool {
        self.layout.contains(tile) && !self.is_free[tile.index()]
    }
}

/// 一组粒子状态纹理
///
/// 渲染目标的颜色附件 0 是位置+时间，附件 1 是速度。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuParticleStateTextures {
    /// 位置 (xyz) 和时间 (w)，RGBA32F
    pub position_and_time: TextureHandle,
    /// 速度，RGBA16F
    pub velocity: TextureHandle,
    pub render_target: RenderTargetHandle,
}

impl GpuParticleStateTextures {
    fn create(
        backend: &mut dyn RenderBackend,
        layout: &AtlasLayout,
        index: usize,
    ) -> RenderResult<Self> {
        let size = layout.tex_size();
        let position_and_time = backend.create_texture(&TextureDescriptor::render_target_2d(
            &format!("Particle Position And Time {}", index),
            size,
            TextureFormat::Rgba32Float,
        ))?;

        let velocity = match backend.create_texture(&TextureDescriptor::render_target_2d(
            &format!("Particle Velocity {}", index),
            size,
            TextureFormat::Rgba16Float,
        )) {
            Ok(texture) => texture,
            Err(e) => {
                backend.destroy_texture(position_and_time);
                return Err(e);
            }
        };

        match backend.create_render_target(&[position_and_time, velocity]) {
            Ok(render_target) => Ok(Self {
                position_and_time,
                velocity,
                render_target,
            }),
            Err(e) => {
                backend.destroy_texture(position_and_time);
                backend.destroy_texture(velocity);
                Err(e)
            }
        }
    }

    fn destroy(self, backend: &mut dyn RenderBackend) {
        backend.destroy_render_target(self.render_target);
        backend.destroy_texture(self.position_and_time);
        backend.destroy_texture(self.velocity);
    }
}

/// 粒子模拟的共享 GPU 资源：双缓冲状态图集和 tile 分配器
#[derive(Debug)]
pub struct GpuParticleResources {
    allocator: TileAllocator,
    states: [GpuParticleStateTextures; 2],
    read_index: usize,
}

impl GpuParticleResources {
    /// 通过后端创建两组状态纹理
    pub fn new(backend: &mut dyn RenderBackend, layout: AtlasLayout) -> RenderResult<Self> {
        let first = GpuParticleStateTextures::create(backend, &layout, 0)?;
        let second = match GpuParticleStateTextures::create(backend, &layout, 1) {
            Ok(state) => state,
            Err(e) => {
                first.destroy(backend);
                return Err(e);
            }
        };

        tracing::debug!(
            target: "particles",
            "Created particle state atlases: {}x{}, {} tiles",
            layout.tex_size(),
            layout.tex_size(),
            layout.tile_count()
        );

        Ok(Self {
            allocator: TileAllocator::new(layout),
            states: [first, second],
            read_index: 0,
        })
    }

    /// 交换读/写角色（不复制数据）
    pub fn swap(&mut self) {
        self.read_index = 1 - self.read_index;
    }

    /// 本帧读取的状态
    pub fn read_state(&self) -> &GpuParticleStateTextures {
        &self.states[self.read_index]
    }

    /// 本帧写入的状态
    pub fn write_state(&self) -> &GpuParticleStateTextures {
        &self.states[1 - self.read_index]
    }

    pub fn layout(&self) -> &AtlasLayout {
        self.allocator.layout()
    }

    pub fn allocator(&self) -> &TileAllocator {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut TileAllocator {
        &mut self.allocator
    }

    /// 释放两组状态纹理
    pub fn destroy(self, backend: &mut dyn RenderBackend) {
        for state in self.states {
            state.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::recording::RecordingBackend;

    fn small_layout() -> AtlasLayout {
        AtlasLayout::new(16, 4)
    }

    #[test]
    fn test_allocator_hands_out_tile_zero_first() {
        let mut allocator = TileAllocator::new(small_layout());
        assert_eq!(allocator.tile_count(), 16);
        assert_eq!(allocator.allocate_tile(), Some(TileId(0)));
        assert_eq!(allocator.allocate_tile(), Some(TileId(1)));
        assert_eq!(allocator.num_allocated_tiles(), 2);
        assert!(allocator.is_allocated(TileId(1)));
        assert!(!allocator.is_allocated(TileId(2)));
    }

    #[test]
    fn test_allocator_exhaustion() {
        let mut allocator = TileAllocator::new(small_layout());
        for _ in 0..16 {
            assert!(allocator.allocate_tile().is_some());
        }
        assert_eq!(allocator.allocate_tile(), None);
        assert_eq!(allocator.num_free_tiles(), 0);

        allocator.free_tile(TileId(7));
        assert_eq!(allocator.allocate_tile(), Some(TileId(7)));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "freed twice")]
    fn test_double_free_asserts() {
        let mut allocator = TileAllocator::new(small_layout());
        let tile = allocator.allocate_tile().unwrap();
        allocator.free_tile(tile);
        allocator.free_tile(tile);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_double_free_ignored_in_release() {
        let mut allocator = TileAllocator::new(small_layout());
        let tile = allocator.allocate_tile().unwrap();
        allocator.free_tile(tile);
        allocator.free_tile(tile);
        allocator.free_tile(TileId(99));
        assert_eq!(allocator.num_free_tiles(), 16);
    }

    #[test]
    fn test_resources_swap_roles() {
        let mut backend = RecordingBackend::new();
        let mut resources = GpuParticleResources::new(&mut backend, small_layout()).unwrap();
        assert_eq!(backend.live_texture_count(), 4);
        assert_eq!(backend.live_render_target_count(), 2);

        let read = *resources.read_state();
        let write = *resources.write_state();
        assert_ne!(read, write);
        assert_eq!(
            backend.render_target_attachments(read.render_target),
            Some(&[read.position_and_time, read.velocity][..])
        );

        resources.swap();
        assert_eq!(*resources.read_state(), write);
        assert_eq!(*resources.write_state(), read);

        resources.destroy(&mut backend);
        assert_eq!(backend.live_texture_count(), 0);
        assert_eq!(backend.live_render_target_count(), 0);
    }

    #[test]
    fn test_resources_creation_failure_cleans_up() {
        let mut backend = RecordingBackend::new();
        backend.fail_texture_creation = true;
        assert!(GpuParticleResources::new(&mut backend, small_layout()).is_err());
        assert_eq!(backend.live_texture_count(), 0);
    }
}
