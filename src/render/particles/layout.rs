//! 粒子状态图集的几何布局
//!
//! 图集是边长 `tex_size` 的正方形纹理，按行优先划分为边长 `tile_size` 的 tile。
//! 每个 tile 容纳 `tile_size²` 个粒子槽位。

use glam::{UVec2, Vec2};

/// 图集外的 UV，用作 tile UV 缓冲区的填充值
///
/// 有效 tile 的 UV 都落在 `[0, 1)` 内，使用该值的实例不会覆盖任何 tile。
pub const OUT_OF_ATLAS_UV: Vec2 = Vec2::new(2.0, 2.0);

/// Tile 标识，取值范围 `[0, tile_count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub u32);

impl TileId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// 图集布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasLayout {
    tex_size: u32,
    tile_size: u32,
}

impl Default for AtlasLayout {
    fn default() -> Self {
        Self::new(1024, 4)
    }
}

impl AtlasLayout {
    /// 创建布局
    ///
    /// # Panics
    ///
    /// 尺寸不满足 [`AtlasLayout::try_new`] 的条件时 panic。来自配置的尺寸应通过
    /// `GpuParticleConfig::validate` 后再构造。
    pub fn new(tex_size: u32, tile_size: u32) -> Self {
        match Self::try_new(tex_size, tile_size) {
            Some(layout) => layout,
            None => panic!("invalid atlas layout: tex_size {tex_size}, tile_size {tile_size}"),
        }
    }

    /// 检查尺寸后创建布局
    ///
    /// 两个尺寸都须为非零的 2 的幂，`tile_size < tex_size`，且 tile 总数能用 `u32` 表示。
    pub fn try_new(tex_size: u32, tile_size: u32) -> Option<Self> {
        if !tex_size.is_power_of_two() || !tile_size.is_power_of_two() || tile_size >= tex_size {
            return None;
        }

        let tiles_1d = u64::from(tex_size / tile_size);
        if tiles_1d * tiles_1d > u64::from(u32::MAX) {
            return None;
        }

        Some(Self {
            tex_size,
            tile_size,
        })
    }

    #[inline]
    pub fn tex_size(&self) -> u32 {
        self.tex_size
    }

    #[inline]
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// 每行的 tile 数
    #[inline]
    pub fn tile_count_1d(&self) -> u32 {
        self.tex_size / self.tile_size
    }

    /// tile 总数
    #[inline]
    pub fn tile_count(&self) -> u32 {
        self.tile_count_1d() * self.tile_count_1d()
    }

    /// 每个 tile 的粒子槽位数
    #[inline]
    pub fn particles_per_tile(&self) -> u32 {
        self.tile_size * self.tile_size
    }

    /// tile 是否在图集范围内
    #[inline]
    pub fn contains(&self, tile: TileId) -> bool {
        tile.0 < self.tile_count()
    }

    /// tile 左上角的像素偏移
    pub fn tile_offset(&self, tile: TileId) -> UVec2 {
        let n = self.tile_count_1d();
        UVec2::new(tile.0 % n, tile.0 / n) * self.tile_size
    }

    /// tile 左上角的 UV
    pub fn tile_coords(&self, tile: TileId) -> Vec2 {
        self.tile_offset(tile).as_vec2() / self.tex_size as f32
    }

    /// tile 内第 `sub` 个槽位相对 tile 的像素偏移
    pub fn particle_offset(&self, sub: u32) -> UVec2 {
        UVec2::new(sub % self.tile_size, sub / self.tile_size)
    }

    /// tile 内第 `sub` 个槽位相对 tile 的 UV 偏移
    pub fn particle_coords(&self, sub: u32) -> Vec2 {
        self.particle_offset(sub).as_vec2() / self.tex_size as f32
    }

    /// 把像素坐标打包为 16+16 位的粒子索引
    #[inline]
    pub fn pack_particle_index(offset: UVec2) -> u32 {
        (offset.x & 0xFFFF) | (offset.y << 16)
    }

    /// 解包粒子索引
    #[inline]
    pub fn unpack_particle_index(index: u32) -> UVec2 {
        UVec2::new(index & 0xFFFF, index >> 16)
    }

    /// UV 是否落在图集内
    pub fn is_in_atlas(uv: Vec2) -> bool {
        uv.cmpge(Vec2::ZERO).all() && uv.cmplt(Vec2::ONE).all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_constants() {
        let layout = AtlasLayout::default();
        assert_eq!(layout.tex_size(), 1024);
        assert_eq!(layout.tile_size(), 4);
        assert_eq!(layout.tile_count_1d(), 256);
        assert_eq!(layout.tile_count(), 65536);
        assert_eq!(layout.particles_per_tile(), 16);
    }

    #[test]
    fn test_try_new_rejects_bad_sizes() {
        assert_eq!(AtlasLayout::try_new(1024, 0), None);
        assert_eq!(AtlasLayout::try_new(1000, 4), None);
        assert_eq!(AtlasLayout::try_new(16, 16), None);
        // 2^32 个 tile 超出 u32
        assert_eq!(AtlasLayout::try_new(1 << 16, 1), None);

        let layout = AtlasLayout::try_new(1 << 16, 2).unwrap();
        assert_eq!(layout.tile_count(), 1 << 30);
    }

    #[test]
    #[should_panic(expected = "invalid atlas layout")]
    fn test_new_panics_on_zero_tile_size() {
        AtlasLayout::new(1024, 0);
    }

    #[test]
    fn test_tile_mapping_is_row_major() {
        let layout = AtlasLayout::default();
        assert_eq!(layout.tile_offset(TileId(0)), UVec2::ZERO);
        assert_eq!(layout.tile_offset(TileId(1)), UVec2::new(4, 0));
        assert_eq!(layout.tile_offset(TileId(256)), UVec2::new(0, 4));
        assert_eq!(layout.tile_offset(TileId(65535)), UVec2::new(1020, 1020));

        assert_eq!(layout.tile_coords(TileId(257)), Vec2::new(4.0, 4.0) / 1024.0);
        assert!(!layout.contains(TileId(65536)));
    }

    #[test]
    fn test_particle_mapping() {
        let layout = AtlasLayout::default();
        assert_eq!(layout.particle_offset(0), UVec2::ZERO);
        assert_eq!(layout.particle_offset(5), UVec2::new(1, 1));
        assert_eq!(layout.particle_offset(15), UVec2::new(3, 3));
        assert_eq!(layout.particle_coords(3), Vec2::new(3.0 / 1024.0, 0.0));
    }

    #[test]
    fn test_pack_particle_index() {
        let packed = AtlasLayout::pack_particle_index(UVec2::new(1021, 7));
        assert_eq!(packed, 1021 | (7 << 16));
        assert_eq!(AtlasLayout::unpack_particle_index(packed), UVec2::new(1021, 7));
    }

    #[test]
    fn test_sentinel_outside_atlas() {
        let layout = AtlasLayout::default();
        assert!(!AtlasLayout::is_in_atlas(OUT_OF_ATLAS_UV));
        assert!(AtlasLayout::is_in_atlas(layout.tile_coords(TileId(65535))));
    }
}
