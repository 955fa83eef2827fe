use super::{ConfigError, ConfigResult};
use crate::impl_default;
use crate::render::particles::AtlasLayout;
use serde::{Deserialize, Serialize};

/// GPU 粒子配置
///
/// 默认值：1024² 图集，4×4 的 tile（每个 tile 16 个粒子槽位），每个实例 8 个 tile。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuParticleConfig {
    /// 图集边长（像素）
    pub tex_size: u32,

    /// tile 边长（像素）
    pub tile_size: u32,

    /// 每个绘制实例包含的 tile 数
    pub tiles_per_instance: u32,

    /// 清除用 scratch 缓冲区的 tile 容量
    pub scratch_tiles: u32,

    /// 注入用 scratch 缓冲区的粒子容量
    pub scratch_particles: u32,

    /// 包围盒计算配置
    pub bounds: BoundsConfig,
}

impl_default!(GpuParticleConfig {
    tex_size: 1024,
    tile_size: 4,
    tiles_per_instance: 8,
    scratch_tiles: 512,
    scratch_particles: 4096,
    bounds: BoundsConfig::default(),
});

impl GpuParticleConfig {
    /// 图集布局
    pub fn atlas_layout(&self) -> AtlasLayout {
        AtlasLayout::new(self.tex_size, self.tile_size)
    }

    /// 每个绘制实例包含的粒子数
    ///
    /// 以 `u64` 计算，未验证的配置也不会溢出。
    pub fn particles_per_instance(&self) -> u64 {
        u64::from(self.tiles_per_instance) * u64::from(self.tile_size) * u64::from(self.tile_size)
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        require_power_of_two("tex_size", self.tex_size)?;
        require_power_of_two("tile_size", self.tile_size)?;
        require_power_of_two("tiles_per_instance", self.tiles_per_instance)?;
        require_power_of_two("scratch_tiles", self.scratch_tiles)?;
        require_power_of_two("scratch_particles", self.scratch_particles)?;

        if self.tile_size >= self.tex_size {
            return Err(ConfigError::ValidationError(format!(
                "tile_size ({}) must be smaller than tex_size ({})",
                self.tile_size, self.tex_size
            )));
        }

        // 粒子索引以 16 位坐标打包
        if self.tex_size > 1 << 16 {
            return Err(ConfigError::ValidationError(format!(
                "tex_size ({}) exceeds 65536",
                self.tex_size
            )));
        }

        let tiles_1d = u64::from(self.tex_size / self.tile_size);
        if AtlasLayout::try_new(self.tex_size, self.tile_size).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "atlas of {}x{} tiles exceeds the u32 tile id range",
                tiles_1d, tiles_1d
            )));
        }

        if self.scratch_tiles % self.tiles_per_instance != 0 {
            return Err(ConfigError::ValidationError(format!(
                "scratch_tiles ({}) must be a multiple of tiles_per_instance ({})",
                self.scratch_tiles, self.tiles_per_instance
            )));
        }

        // 精灵索引为 16 位
        if self.particles_per_instance() * 4 > 1 << 16 {
            return Err(ConfigError::ValidationError(format!(
                "particles per instance ({}) exceed the 16-bit index range",
                self.particles_per_instance()
            )));
        }

        self.bounds.validate()
    }
}

/// 包围盒计算配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsConfig {
    /// 每个工作组的线程数
    pub threads_per_group: u32,

    /// 最大工作组数
    pub max_groups: u32,
}

impl_default!(BoundsConfig {
    threads_per_group: 64,
    max_groups: 128,
});

impl BoundsConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.threads_per_group == 0 || self.max_groups == 0 {
            return Err(ConfigError::ValidationError(
                "bounds threads_per_group and max_groups must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn require_power_of_two(name: &str, value: u32) -> ConfigResult<()> {
    if !value.is_power_of_two() {
        return Err(ConfigError::ValidationError(format!(
            "{} ({}) must be a non-zero power of two",
            name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_atlas_constants() {
        let config = GpuParticleConfig::default();
        let layout = config.atlas_layout();
        assert_eq!(layout.tile_count_1d(), 256);
        assert_eq!(layout.tile_count(), 65536);
        assert_eq!(layout.particles_per_tile(), 16);
        assert_eq!(config.particles_per_instance(), 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let config = GpuParticleConfig {
            tex_size: 1000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rejects_tile_larger_than_atlas() {
        let config = GpuParticleConfig {
            tex_size: 16,
            tile_size: 16,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_misaligned_scratch() {
        let config = GpuParticleConfig {
            tiles_per_instance: 16,
            scratch_tiles: 8,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_instances() {
        let config = GpuParticleConfig {
            tile_size: 64,
            tiles_per_instance: 8,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_instance_size_overflowing_u32() {
        let config = GpuParticleConfig {
            tex_size: 1 << 16,
            tile_size: 1 << 15,
            tiles_per_instance: 1 << 31,
            scratch_tiles: 1 << 31,
            ..Default::default()
        };
        assert_eq!(config.particles_per_instance(), 1u64 << 61);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rejects_tile_count_overflowing_u32() {
        let config = GpuParticleConfig {
            tex_size: 1 << 16,
            tile_size: 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rejects_zero_bound_groups() {
        let config = GpuParticleConfig {
            bounds: BoundsConfig {
                threads_per_group: 64,
                max_groups: 0,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
