//! GPU 粒子模拟调度
//!
//! [`GpuParticleSimulation`] 拥有共享图集、辅助缓冲区、材质和所有粒子系统的追踪器，
//! 每帧调用一次 [`GpuParticleSimulation::simulate`]：
//!
//! ```text
//! swap 图集
//! 逐个系统: detect → allocate → advance → free → rebuild
//! 读图集为渲染目标: 清除新 tile → 注入新粒子
//! 写图集为渲染目标: 逐个系统模拟
//! ```
//!
//! ## 使用示例
//!
//! ```
//! use gpu_particles::config::GpuParticleConfig;
//! use gpu_particles::render::particles::{GpuParticle, GpuParticleSimulation, ParticleSimulationData};
//! use gpu_particles::render::RecordingBackend;
//! use glam::Vec3;
//!
//! let mut backend = RecordingBackend::new();
//! let mut simulation = GpuParticleSimulation::new(&mut backend, &GpuParticleConfig::default())?;
//! let system = simulation.create_system();
//!
//! let mut data = ParticleSimulationData::new();
//! data.push(system, [GpuParticle::new(Vec3::ZERO, Vec3::Y, 2.0)]);
//!
//! let stats = simulation.simulate(&mut backend, &mut data, 1.0 / 60.0)?;
//! assert_eq!(stats.particles_injected, 1);
//! # Ok::<(), gpu_particles::core::EngineError>(())
//! ```

use super::bounds::{Aabb, GpuParticleBoundsPass};
use super::helper_buffers::GpuParticleHelperBuffers;
use super::layout::{TileId, OUT_OF_ATLAS_UV};
use super::materials::{ClearTilesMaterial, InjectParticlesMaterial, SimulateParticlesMaterial};
use super::particle::{GpuParticle, GpuParticleVertex, ParticleSimulationData, ParticleSystemId};
use super::resources::{GpuParticleResources, GpuParticleStateTextures};
use super::system::GpuParticleSystem;
use crate::config::GpuParticleConfig;
use crate::core::{EngineError, EngineResult, RenderError, RenderResult};
use crate::render::backend::{DrawIndexed, IndexFormat, RenderBackend};
use glam::Vec2;
use std::collections::BTreeMap;

/// 单帧统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulationStats {
    /// 处理的粒子系统数
    pub systems: usize,
    /// 新分配（需要清除）的 tile 数
    pub tiles_allocated: usize,
    /// 归还给分配器的 tile 数
    pub tiles_freed: usize,
    pub particles_injected: usize,
    /// 图集已满而未能注入的粒子数
    pub particles_dropped: usize,
    pub clear_passes: u32,
    pub inject_passes: u32,
    pub simulate_draws: u32,
}

/// GPU 粒子模拟
pub struct GpuParticleSimulation {
    config: GpuParticleConfig,
    resources: GpuParticleResources,
    helper_buffers: GpuParticleHelperBuffers,
    clear_material: ClearTilesMaterial,
    inject_material: InjectParticlesMaterial,
    simulate_material: SimulateParticlesMaterial,
    bounds_pass: GpuParticleBoundsPass,
    systems: BTreeMap<ParticleSystemId, GpuParticleSystem>,
    next_system_id: u32,
    /// 本帧待清除的 tile
    new_tiles: Vec<TileId>,
    /// 本帧待注入的粒子
    new_particles: Vec<GpuParticleVertex>,
}

impl GpuParticleSimulation {
    /// 验证配置并创建共享 GPU 资源
    pub fn new(backend: &mut dyn RenderBackend, config: &GpuParticleConfig) -> EngineResult<Self> {
        config.validate()?;

        let caps = backend.capabilities();
        if config.tex_size > caps.max_texture_size {
            return Err(EngineError::Init(format!(
                "particle atlas size {} exceeds backend '{}' max texture size {}",
                config.tex_size,
                backend.name(),
                caps.max_texture_size
            )));
        }

        let resources = GpuParticleResources::new(backend, config.atlas_layout())?;
        let helper_buffers = match GpuParticleHelperBuffers::new(backend, config) {
            Ok(buffers) => buffers,
            Err(e) => {
                resources.destroy(backend);
                return Err(e.into());
            }
        };

        tracing::info!(
            target: "particles",
            "GPU particle simulation initialized on '{}': {} tiles of {} particles",
            backend.name(),
            resources.allocator().tile_count(),
            config.atlas_layout().particles_per_tile()
        );

        Ok(Self {
            config: config.clone(),
            resources,
            helper_buffers,
            clear_material: ClearTilesMaterial::new(&caps, config.tiles_per_instance),
            inject_material: InjectParticlesMaterial::new(&caps),
            simulate_material: SimulateParticlesMaterial::new(&caps, config.tiles_per_instance),
            bounds_pass: GpuParticleBoundsPass::new(&config.bounds),
            systems: BTreeMap::new(),
            next_system_id: 0,
            new_tiles: Vec::new(),
            new_particles: Vec::new(),
        })
    }

    /// 注册新的粒子系统
    pub fn create_system(&mut self) -> ParticleSystemId {
        let id = ParticleSystemId(self.next_system_id);
        self.next_system_id += 1;
        self.systems.insert(
            id,
            GpuParticleSystem::new(id, self.config.atlas_layout(), self.config.tiles_per_instance),
        );
        tracing::debug!(target: "particles", "Created particle system {}", id.0);
        id
    }

    /// 移除粒子系统，归还它的所有 tile
    pub fn remove_system(&mut self, backend: &mut dyn RenderBackend, id: ParticleSystemId) -> bool {
        let Some(mut system) = self.systems.remove(&id) else {
            return false;
        };

        let tiles = system.num_tiles();
        system.release_all_tiles(self.resources.allocator_mut(), backend);
        tracing::debug!(
            target: "particles",
            "Removed particle system {}, released {} tiles",
            id.0,
            tiles
        );
        true
    }

    /// 推进一帧模拟
    ///
    /// 新粒子的 `data_uv` 会被写回 `sim_data`。后端错误会中止本帧。
    pub fn simulate(
        &mut self,
        backend: &mut dyn RenderBackend,
        sim_data: &mut ParticleSimulationData,
        dt: f32,
    ) -> RenderResult<SimulationStats> {
        self.resources.swap();
        self.new_tiles.clear();
        self.new_particles.clear();

        let mut stats = SimulationStats {
            systems: self.systems.len(),
            ..Default::default()
        };

        for system in self.systems.values_mut() {
            system.detect_inactive_tiles();

            let mut tiles_dirty = false;
            if let Some(particles) = sim_data.particles_mut(system.id()) {
                let allocation = system.allocate_slots_for(
                    self.resources.allocator_mut(),
                    particles,
                    &mut self.new_tiles,
                );
                tiles_dirty = allocation.tiles_added;

                self.new_particles.extend(
                    particles[..allocation.admitted]
                        .iter()
                        .map(GpuParticle::vertex),
                );
                stats.particles_dropped += particles.len() - allocation.admitted;
            }

            system.advance_time(dt);

            let free_before = self.resources.allocator().num_free_tiles();
            tiles_dirty |= system.free_inactive_tiles(self.resources.allocator_mut());
            stats.tiles_freed += (self.resources.allocator().num_free_tiles() - free_before) as usize;

            if tiles_dirty {
                system.rebuild_gpu_layout_buffers(backend)?;
            }
        }

        for id in sim_data.gpu_data.keys() {
            if !self.systems.contains_key(id) {
                tracing::warn!(
                    target: "particles",
                    "Ignoring particles for unknown particle system {}",
                    id.0
                );
            }
        }

        stats.tiles_allocated = self.new_tiles.len();
        stats.particles_injected = self.new_particles.len();
        if stats.particles_dropped > 0 {
            tracing::warn!(
                target: "particles",
                "Particle atlas full, dropped {} new particles",
                stats.particles_dropped
            );
        }

        let read_state = *self.resources.read_state();
        let write_state = *self.resources.write_state();

        backend.set_render_target(read_state.render_target)?;
        stats.clear_passes = self.clear_tiles(backend)?;
        stats.inject_passes = self.inject_particles(backend)?;

        backend.set_render_target(write_state.render_target)?;
        stats.simulate_draws = self.simulate_systems(backend, &read_state)?;

        tracing::trace!(target: "particles", "Particle frame: {:?}", stats);
        Ok(stats)
    }

    /// 清除本帧新分配的 tile，返回绘制次数
    fn clear_tiles(&mut self, backend: &mut dyn RenderBackend) -> RenderResult<u32> {
        if self.new_tiles.is_empty() {
            return Ok(0);
        }

        let helpers = &self.helper_buffers;
        let tiles_per_instance = self.config.tiles_per_instance as usize;
        let layout = *self.resources.layout();

        self.clear_material.bind(backend, helpers.tile_scratch)?;
        backend.set_vertex_layout(&helpers.tile_vertex_layout);
        backend.set_vertex_buffers(&[helpers.sprite_uvs])?;
        backend.set_index_buffer(helpers.sprite_indices, IndexFormat::Uint16)?;

        let mut passes = 0;
        for chunk in self.new_tiles.chunks(helpers.num_scratch_tiles() as usize) {
            let aligned = chunk.len().div_ceil(tiles_per_instance) * tiles_per_instance;
            let mut uvs: Vec<Vec2> = chunk.iter().map(|tile| layout.tile_coords(*tile)).collect();
            uvs.resize(aligned, OUT_OF_ATLAS_UV);

            backend.write_buffer(helpers.tile_scratch, 0, bytemuck::cast_slice(&uvs))?;
            backend.draw_indexed(DrawIndexed::quads(
                self.config.tiles_per_instance,
                (aligned / tiles_per_instance) as u32,
            ))?;
            passes += 1;
        }

        Ok(passes)
    }

    /// 把本帧获得槽位的粒子写入读图集，返回绘制次数
    fn inject_particles(&mut self, backend: &mut dyn RenderBackend) -> RenderResult<u32> {
        if self.new_particles.is_empty() {
            return Ok(0);
        }

        let helpers = &self.helper_buffers;
        self.inject_material.bind(backend)?;
        backend.set_vertex_layout(&helpers.inject_vertex_layout);
        backend.set_vertex_buffers(&[helpers.inject_scratch, helpers.particle_uvs])?;
        backend.set_index_buffer(helpers.sprite_indices, IndexFormat::Uint16)?;

        let mut passes = 0;
        for chunk in self.new_particles.chunks(helpers.num_scratch_particles() as usize) {
            backend.write_buffer(helpers.inject_scratch, 0, bytemuck::cast_slice(chunk))?;
            backend.draw_indexed(DrawIndexed::quads(1, chunk.len() as u32))?;
            passes += 1;
        }

        Ok(passes)
    }

    /// 每个拥有 tile 的系统一次实例化绘制
    fn simulate_systems(
        &mut self,
        backend: &mut dyn RenderBackend,
        read_state: &GpuParticleStateTextures,
    ) -> RenderResult<u32> {
        let helpers = &self.helper_buffers;
        self.simulate_material.set_state(read_state);
        backend.set_vertex_layout(&helpers.tile_vertex_layout);
        backend.set_vertex_buffers(&[helpers.sprite_uvs])?;
        backend.set_index_buffer(helpers.sprite_indices, IndexFormat::Uint16)?;

        let mut draws = 0;
        for system in self.systems.values().filter(|s| s.num_tiles() > 0) {
            let tile_uvs = system.tile_uvs().ok_or_else(|| {
                RenderError::InvalidState(format!(
                    "particle system {} has tiles but no tile UV buffer",
                    system.id().0
                ))
            })?;

            self.simulate_material.bind(backend, tile_uvs)?;
            backend.draw_indexed(DrawIndexed::quads(
                self.config.tiles_per_instance,
                system.num_instances(),
            ))?;
            draws += 1;
        }

        Ok(draws)
    }

    /// 计算某个系统所有槽位的包围盒（读取最近写入的状态）
    ///
    /// 会同步等待 GPU，只用于离线工具。系统没有 tile 时返回 `None`。
    pub fn compute_bounds(
        &mut self,
        backend: &mut dyn RenderBackend,
        id: ParticleSystemId,
    ) -> RenderResult<Option<Aabb>> {
        let system = self
            .systems
            .get(&id)
            .ok_or_else(|| RenderError::InvalidHandle(format!("particle system {}", id.0)))?;

        let Some(indices) = system.particle_indices() else {
            return Ok(None);
        };

        let position_and_time = self.resources.write_state().position_and_time;
        self.bounds_pass
            .execute(backend, position_and_time, indices, system.num_particle_slots())
    }

    pub fn system(&self, id: ParticleSystemId) -> Option<&GpuParticleSystem> {
        self.systems.get(&id)
    }

    /// 按 ID 升序遍历所有系统
    pub fn systems(&self) -> impl Iterator<Item = &GpuParticleSystem> {
        self.systems.values()
    }

    pub fn num_systems(&self) -> usize {
        self.systems.len()
    }

    pub fn resources(&self) -> &GpuParticleResources {
        &self.resources
    }

    pub fn helper_buffers(&self) -> &GpuParticleHelperBuffers {
        &self.helper_buffers
    }

    pub fn config(&self) -> &GpuParticleConfig {
        &self.config
    }

    /// 释放所有 GPU 资源
    pub fn destroy(mut self, backend: &mut dyn RenderBackend) {
        for system in self.systems.values_mut() {
            system.release_all_tiles(self.resources.allocator_mut(), backend);
        }
        self.helper_buffers.destroy(backend);
        self.resources.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backend::BackendCapabilities;
    use crate::render::recording::{RecordedCommand, RecordingBackend};
    use crate::render::particles::bounds::GroupBounds;
    use crate::render::particles::materials::{CLEAR_SHADER, INJECT_SHADER, SIMULATE_SHADER};
    use glam::Vec3;

    fn small_config() -> GpuParticleConfig {
        GpuParticleConfig {
            tex_size: 64,
            tile_size: 4,
            tiles_per_instance: 4,
            scratch_tiles: 8,
            scratch_particles: 32,
            ..Default::default()
        }
    }

    fn spawn(data: &mut ParticleSimulationData, id: ParticleSystemId, count: usize, lifetime: f32) {
        data.push(
            id,
            std::iter::repeat(GpuParticle::new(Vec3::ONE, Vec3::Y, lifetime)).take(count),
        );
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut backend = RecordingBackend::new();
        let config = GpuParticleConfig {
            tex_size: 100,
            ..Default::default()
        };
        assert!(matches!(
            GpuParticleSimulation::new(&mut backend, &config),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_atlas_larger_than_backend_limit() {
        let mut backend = RecordingBackend::with_capabilities(BackendCapabilities {
            max_texture_size: 512,
            ..Default::default()
        });
        assert!(matches!(
            GpuParticleSimulation::new(&mut backend, &GpuParticleConfig::default()),
            Err(EngineError::Init(_))
        ));
    }

    #[test]
    fn test_frame_command_order() {
        let mut backend = RecordingBackend::new();
        let mut simulation = GpuParticleSimulation::new(&mut backend, &small_config()).unwrap();
        let id = simulation.create_system();
        let mut data = ParticleSimulationData::new();
        spawn(&mut data, id, 3, 1.0);

        backend.clear_commands();
        simulation.simulate(&mut backend, &mut data, 0.1).unwrap();

        let read = simulation.resources().read_state().render_target;
        let write = simulation.resources().write_state().render_target;
        let commands = backend.commands();

        let position = |pred: &dyn Fn(&RecordedCommand) -> bool| commands.iter().position(pred).unwrap();
        let read_target = position(&|c| *c == RecordedCommand::SetRenderTarget(read));
        let write_target = position(&|c| *c == RecordedCommand::SetRenderTarget(write));
        let bind = |shader: &'static str| {
            move |c: &RecordedCommand| matches!(c, RecordedCommand::BindMaterial(m) if m.shader() == shader)
        };
        let clear = position(&bind(CLEAR_SHADER));
        let inject = position(&bind(INJECT_SHADER));
        let simulate = position(&bind(SIMULATE_SHADER));

        // 追踪器布局缓冲区在任何渲染目标绑定前重建
        assert!(matches!(commands[0], RecordedCommand::WriteBuffer { .. }));
        assert!(read_target < clear);
        assert!(clear < inject);
        assert!(inject < write_target);
        assert!(write_target < simulate);
        assert!(matches!(commands.last(), Some(RecordedCommand::DrawIndexed(_))));
    }

    #[test]
    fn test_chunked_clear_and_inject() {
        let mut backend = RecordingBackend::new();
        let mut simulation = GpuParticleSimulation::new(&mut backend, &small_config()).unwrap();
        let id = simulation.create_system();
        let mut data = ParticleSimulationData::new();
        spawn(&mut data, id, 200, 10.0);

        backend.clear_commands();
        let stats = simulation.simulate(&mut backend, &mut data, 0.1).unwrap();

        // 200 个粒子占 13 个 tile
        assert_eq!(stats.tiles_allocated, 13);
        assert_eq!(stats.particles_injected, 200);
        assert_eq!(stats.particles_dropped, 0);
        assert_eq!(stats.clear_passes, 2);
        assert_eq!(stats.inject_passes, 7);
        assert_eq!(stats.simulate_draws, 1);

        let draws = backend.draws();
        assert_eq!(draws.len(), 10);
        assert_eq!(draws[0], DrawIndexed::quads(4, 2));
        assert_eq!(draws[1], DrawIndexed::quads(4, 2));
        assert_eq!(draws[2], DrawIndexed::quads(1, 32));
        assert_eq!(draws[8], DrawIndexed::quads(1, 8));
        assert_eq!(draws[9], DrawIndexed::quads(4, 4));

        // 第二个清除块从 scratch 起始位置写入，尾部填充哨兵
        let tile_scratch = simulation.helper_buffers().tile_scratch;
        let clear_writes: Vec<&Vec<u8>> = backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::WriteBuffer { buffer, offset: 0, data } if *buffer == tile_scratch => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(clear_writes.len(), 2);
        let second: Vec<Vec2> = bytemuck::pod_collect_to_vec(clear_writes[1].as_slice());
        let layout = simulation.resources().layout();
        assert_eq!(second.len(), 8);
        assert_eq!(second[0], layout.tile_coords(TileId(8)));
        assert_eq!(second[4], layout.tile_coords(TileId(12)));
        assert!(second[5..].iter().all(|uv| *uv == OUT_OF_ATLAS_UV));
    }

    #[test]
    fn test_data_uvs_written_back() {
        let mut backend = RecordingBackend::new();
        let mut simulation = GpuParticleSimulation::new(&mut backend, &small_config()).unwrap();
        let id = simulation.create_system();
        let mut data = ParticleSimulationData::new();
        spawn(&mut data, id, 2, 1.0);

        simulation.simulate(&mut backend, &mut data, 0.1).unwrap();
        let particles = data.particles(id).unwrap();
        assert_eq!(particles[0].data_uv, Vec2::ZERO);
        assert_eq!(particles[1].data_uv, Vec2::new(1.0 / 64.0, 0.0));
    }

    #[test]
    fn test_exhaustion_drops_and_injects_only_admitted() {
        let mut backend = RecordingBackend::new();
        let config = GpuParticleConfig {
            tex_size: 8,
            tile_size: 4,
            tiles_per_instance: 2,
            scratch_tiles: 2,
            scratch_particles: 16,
            ..Default::default()
        };
        let mut simulation = GpuParticleSimulation::new(&mut backend, &config).unwrap();
        let a = simulation.create_system();
        let b = simulation.create_system();

        let mut data = ParticleSimulationData::new();
        spawn(&mut data, a, 50, 5.0);
        spawn(&mut data, b, 30, 5.0);

        // 系统 a 占满 4 个 tile，系统 b 没有空间
        let stats = simulation.simulate(&mut backend, &mut data, 0.1).unwrap();
        assert_eq!(stats.tiles_allocated, 4);
        assert_eq!(stats.particles_injected, 50);
        assert_eq!(stats.particles_dropped, 30);
        assert_eq!(simulation.system(a).unwrap().num_tiles(), 4);
        assert_eq!(simulation.system(b).unwrap().num_tiles(), 0);
        assert_eq!(stats.simulate_draws, 1);
    }

    #[test]
    fn test_expired_tiles_are_freed() {
        let mut backend = RecordingBackend::new();
        let mut simulation = GpuParticleSimulation::new(&mut backend, &small_config()).unwrap();
        let id = simulation.create_system();

        let mut data = ParticleSimulationData::new();
        spawn(&mut data, id, 20, 0.5);
        simulation.simulate(&mut backend, &mut data, 0.25).unwrap();
        assert_eq!(simulation.resources().allocator().num_allocated_tiles(), 2);

        // lifetime 等于时钟时仍然活跃
        let mut empty = ParticleSimulationData::new();
        for _ in 0..2 {
            let stats = simulation.simulate(&mut backend, &mut empty, 0.25).unwrap();
            assert_eq!(stats.tiles_freed, 0);
        }

        let stats = simulation.simulate(&mut backend, &mut empty, 0.25).unwrap();
        assert_eq!(stats.tiles_freed, 2);
        assert_eq!(stats.simulate_draws, 0);
        assert_eq!(simulation.resources().allocator().num_allocated_tiles(), 0);
        assert_eq!(simulation.system(id).unwrap().tile_uvs(), None);
    }

    #[test]
    fn test_remove_system_releases_tiles() {
        let mut backend = RecordingBackend::new();
        let mut simulation = GpuParticleSimulation::new(&mut backend, &small_config()).unwrap();
        let id = simulation.create_system();
        let mut data = ParticleSimulationData::new();
        spawn(&mut data, id, 40, 10.0);
        simulation.simulate(&mut backend, &mut data, 0.1).unwrap();
        assert_eq!(simulation.resources().allocator().num_allocated_tiles(), 3);

        assert!(simulation.remove_system(&mut backend, id));
        assert!(!simulation.remove_system(&mut backend, id));
        assert_eq!(simulation.resources().allocator().num_allocated_tiles(), 0);
        assert_eq!(simulation.num_systems(), 0);
    }

    #[test]
    fn test_compute_bounds() {
        let mut backend = RecordingBackend::new();
        let mut simulation = GpuParticleSimulation::new(&mut backend, &small_config()).unwrap();
        let id = simulation.create_system();
        assert_eq!(simulation.compute_bounds(&mut backend, id).unwrap(), None);
        assert!(simulation
            .compute_bounds(&mut backend, ParticleSystemId(99))
            .is_err());

        let mut data = ParticleSimulationData::new();
        spawn(&mut data, id, 5, 10.0);
        simulation.simulate(&mut backend, &mut data, 0.1).unwrap();

        backend.set_compute_handler(|groups, _| {
            let record = GroupBounds {
                min: [-1.0, 0.0, 2.0, 0.0],
                max: [3.0, 4.0, 5.0, 0.0],
            };
            bytemuck::cast_slice(&vec![record; groups as usize]).to_vec()
        });
        let aabb = simulation.compute_bounds(&mut backend, id).unwrap().unwrap();
        assert_eq!(aabb.min, Vec3::new(-1.0, 0.0, 2.0));
        assert_eq!(aabb.max, Vec3::new(3.0, 4.0, 5.0));
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut backend = RecordingBackend::new();
        let mut simulation = GpuParticleSimulation::new(&mut backend, &small_config()).unwrap();
        let id = simulation.create_system();
        let mut data = ParticleSimulationData::new();
        spawn(&mut data, id, 10, 10.0);
        simulation.simulate(&mut backend, &mut data, 0.1).unwrap();

        simulation.destroy(&mut backend);
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_texture_count(), 0);
        assert_eq!(backend.live_render_target_count(), 0);
    }
}
