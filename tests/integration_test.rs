use anyhow::Result;
use glam::{Vec2, Vec3};
use gpu_particles::config::{GpuParticleConfig, SimulationConfig};
use gpu_particles::render::particles::{AtlasLayout, GroupBounds, OUT_OF_ATLAS_UV};
use gpu_particles::render::{
    GpuParticle, GpuParticleSimulation, ParticleSimulationData, ParticleSystemId, RecordingBackend,
};
use std::io::Write;

fn small_config() -> GpuParticleConfig {
    GpuParticleConfig {
        tex_size: 32,
        tile_size: 4,
        tiles_per_instance: 4,
        scratch_tiles: 8,
        scratch_particles: 64,
        ..Default::default()
    }
}

fn emit(data: &mut ParticleSimulationData, id: ParticleSystemId, count: usize, lifetime: f32) {
    data.push(
        id,
        (0..count).map(|i| GpuParticle::new(Vec3::splat(i as f32), Vec3::Y, lifetime)),
    );
}

#[test]
fn test_emit_and_expire_over_many_frames() -> Result<()> {
    let mut backend = RecordingBackend::new();
    let mut simulation = GpuParticleSimulation::new(&mut backend, &small_config())?;
    let id = simulation.create_system();
    let mut data = ParticleSimulationData::new();

    // 持续发射 10 帧，每帧 8 个寿命 0.5 秒的粒子
    for _ in 0..10 {
        emit(&mut data, id, 8, 0.5);
        let stats = simulation.simulate(&mut backend, &mut data, 0.1)?;
        assert_eq!(stats.particles_injected, 8);
        assert_eq!(stats.particles_dropped, 0);
        data.clear();

        let system = simulation.system(id).expect("system exists");
        assert_eq!(
            simulation.resources().allocator().num_allocated_tiles(),
            system.num_tiles()
        );
    }

    // 停止发射后所有 tile 最终都会归还
    let mut frames = 0;
    while simulation.resources().allocator().num_allocated_tiles() > 0 {
        simulation.simulate(&mut backend, &mut data, 0.1)?;
        frames += 1;
        assert!(frames < 20, "tiles never expired");
    }
    assert_eq!(simulation.system(id).expect("system exists").tile_uvs(), None);

    Ok(())
}

#[test]
fn test_systems_share_atlas_without_overlap() -> Result<()> {
    let mut backend = RecordingBackend::new();
    let config = small_config();
    let layout = config.atlas_layout();
    let mut simulation = GpuParticleSimulation::new(&mut backend, &config)?;
    let a = simulation.create_system();
    let b = simulation.create_system();

    let mut data = ParticleSimulationData::new();
    emit(&mut data, a, 40, 5.0);
    emit(&mut data, b, 20, 5.0);
    simulation.simulate(&mut backend, &mut data, 0.1)?;

    let mut uvs: Vec<Vec2> = data
        .particles(a)
        .into_iter()
        .chain(data.particles(b))
        .flatten()
        .map(|p| p.data_uv)
        .collect();
    assert_eq!(uvs.len(), 60);
    assert!(uvs.iter().all(|uv| AtlasLayout::is_in_atlas(*uv)));

    uvs.sort_by(|x, y| x.x.total_cmp(&y.x).then(x.y.total_cmp(&y.y)));
    uvs.dedup();
    assert_eq!(uvs.len(), 60);

    // 每个系统的 tile UV 缓冲区按实例对齐，尾部填充哨兵
    for id in [a, b] {
        let system = simulation.system(id).expect("system exists");
        let buffer = system.tile_uvs().expect("tile uv buffer");
        let bytes = backend.buffer_data(buffer).expect("buffer data");
        let tile_uvs: Vec<Vec2> = bytemuck::pod_collect_to_vec(bytes);
        assert_eq!(tile_uvs.len() % config.tiles_per_instance as usize, 0);
        assert!(tile_uvs[system.num_tiles() as usize..]
            .iter()
            .all(|uv| *uv == OUT_OF_ATLAS_UV));
        assert!(tile_uvs[..system.num_tiles() as usize]
            .iter()
            .all(|uv| (uv.x * layout.tex_size() as f32).fract() == 0.0));
    }

    Ok(())
}

#[test]
fn test_freed_tiles_are_reused_by_other_systems() -> Result<()> {
    let mut backend = RecordingBackend::new();
    let mut simulation = GpuParticleSimulation::new(&mut backend, &small_config())?;
    let short_lived = simulation.create_system();
    let long_lived = simulation.create_system();
    let capacity = simulation.resources().allocator().tile_count() as usize * 16;

    let mut data = ParticleSimulationData::new();
    emit(&mut data, short_lived, capacity, 0.3);
    let stats = simulation.simulate(&mut backend, &mut data, 0.25)?;
    assert_eq!(stats.particles_dropped, 0);
    assert_eq!(simulation.resources().allocator().num_free_tiles(), 0);
    data.clear();

    // 图集已满时新系统的粒子被丢弃
    emit(&mut data, long_lived, 16, 10.0);
    let stats = simulation.simulate(&mut backend, &mut data, 0.25)?;
    assert_eq!(stats.particles_dropped, 16);
    assert_eq!(stats.tiles_freed, 0);
    data.clear();

    // 短寿命系统先处理，同一帧内释放的 tile 立即可用
    emit(&mut data, long_lived, 16, 10.0);
    let stats = simulation.simulate(&mut backend, &mut data, 0.25)?;
    assert_eq!(stats.tiles_freed, 64);
    assert_eq!(stats.particles_injected, 16);
    assert_eq!(stats.tiles_allocated, 1);
    assert_eq!(simulation.system(short_lived).expect("system exists").num_tiles(), 0);

    Ok(())
}

#[test]
fn test_bounds_after_simulation() -> Result<()> {
    let mut backend = RecordingBackend::new();
    let mut simulation = GpuParticleSimulation::new(&mut backend, &small_config())?;
    let id = simulation.create_system();

    let mut data = ParticleSimulationData::new();
    emit(&mut data, id, 24, 5.0);
    simulation.simulate(&mut backend, &mut data, 0.1)?;

    backend.set_compute_handler(|groups, _| {
        let records: Vec<GroupBounds> = (0..groups)
            .map(|g| GroupBounds {
                min: [-(g as f32), 0.0, 0.0, 0.0],
                max: [g as f32, 1.0, 2.0, 0.0],
            })
            .collect();
        bytemuck::cast_slice(&records).to_vec()
    });

    let aabb = simulation
        .compute_bounds(&mut backend, id)?
        .expect("system has particles");
    assert!(aabb.contains(Vec3::ZERO));
    assert_eq!(aabb.max.y, 1.0);
    assert_eq!(aabb.max.z, 2.0);

    Ok(())
}

#[test]
fn test_config_file_drives_simulation() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        r#"
[particles]
tex_size = 64
tile_size = 8
tiles_per_instance = 2
scratch_tiles = 16
scratch_particles = 128

[logging]
level = "debug"
"#
    )?;

    let config = SimulationConfig::from_toml_file(file.path())?;
    config.validate()?;
    assert_eq!(config.particles.atlas_layout().particles_per_tile(), 64);

    let mut backend = RecordingBackend::new();
    let mut simulation = GpuParticleSimulation::new(&mut backend, &config.particles)?;
    assert_eq!(simulation.resources().allocator().tile_count(), 64);

    let id = simulation.create_system();
    let mut data = ParticleSimulationData::new();
    emit(&mut data, id, 65, 1.0);
    let stats = simulation.simulate(&mut backend, &mut data, 0.1)?;
    assert_eq!(stats.tiles_allocated, 2);

    simulation.destroy(&mut backend);
    assert_eq!(backend.live_buffer_count(), 0);
    assert_eq!(backend.live_texture_count(), 0);

    Ok(())
}
