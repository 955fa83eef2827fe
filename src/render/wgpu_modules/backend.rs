//! 基于 wgpu 的渲染后端
//!
//! 着色器源码由资源方持有：资源方为每个着色器名注册预先构建的管线、
//! 绑定组布局以及参数名到绑定槽位的映射。绑定材质时按映射创建绑定组。
//!
//! 每次绘制编码为一个独立的渲染 pass，加载（不清除）当前渲染目标。
//! 写缓冲区前会先提交已记录的命令，保证分块上传与读取它们的绘制顺序一致。

use super::types::{buffer_usages, index_format, texture_format, texture_usages};
use crate::core::{RenderError, RenderResult};
use crate::render::backend::{
    BackendCapabilities, BufferDescriptor, BufferHandle, DrawIndexed, IndexFormat, RenderBackend,
    RenderTargetHandle, TextureDescriptor, TextureHandle, VertexLayout,
};
use crate::render::material::{Material, MaterialParam};
use std::collections::HashMap;
use wgpu::util::DeviceExt;

/// 已注册材质的管线
pub enum PipelineKind {
    Render(wgpu::RenderPipeline),
    Compute(wgpu::ComputePipeline),
}

/// 已注册的材质管线和它的参数绑定表
pub struct WgpuMaterialPipeline {
    pub kind: PipelineKind,
    pub bind_group_layout: wgpu::BindGroupLayout,
    /// 参数名 → 绑定组 0 中的槽位
    pub bindings: Vec<(String, u32)>,
}

impl WgpuMaterialPipeline {
    pub fn render(
        pipeline: wgpu::RenderPipeline,
        bind_group_layout: wgpu::BindGroupLayout,
        bindings: &[(&str, u32)],
    ) -> Self {
        Self {
            kind: PipelineKind::Render(pipeline),
            bind_group_layout,
            bindings: bindings.iter().map(|(n, b)| (n.to_string(), *b)).collect(),
        }
    }

    pub fn compute(
        pipeline: wgpu::ComputePipeline,
        bind_group_layout: wgpu::BindGroupLayout,
        bindings: &[(&str, u32)],
    ) -> Self {
        Self {
            kind: PipelineKind::Compute(pipeline),
            bind_group_layout,
            bindings: bindings.iter().map(|(n, b)| (n.to_string(), *b)).collect(),
        }
    }
}

struct WgpuBuffer {
    buffer: wgpu::Buffer,
    desc: BufferDescriptor,
}

struct WgpuTexture {
    // 持有纹理，视图依赖它存活
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// wgpu 渲染后端
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    encoder: Option<wgpu::CommandEncoder>,
    next_id: u64,
    buffers: HashMap<BufferHandle, WgpuBuffer>,
    textures: HashMap<TextureHandle, WgpuTexture>,
    render_targets: HashMap<RenderTargetHandle, Vec<TextureHandle>>,
    pipelines: HashMap<String, WgpuMaterialPipeline>,
    current_target: Option<RenderTargetHandle>,
    vertex_layout: VertexLayout,
    vertex_buffers: Vec<BufferHandle>,
    index_buffer: Option<(BufferHandle, IndexFormat)>,
    bound_material: Option<Material>,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            encoder: None,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            render_targets: HashMap::new(),
            pipelines: HashMap::new(),
            current_target: None,
            vertex_layout: VertexLayout::new(),
            vertex_buffers: Vec::new(),
            index_buffer: None,
            bound_material: None,
        }
    }

    /// 不依赖窗口创建设备（离线工具、测试）
    pub fn new_headless() -> RenderResult<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::default();
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or(RenderError::NoAdapter)?;

            let (device, queue) = adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("GPU Particles Device"),
                        required_features: wgpu::Features::empty(),
                        required_limits: wgpu::Limits::default(),
                    },
                    None,
                )
                .await
                .map_err(|e| RenderError::DeviceRequest(e.to_string()))?;

            tracing::info!(target: "render", "Headless wgpu device on {:?}", adapter.get_info().name);
            Ok(Self::new(device, queue))
        })
    }

    /// 为着色器名注册管线
    pub fn register_material(&mut self, shader: &str, pipeline: WgpuMaterialPipeline) {
        self.pipelines.insert(shader.to_string(), pipeline);
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// 提交已记录的命令
    pub fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        self.encoder.take().unwrap_or_else(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Particle Encoder"),
                })
        })
    }

    fn buffer(&self, handle: BufferHandle) -> RenderResult<&WgpuBuffer> {
        self.buffers
            .get(&handle)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{:?}", handle)))
    }

    fn bound_pipeline(&self) -> RenderResult<(&Material, &WgpuMaterialPipeline)> {
        let material = self
            .bound_material
            .as_ref()
            .ok_or_else(|| RenderError::InvalidState("no material bound".to_string()))?;
        let pipeline = self
            .pipelines
            .get(material.shader())
            .ok_or_else(|| RenderError::MissingMaterial(material.shader().to_string()))?;
        Ok((material, pipeline))
    }

    /// 按绑定表为当前材质创建绑定组
    fn create_bind_group(
        &self,
        material: &Material,
        pipeline: &WgpuMaterialPipeline,
    ) -> RenderResult<wgpu::BindGroup> {
        // 常量块先创建，绑定组条目借用它们
        let mut uniforms = Vec::new();
        for (name, _) in &pipeline.bindings {
            if let Some(MaterialParam::Uniform(bytes)) = material.param(name) {
                uniforms.push(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(name.as_str()),
                    contents: bytes,
                    usage: wgpu::BufferUsages::UNIFORM,
                }));
            }
        }

        let mut uniform_iter = uniforms.iter();
        let mut entries = Vec::with_capacity(pipeline.bindings.len());
        for (name, binding) in &pipeline.bindings {
            let param = material.param(name).ok_or_else(|| RenderError::MissingParameter {
                material: material.shader().to_string(),
                name: name.clone(),
            })?;

            let resource = match param {
                MaterialParam::Buffer(handle) => self.buffer(*handle)?.buffer.as_entire_binding(),
                MaterialParam::Texture(handle) => {
                    let texture = self
                        .textures
                        .get(handle)
                        .ok_or_else(|| RenderError::InvalidHandle(format!("{:?}", handle)))?;
                    wgpu::BindingResource::TextureView(&texture.view)
                }
                MaterialParam::Uniform(_) => uniform_iter
                    .next()
                    .ok_or_else(|| RenderError::InvalidState(format!("uniform {} not uploaded", name)))?
                    .as_entire_binding(),
            };

            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource,
            });
        }

        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(material.shader()),
            layout: &pipeline.bind_group_layout,
            entries: &entries,
        }))
    }
}

impl RenderBackend for WgpuBackend {
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> RenderResult<BufferHandle> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: buffer_usages(desc.usage),
            mapped_at_creation: false,
        });
        let handle = BufferHandle(self.next_id());
        self.buffers.insert(
            handle,
            WgpuBuffer {
                buffer,
                desc: desc.clone(),
            },
        );
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(entry) = self.buffers.remove(&buffer) {
            entry.buffer.destroy();
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let size = self.buffer(buffer)?.desc.size;
        if offset + data.len() as u64 > size {
            return Err(RenderError::OutOfBounds {
                offset,
                len: data.len() as u64,
                size,
            });
        }

        // 队列写入在下次提交的命令之前执行
        self.submit();
        self.queue.write_buffer(&self.buffer(buffer)?.buffer, offset, data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> RenderResult<Vec<u8>> {
        let source = self.buffer(buffer)?;
        if !source.desc.usage.contains(crate::render::backend::BufferUsage::COPY_SRC) {
            return Err(RenderError::ReadBack(format!("{:?} lacks COPY_SRC usage", buffer)));
        }
        let size = source.desc.size;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Particle Read Back"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.take_encoder();
        encoder.copy_buffer_to_buffer(&self.buffer(buffer)?.buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = crossbeam_channel::bounded(1);
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        rx.recv()
            .map_err(|e| RenderError::ReadBack(e.to_string()))?
            .map_err(|e| RenderError::ReadBack(e.to_string()))?;

        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        staging.destroy();
        Ok(data)
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> RenderResult<TextureHandle> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width > max || desc.height > max {
            return Err(RenderError::TextureCreation(format!(
                "{}x{} exceeds max texture size {}",
                desc.width, desc.height, max
            )));
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(desc.format),
            usage: texture_usages(desc.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let handle = TextureHandle(self.next_id());
        self.textures.insert(
            handle,
            WgpuTexture {
                _texture: texture,
                view,
            },
        );
        Ok(handle)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
    }

    fn create_render_target(
        &mut self,
        color_attachments: &[TextureHandle],
    ) -> RenderResult<RenderTargetHandle> {
        if let Some(missing) = color_attachments
            .iter()
            .find(|t| !self.textures.contains_key(t))
        {
            return Err(RenderError::InvalidHandle(format!("{:?}", missing)));
        }
        let handle = RenderTargetHandle(self.next_id());
        self.render_targets
            .insert(handle, color_attachments.to_vec());
        Ok(handle)
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        self.render_targets.remove(&target);
        if self.current_target == Some(target) {
            self.current_target = None;
        }
    }

    fn set_render_target(&mut self, target: RenderTargetHandle) -> RenderResult<()> {
        if !self.render_targets.contains_key(&target) {
            return Err(RenderError::InvalidHandle(format!("{:?}", target)));
        }
        self.current_target = Some(target);
        Ok(())
    }

    fn set_vertex_layout(&mut self, layout: &VertexLayout) {
        self.vertex_layout = layout.clone();
    }

    fn set_vertex_buffers(&mut self, buffers: &[BufferHandle]) -> RenderResult<()> {
        for buffer in buffers {
            self.buffer(*buffer)?;
        }
        self.vertex_buffers = buffers.to_vec();
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat) -> RenderResult<()> {
        self.buffer(buffer)?;
        self.index_buffer = Some((buffer, format));
        Ok(())
    }

    fn bind_material(&mut self, material: &Material) -> RenderResult<()> {
        if !self.pipelines.contains_key(material.shader()) {
            return Err(RenderError::MissingMaterial(material.shader().to_string()));
        }
        self.bound_material = Some(material.clone());
        Ok(())
    }

    fn draw_indexed(&mut self, draw: DrawIndexed) -> RenderResult<()> {
        let mut encoder = self.take_encoder();
        let result = self.encode_draw(&mut encoder, draw);
        self.encoder = Some(encoder);
        result
    }

    fn dispatch_compute(&mut self, group_count: u32) -> RenderResult<()> {
        let mut encoder = self.take_encoder();
        let result = self.encode_dispatch(&mut encoder, group_count);
        self.encoder = Some(encoder);
        result
    }

    fn name(&self) -> &str {
        "wgpu"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            max_texture_size: self.device.limits().max_texture_dimension_2d,
            compute_shaders: true,
            uv_y_axis_up: false,
            ndc_y_axis_down: false,
        }
    }
}

impl WgpuBackend {
    fn encode_draw(&self, encoder: &mut wgpu::CommandEncoder, draw: DrawIndexed) -> RenderResult<()> {
        let (material, pipeline) = self.bound_pipeline()?;
        let PipelineKind::Render(render_pipeline) = &pipeline.kind else {
            return Err(RenderError::InvalidState(format!(
                "material {} is not a render material",
                material.shader()
            )));
        };

        let target = self
            .current_target
            .and_then(|t| self.render_targets.get(&t))
            .ok_or_else(|| RenderError::InvalidState("no render target bound".to_string()))?;
        let (index_buffer, format) = self
            .index_buffer
            .ok_or_else(|| RenderError::InvalidState("no index buffer bound".to_string()))?;
        if (self.vertex_buffers.len() as u32) < self.vertex_layout.stream_count() {
            return Err(RenderError::InvalidState(format!(
                "vertex layout uses {} streams, {} buffers bound",
                self.vertex_layout.stream_count(),
                self.vertex_buffers.len()
            )));
        }

        let bind_group = self.create_bind_group(material, pipeline)?;
        let views = target
            .iter()
            .map(|t| {
                self.textures
                    .get(t)
                    .map(|tex| &tex.view)
                    .ok_or_else(|| RenderError::InvalidHandle(format!("{:?}", t)))
            })
            .collect::<RenderResult<Vec<_>>>()?;
        let vertex_buffers = self
            .vertex_buffers
            .iter()
            .map(|b| self.buffer(*b).map(|entry| &entry.buffer))
            .collect::<RenderResult<Vec<_>>>()?;
        let index_buffer = &self.buffer(index_buffer)?.buffer;

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = views
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view: *view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(material.shader()),
            color_attachments: &color_attachments,
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        rpass.set_pipeline(render_pipeline);
        rpass.set_bind_group(0, &bind_group, &[]);
        for (slot, buffer) in vertex_buffers.iter().enumerate() {
            rpass.set_vertex_buffer(slot as u32, buffer.slice(..));
        }
        rpass.set_index_buffer(index_buffer.slice(..), index_format(format));
        rpass.draw_indexed(
            draw.start_index..draw.start_index + draw.index_count,
            draw.base_vertex,
            0..draw.instance_count,
        );
        Ok(())
    }

    fn encode_dispatch(&self, encoder: &mut wgpu::CommandEncoder, group_count: u32) -> RenderResult<()> {
        let (material, pipeline) = self.bound_pipeline()?;
        let PipelineKind::Compute(compute_pipeline) = &pipeline.kind else {
            return Err(RenderError::InvalidState(format!(
                "material {} is not a compute material",
                material.shader()
            )));
        };

        let bind_group = self.create_bind_group(material, pipeline)?;
        let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(material.shader()),
            timestamp_writes: None,
        });
        cpass.set_pipeline(compute_pipeline);
        cpass.set_bind_group(0, &bind_group, &[]);
        cpass.dispatch_workgroups(group_count, 1, 1);
        Ok(())
    }
}
