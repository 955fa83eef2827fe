//! 记录型内存后端
//!
//! 缓冲区内容保存在主机内存中，所有命令按提交顺序记录下来。
//! 用于测试以及无 GPU 的工具流程（例如离线检查某帧提交了哪些绘制）。
//!
//! 计算调度默认不产生输出；可以通过 [`RecordingBackend::set_compute_handler`]
//! 模拟计算着色器写入 `gOutput` 缓冲区的结果。

use super::backend::{
    BackendCapabilities, BufferDescriptor, BufferHandle, DrawIndexed, IndexFormat,
    RenderBackend, RenderTargetHandle, TextureDescriptor, TextureHandle, VertexLayout,
};
use super::material::Material;
use crate::core::{RenderError, RenderResult};
use std::collections::HashMap;

/// 计算输出缓冲区的参数名
pub const COMPUTE_OUTPUT_PARAM: &str = "gOutput";

/// 模拟计算着色器：输入工作组数和绑定的材质，返回写入输出缓冲区的字节
pub type ComputeHandler = Box<dyn FnMut(u32, &Material) -> Vec<u8>>;

/// 记录的命令
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        data: Vec<u8>,
    },
    ReadBuffer(BufferHandle),
    SetRenderTarget(RenderTargetHandle),
    SetVertexLayout(VertexLayout),
    SetVertexBuffers(Vec<BufferHandle>),
    SetIndexBuffer(BufferHandle, IndexFormat),
    BindMaterial(Material),
    DrawIndexed(DrawIndexed),
    DispatchCompute { group_count: u32 },
}

/// 内存中的缓冲区
#[derive(Debug, Clone)]
pub struct RecordedBuffer {
    pub desc: BufferDescriptor,
    pub data: Vec<u8>,
}

/// 记录型后端
pub struct RecordingBackend {
    next_id: u64,
    buffers: HashMap<BufferHandle, RecordedBuffer>,
    textures: HashMap<TextureHandle, TextureDescriptor>,
    render_targets: HashMap<RenderTargetHandle, Vec<TextureHandle>>,
    bound_material: Option<Material>,
    commands: Vec<RecordedCommand>,
    capabilities: BackendCapabilities,
    compute_handler: Option<ComputeHandler>,
    /// 设置后，之后的缓冲区创建全部失败
    pub fail_buffer_creation: bool,
    /// 设置后，之后的纹理创建全部失败
    pub fail_texture_creation: bool,
    /// 设置后，之后的缓冲区写入全部失败
    pub fail_buffer_writes: bool,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::with_capabilities(BackendCapabilities::default())
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用指定能力创建（例如模拟 Y 轴翻转的 API）
    pub fn with_capabilities(capabilities: BackendCapabilities) -> Self {
        Self {
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            render_targets: HashMap::new(),
            bound_material: None,
            commands: Vec::new(),
            capabilities,
            compute_handler: None,
            fail_buffer_creation: false,
            fail_texture_creation: false,
            fail_buffer_writes: false,
        }
    }

    /// 设置模拟计算着色器
    pub fn set_compute_handler<F>(&mut self, handler: F)
    where
        F: FnMut(u32, &Material) -> Vec<u8> + 'static,
    {
        self.compute_handler = Some(Box::new(handler));
    }

    /// 已记录的命令
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// 清空命令记录（资源保留）
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// 已记录的绘制
    pub fn draws(&self) -> Vec<DrawIndexed> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::DrawIndexed(draw) => Some(*draw),
                _ => None,
            })
            .collect()
    }

    /// 缓冲区当前内容
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    /// 缓冲区描述符
    pub fn buffer_desc(&self, buffer: BufferHandle) -> Option<&BufferDescriptor> {
        self.buffers.get(&buffer).map(|b| &b.desc)
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture)
    }

    pub fn render_target_attachments(&self, target: RenderTargetHandle) -> Option<&[TextureHandle]> {
        self.render_targets.get(&target).map(|t| t.as_slice())
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_render_target_count(&self) -> usize {
        self.render_targets.len()
    }

    pub fn bound_material(&self) -> Option<&Material> {
        self.bound_material.as_ref()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn buffer_mut(&mut self, buffer: BufferHandle) -> RenderResult<&mut RecordedBuffer> {
        self.buffers
            .get_mut(&buffer)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{:?}", buffer)))
    }

    fn check_buffer(&self, buffer: BufferHandle) -> RenderResult<()> {
        if self.buffers.contains_key(&buffer) {
            Ok(())
        } else {
            Err(RenderError::InvalidHandle(format!("{:?}", buffer)))
        }
    }
}

impl RenderBackend for RecordingBackend {
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> RenderResult<BufferHandle> {
        if self.fail_buffer_creation {
            return Err(RenderError::BufferCreation(
                desc.label.clone().unwrap_or_default(),
            ));
        }
        let handle = BufferHandle(self.next_id());
        self.buffers.insert(
            handle,
            RecordedBuffer {
                desc: desc.clone(),
                data: vec![0; desc.size as usize],
            },
        );
        Ok(handle)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> RenderResult<()> {
        if self.fail_buffer_writes {
            return Err(RenderError::InvalidState(format!(
                "write to {:?} rejected",
                buffer
            )));
        }
        let target = self.buffer_mut(buffer)?;
        let size = target.data.len() as u64;
        let end = offset + data.len() as u64;
        if end > size {
            return Err(RenderError::OutOfBounds {
                offset,
                len: data.len() as u64,
                size,
            });
        }
        target.data[offset as usize..end as usize].copy_from_slice(data);
        self.commands.push(RecordedCommand::WriteBuffer {
            buffer,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> RenderResult<Vec<u8>> {
        let data = self
            .buffers
            .get(&buffer)
            .map(|b| b.data.clone())
            .ok_or_else(|| RenderError::InvalidHandle(format!("{:?}", buffer)))?;
        self.commands.push(RecordedCommand::ReadBuffer(buffer));
        Ok(data)
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> RenderResult<TextureHandle> {
        if self.fail_texture_creation {
            return Err(RenderError::TextureCreation(
                desc.label.clone().unwrap_or_default(),
            ));
        }
        if desc.width > self.capabilities.max_texture_size
            || desc.height > self.capabilities.max_texture_size
        {
            return Err(RenderError::TextureCreation(format!(
                "{}x{} exceeds max texture size {}",
                desc.width, desc.height, self.capabilities.max_texture_size
            )));
        }
        let handle = TextureHandle(self.next_id());
        self.textures.insert(handle, desc.clone());
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
    }

    fn set_render_target(&mut self, target: RenderTargetHandle) -> RenderResult<()> {
        if !self.render_targets.contains_key(&target) {
            return Err(RenderError::InvalidHandle(format!("{:?}", target)));
        }
        self.commands.push(RecordedCommand::SetRenderTarget(target));
        Ok(())
    }

    fn set_vertex_layout(&mut self, layout: &VertexLayout) {
        self.commands
            .push(RecordedCommand::SetVertexLayout(layout.clone()));
    }

    fn set_vertex_buffers(&mut self, buffers: &[BufferHandle]) -> RenderResult<()> {
        for buffer in buffers {
            self.check_buffer(*buffer)?;
        }
        self.commands
            .push(RecordedCommand::SetVertexBuffers(buffers.to_vec()));
        Ok(())
    }

    fn set_index_buffer(
        &mut self,
        buffer: BufferHandle,
        format: IndexFormat,
    ) -> RenderResult<()> {
        self.check_buffer(buffer)?;
        self.commands
            .push(RecordedCommand::SetIndexBuffer(buffer, format));
        Ok(())
    }

    fn bind_material(&mut self, material: &Material) -> RenderResult<()> {
        self.bound_material = Some(material.clone());
        self.commands
            .push(RecordedCommand::BindMaterial(material.clone()));
        Ok(())
    }

    fn draw_indexed(&mut self, draw: DrawIndexed) -> RenderResult<()> {
        if self.bound_material.is_none() {
            return Err(RenderError::InvalidState(
                "draw without a bound material".to_string(),
            ));
        }
        self.commands.push(RecordedCommand::DrawIndexed(draw));
        Ok(())
    }

    fn dispatch_compute(&mut self, group_count: u32) -> RenderResult<()> {
        let material = self.bound_material.clone().ok_or_else(|| {
            RenderError::InvalidState("dispatch without a bound material".to_string())
        })?;
        self.commands
            .push(RecordedCommand::DispatchCompute { group_count });

        let output = material.buffer_param(COMPUTE_OUTPUT_PARAM);
        if let (Some(handler), Some(output)) = (self.compute_handler.as_mut(), output) {
            let bytes = handler(group_count, &material);
            let target = self.buffer_mut(output)?;
            let len = bytes.len().min(target.data.len());
            target.data[..len].copy_from_slice(&bytes[..len]);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }

    fn capabilities(&self) -> BackendCapabilities {
        self.capabilities.clone()
    }
}
