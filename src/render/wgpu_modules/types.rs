//! 抽象类型到 wgpu 类型的转换
//!
//! 注册材质管线的一方可以用 [`StreamLayout`] 从 [`VertexLayout`] 生成
//! `wgpu::VertexBufferLayout`，保证管线与模拟核心使用的顶点布局一致。

use crate::render::backend::{
    BufferUsage, IndexFormat, TextureFormat, TextureUsage, VertexFormat, VertexLayout,
    VertexStepMode,
};

pub fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    let pairs = [
        (BufferUsage::VERTEX, wgpu::BufferUsages::VERTEX),
        (BufferUsage::INDEX, wgpu::BufferUsages::INDEX),
        (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
        (BufferUsage::STORAGE, wgpu::BufferUsages::STORAGE),
        (BufferUsage::COPY_SRC, wgpu::BufferUsages::COPY_SRC),
        (BufferUsage::COPY_DST, wgpu::BufferUsages::COPY_DST),
    ];
    for (ours, theirs) in pairs {
        if usage.contains(ours) {
            out |= theirs;
        }
    }
    out
}

pub fn texture_usages(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut out = wgpu::TextureUsages::empty();
    let pairs = [
        (TextureUsage::COPY_SRC, wgpu::TextureUsages::COPY_SRC),
        (TextureUsage::COPY_DST, wgpu::TextureUsages::COPY_DST),
        (TextureUsage::TEXTURE_BINDING, wgpu::TextureUsages::TEXTURE_BINDING),
        (TextureUsage::STORAGE_BINDING, wgpu::TextureUsages::STORAGE_BINDING),
        (TextureUsage::RENDER_ATTACHMENT, wgpu::TextureUsages::RENDER_ATTACHMENT),
    ];
    for (ours, theirs) in pairs {
        if usage.contains(ours) {
            out |= theirs;
        }
    }
    out
}

pub fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

pub fn index_format(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
        IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
    }
}

pub fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float4 => wgpu::VertexFormat::Float32x4,
    }
}

pub fn step_mode(mode: VertexStepMode) -> wgpu::VertexStepMode {
    match mode {
        VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
        VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
    }
}

/// 单个顶点流的布局
///
/// `shader_location` 取 TEXCOORD 语义索引。
#[derive(Debug, Clone, PartialEq)]
pub struct StreamLayout {
    pub array_stride: u64,
    pub step_mode: wgpu::VertexStepMode,
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl StreamLayout {
    /// 按流序号生成所有流的布局
    pub fn from_vertex_layout(layout: &VertexLayout) -> Vec<Self> {
        (0..layout.stream_count())
            .map(|stream| {
                let mut offset = 0u64;
                let mut mode = wgpu::VertexStepMode::Vertex;
                let attributes = layout
                    .elements()
                    .iter()
                    .filter(|e| e.stream == stream)
                    .map(|e| {
                        mode = step_mode(e.step_mode);
                        let attribute = wgpu::VertexAttribute {
                            format: vertex_format(e.format),
                            offset,
                            shader_location: e.semantic_index,
                        };
                        offset += u64::from(e.format.size());
                        attribute
                    })
                    .collect();

                Self {
                    array_stride: offset,
                    step_mode: mode,
                    attributes,
                }
            })
            .collect()
    }

    /// 借用为 wgpu 顶点缓冲区布局
    pub fn as_wgpu(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.array_stride,
            step_mode: self.step_mode,
            attributes: &self.attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::particles::helper_buffers::inject_vertex_layout;

    #[test]
    fn test_usage_conversion() {
        let usage = buffer_usages(BufferUsage::STORAGE | BufferUsage::COPY_DST);
        assert_eq!(usage, wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST);

        let usage = texture_usages(TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING);
        assert!(usage.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
        assert!(!usage.contains(wgpu::TextureUsages::COPY_SRC));
    }

    #[test]
    fn test_inject_stream_layouts() {
        let streams = StreamLayout::from_vertex_layout(&inject_vertex_layout());
        assert_eq!(streams.len(), 2);

        assert_eq!(streams[0].array_stride, 40);
        assert_eq!(streams[0].step_mode, wgpu::VertexStepMode::Instance);
        assert_eq!(streams[0].attributes[1].offset, 16);
        assert_eq!(streams[0].attributes[2].shader_location, 2);
        assert_eq!(streams[0].attributes[2].format, wgpu::VertexFormat::Float32x2);

        assert_eq!(streams[1].array_stride, 8);
        assert_eq!(streams[1].step_mode, wgpu::VertexStepMode::Vertex);
        assert_eq!(streams[1].attributes[0].shader_location, 3);
        assert_eq!(streams[1].as_wgpu().attributes.len(), 1);
    }
}
