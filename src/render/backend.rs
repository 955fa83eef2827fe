//! 渲染后端抽象
//!
//! 粒子模拟核心只通过 [`RenderBackend`] 访问 GPU：缓冲区、纹理、渲染目标、
//! 材质绑定、实例化绘制和计算调度。
//!
//! ## 实现
//!
//! - [`crate::render::wgpu_modules::WgpuBackend`]: 基于 wgpu 的真实后端
//! - [`crate::render::recording::RecordingBackend`]: 记录所有命令的内存后端（用于测试和工具）

use super::material::Material;
use crate::core::RenderResult;

/// 缓冲区描述符
#[derive(Debug, Clone, PartialEq)]
pub struct BufferDescriptor {
    /// 标签
    pub label: Option<String>,
    /// 大小（字节）
    pub size: u64,
    /// 用途
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    pub fn new(label: &str, size: u64, usage: BufferUsage) -> Self {
        Self {
            label: Some(label.to_string()),
            size,
            usage,
        }
    }
}

/// 缓冲区用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferUsage(pub u32);

impl BufferUsage {
    pub const VERTEX: Self = Self(1);
    pub const INDEX: Self = Self(2);
    pub const UNIFORM: Self = Self(4);
    pub const STORAGE: Self = Self(8);
    pub const COPY_SRC: Self = Self(16);
    pub const COPY_DST: Self = Self(32);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// 纹理描述符
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    /// 标签
    pub label: Option<String>,
    /// 宽度
    pub width: u32,
    /// 高度
    pub height: u32,
    /// 格式
    pub format: TextureFormat,
    /// 用途
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// 可作为渲染目标和着色器输入的 2D 纹理
    pub fn render_target_2d(label: &str, size: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width: size,
            height: size,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        }
    }
}

/// 纹理格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
}

impl TextureFormat {
    /// 每像素字节数
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

/// 纹理用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureUsage(pub u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1);
    pub const COPY_DST: Self = Self(2);
    pub const TEXTURE_BINDING: Self = Self(4);
    pub const STORAGE_BINDING: Self = Self(8);
    pub const RENDER_ATTACHMENT: Self = Self(16);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// 索引格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    /// 单个索引的字节数
    pub fn size(&self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// 顶点元素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float2,
    Float4,
}

impl VertexFormat {
    pub fn size(&self) -> u32 {
        match self {
            VertexFormat::Float2 => 8,
            VertexFormat::Float4 => 16,
        }
    }
}

/// 顶点步进模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexStepMode {
    /// 每顶点
    Vertex,
    /// 每实例
    Instance,
}

/// 顶点元素（TEXCOORD 语义）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexElement {
    pub format: VertexFormat,
    /// TEXCOORD 语义索引
    pub semantic_index: u32,
    /// 顶点流（缓冲区槽位）
    pub stream: u32,
    pub step_mode: VertexStepMode,
}

/// 顶点布局声明
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexLayout {
    elements: Vec<VertexElement>,
}

impl VertexLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个元素
    pub fn with_element(
        mut self,
        format: VertexFormat,
        semantic_index: u32,
        stream: u32,
        step_mode: VertexStepMode,
    ) -> Self {
        self.elements.push(VertexElement {
            format,
            semantic_index,
            stream,
            step_mode,
        });
        self
    }

    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    /// 某个顶点流的步长（字节）
    pub fn stride(&self, stream: u32) -> u32 {
        self.elements
            .iter()
            .filter(|e| e.stream == stream)
            .map(|e| e.format.size())
            .sum()
    }

    /// 使用的顶点流数量
    pub fn stream_count(&self) -> u32 {
        self.elements
            .iter()
            .map(|e| e.stream + 1)
            .max()
            .unwrap_or(0)
    }
}

/// 实例化索引绘制参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawIndexed {
    pub start_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
    /// 本次绘制引用的顶点数（部分 API 需要）
    pub vertex_count: u32,
    pub instance_count: u32,
}

impl DrawIndexed {
    /// 每个实例绘制 `quads` 个四边形
    pub fn quads(quads: u32, instance_count: u32) -> Self {
        Self {
            start_index: 0,
            index_count: quads * 6,
            base_vertex: 0,
            vertex_count: quads * 4,
            instance_count,
        }
    }
}

/// 抽象缓冲区句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// 抽象纹理句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// 抽象渲染目标句柄（一组颜色附件）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetHandle(pub u64);

/// 后端能力
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCapabilities {
    /// 最大纹理尺寸
    pub max_texture_size: u32,
    /// 是否支持计算着色器
    pub compute_shaders: bool,
    /// 纹理 V 轴向上（OpenGL 风格）
    pub uv_y_axis_up: bool,
    /// NDC Y 轴向下（Vulkan 风格）
    pub ndc_y_axis_down: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            max_texture_size: 8192,
            compute_shaders: true,
            uv_y_axis_up: false,
            ndc_y_axis_down: false,
        }
    }
}

/// 渲染后端 Trait
///
/// 所有调用都发生在渲染线程上。除 [`RenderBackend::read_buffer`] 外，
/// 命令提交都不等待 GPU 完成。
pub trait RenderBackend {
    /// 创建缓冲区（内容未定义）
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> RenderResult<BufferHandle>;

    /// 销毁缓冲区
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// 写入缓冲区数据
    ///
    /// 写入对之后记录的命令可见，对之前记录的命令不可见。
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8])
        -> RenderResult<()>;

    /// 同步回读整个缓冲区
    ///
    /// 会等待所有已提交的 GPU 工作完成，不适合每帧调用。
    fn read_buffer(&mut self, buffer: BufferHandle) -> RenderResult<Vec<u8>>;

    /// 创建纹理
    fn create_texture(&mut self, desc: &TextureDescriptor) -> RenderResult<TextureHandle>;

    /// 销毁纹理
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// 创建渲染目标，`color_attachments[i]` 绑定到颜色附件 i
    fn create_render_target(
        &mut self,
        color_attachments: &[TextureHandle],
    ) -> RenderResult<RenderTargetHandle>;

    /// 销毁渲染目标（不销毁附件纹理）
    fn destroy_render_target(&mut self, target: RenderTargetHandle);

    /// 绑定渲染目标
    fn set_render_target(&mut self, target: RenderTargetHandle) -> RenderResult<()>;

    /// 设置顶点布局
    fn set_vertex_layout(&mut self, layout: &VertexLayout);

    /// 设置顶点缓冲区，`buffers[i]` 绑定到顶点流 i
    fn set_vertex_buffers(&mut self, buffers: &[BufferHandle]) -> RenderResult<()>;

    /// 设置索引缓冲区
    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat)
        -> RenderResult<()>;

    /// 绑定材质及其参数，供后续绘制或调度使用
    fn bind_material(&mut self, material: &Material) -> RenderResult<()>;

    /// 实例化索引绘制
    fn draw_indexed(&mut self, draw: DrawIndexed) -> RenderResult<()>;

    /// 计算调度（一维工作组）
    fn dispatch_compute(&mut self, group_count: u32) -> RenderResult<()>;

    /// 获取后端名称
    fn name(&self) -> &str;

    /// 获取后端能力
    fn capabilities(&self) -> BackendCapabilities;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_bitor() {
        let usage = BufferUsage::VERTEX | BufferUsage::COPY_DST;
        assert!(usage.contains(BufferUsage::VERTEX));
        assert!(usage.contains(BufferUsage::COPY_DST));
        assert!(!usage.contains(BufferUsage::UNIFORM));
        assert!(!usage.contains(BufferUsage::VERTEX | BufferUsage::STORAGE));
    }

    #[test]
    fn test_vertex_layout_strides() {
        let layout = VertexLayout::new()
            .with_element(VertexFormat::Float4, 0, 0, VertexStepMode::Instance)
            .with_element(VertexFormat::Float4, 1, 0, VertexStepMode::Instance)
            .with_element(VertexFormat::Float2, 2, 0, VertexStepMode::Instance)
            .with_element(VertexFormat::Float2, 3, 1, VertexStepMode::Vertex);

        assert_eq!(layout.stride(0), 40);
        assert_eq!(layout.stride(1), 8);
        assert_eq!(layout.stride(2), 0);
        assert_eq!(layout.stream_count(), 2);
    }

    #[test]
    fn test_draw_quads() {
        let draw = DrawIndexed::quads(8, 3);
        assert_eq!(draw.index_count, 48);
        assert_eq!(draw.vertex_count, 32);
        assert_eq!(draw.instance_count, 3);
    }
}
