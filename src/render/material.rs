//! 材质绑定
//!
//! 材质由着色器资源名、编译期定义和按名称绑定的参数组成。
//! 着色器本身由后端的材质注册方提供，这里只携带参数值。

use super::backend::{BufferHandle, TextureHandle};

/// 材质参数值
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialParam {
    /// 存储/结构化缓冲区
    Buffer(BufferHandle),
    /// 采样纹理
    Texture(TextureHandle),
    /// 常量块（原始字节）
    Uniform(Vec<u8>),
}

/// 材质
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    shader: &'static str,
    defines: Vec<(&'static str, u32)>,
    params: Vec<(&'static str, MaterialParam)>,
}

impl Material {
    /// 使用着色器资源名创建材质
    pub fn new(shader: &'static str) -> Self {
        Self {
            shader,
            defines: Vec::new(),
            params: Vec::new(),
        }
    }

    /// 添加编译期定义
    pub fn with_define(mut self, name: &'static str, value: u32) -> Self {
        match self.defines.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.defines.push((name, value)),
        }
        self
    }

    pub fn shader(&self) -> &'static str {
        self.shader
    }

    pub fn defines(&self) -> &[(&'static str, u32)] {
        &self.defines
    }

    pub fn define(&self, name: &str) -> Option<u32> {
        self.defines
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    pub fn params(&self) -> &[(&'static str, MaterialParam)] {
        &self.params
    }

    /// 按名称查找参数
    pub fn param(&self, name: &str) -> Option<&MaterialParam> {
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, p)| p)
    }

    /// 按名称查找缓冲区参数
    pub fn buffer_param(&self, name: &str) -> Option<BufferHandle> {
        match self.param(name) {
            Some(MaterialParam::Buffer(handle)) => Some(*handle),
            _ => None,
        }
    }

    /// 设置参数（同名参数被替换）
    pub fn set_param(&mut self, name: &'static str, param: MaterialParam) {
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = param,
            None => self.params.push((name, param)),
        }
    }

    pub fn set_buffer(&mut self, name: &'static str, buffer: BufferHandle) {
        self.set_param(name, MaterialParam::Buffer(buffer));
    }

    pub fn set_texture(&mut self, name: &'static str, texture: TextureHandle) {
        self.set_param(name, MaterialParam::Texture(texture));
    }

    /// 设置常量块
    pub fn set_uniform<T: bytemuck::Pod>(&mut self, name: &'static str, value: &T) {
        self.set_param(name, MaterialParam::Uniform(bytemuck::bytes_of(value).to_vec()));
    }
}
