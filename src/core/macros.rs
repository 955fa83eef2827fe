//! 核心宏定义
//!
//! 提供统一的宏来减少配置结构体的样板代码

/// 为结构体实现Default trait的宏
///
/// 使用示例:
/// ```rust
/// use gpu_particles::impl_default;
///
/// struct AtlasSettings {
///     tex_size: u32,
///     tile_size: u32,
/// }
///
/// impl_default!(AtlasSettings {
///     tex_size: 1024,
///     tile_size: 4,
/// });
///
/// assert_eq!(AtlasSettings::default().tex_size, 1024);
/// ```
#[macro_export]
macro_rules! impl_default {
    ($struct_name:ident {
        $($field:ident: $value:expr),* $(,)?
    }) => {
        impl Default for $struct_name {
            fn default() -> Self {
                Self {
                    $($field: $value),*
                }
            }
        }
    };
}
