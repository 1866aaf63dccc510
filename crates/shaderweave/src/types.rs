//! Backend-neutral value types used by descriptions and encode calls

use crate::{Error, Result};

/// Size of a texture, dispatch grid or copy region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3d {
    /// Creates a 3-D extent
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self { width, height, depth }
    }

    /// Creates a 2-D extent with a depth of one
    pub const fn new_2d(width: u32, height: u32) -> Self {
        Self::new(width, height, 1)
    }

    /// Creates a 1-D extent with height and depth of one
    pub const fn new_1d(width: u32) -> Self {
        Self::new(width, 1, 1)
    }

    /// Whether any axis is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }
}

impl Default for Extent3d {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl From<(u32, u32)> for Extent3d {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new_2d(width, height)
    }
}

impl From<(u32, u32, u32)> for Extent3d {
    fn from((width, height, depth): (u32, u32, u32)) -> Self {
        Self::new(width, height, depth)
    }
}

/// Texel origin of a copy region
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Origin3d {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Origin3d {
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };
}

/// Pixel formats understood by the descriptions in this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,
    R32Uint,
    R32Sint,
    Rgba32Uint,
    Rg11b10Float,
    Depth32Float,
}

impl PixelFormat {
    /// Number of colour channels
    ///
    /// Depth formats have no colour channel count and are reported as a configuration error.
    pub fn channels(self) -> Result<u32> {
        match self {
            Self::R8Unorm | Self::R16Float | Self::R32Float | Self::R32Uint | Self::R32Sint => Ok(1),
            Self::Rg8Unorm | Self::Rg16Float | Self::Rg32Float => Ok(2),
            Self::Rg11b10Float => Ok(3),
            Self::Rgba8Unorm | Self::Rgba8UnormSrgb | Self::Bgra8Unorm | Self::Bgra8UnormSrgb | Self::Rgba16Float | Self::Rgba32Float | Self::Rgba32Uint => Ok(4),
            Self::Depth32Float => Err(Error::configuration(format!("{self:?}"), "pixel format has no colour channel count")),
        }
    }

    /// Bytes occupied by a single texel
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rg8Unorm | Self::R16Float => 2,
            Self::Rgba8Unorm | Self::Rgba8UnormSrgb | Self::Bgra8Unorm | Self::Bgra8UnormSrgb | Self::Rg16Float => 4,
            Self::R32Float | Self::R32Uint | Self::R32Sint | Self::Rg11b10Float | Self::Depth32Float => 4,
            Self::Rgba16Float | Self::Rg32Float => 8,
            Self::Rgba32Float | Self::Rgba32Uint => 16,
        }
    }

    /// Whether the format applies sRGB encoding on write
    pub fn is_srgb(self) -> bool {
        matches!(self, Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb)
    }

    /// The same layout without sRGB encoding
    pub fn linear(self) -> Self {
        match self {
            Self::Rgba8UnormSrgb => Self::Rgba8Unorm,
            Self::Bgra8UnormSrgb => Self::Bgra8Unorm,
            other => other,
        }
    }
}

bitflags::bitflags! {
    /// How a texture will be accessed
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SHADER_READ = 1 << 0;
        const SHADER_WRITE = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const COPY_SRC = 1 << 3;
        const COPY_DST = 1 << 4;

        const READ_WRITE = Self::SHADER_READ.bits() | Self::SHADER_WRITE.bits();
        const ALL = Self::READ_WRITE.bits() | Self::RENDER_TARGET.bits() | Self::COPY_SRC.bits() | Self::COPY_DST.bits();
    }
}

bitflags::bitflags! {
    /// How a buffer will be accessed
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const STORAGE = 1 << 0;
        const UNIFORM = 1 << 1;
        const VERTEX = 1 << 2;
        const INDEX = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
        const MAP_READ = 1 << 6;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::STORAGE | Self::COPY_SRC | Self::COPY_DST
    }
}

/// Shader stage a resource is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Compute,
    Vertex,
    Fragment,
}

/// What happens to the colour attachment when a render pass begins
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadAction {
    DontCare,
    Load,
    Clear(ClearColor),
}

/// What happens to the colour attachment when a render pass ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
    Store,
    Discard,
}

/// Colour used by [`LoadAction::Clear`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearColor {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl ClearColor {
    pub const TRANSPARENT: Self = Self { r: 0.0, g: 0.0, b: 0.0, a: 0.0 };
    pub const BLACK: Self = Self { r: 0.0, g: 0.0, b: 0.0, a: 1.0 };
}

/// Primitive assembly used by a draw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}
