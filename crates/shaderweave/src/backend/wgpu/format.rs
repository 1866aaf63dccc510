//! Conversions between the crate's value types and their wgpu counterparts

use crate::backend::{AddressMode, FilterMode};
use crate::{BufferUsage, ClearColor, Extent3d, LoadAction, Origin3d, PixelFormat, PrimitiveTopology, StoreAction, TextureUsage};

pub(crate) fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        PixelFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        PixelFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        PixelFormat::R16Float => wgpu::TextureFormat::R16Float,
        PixelFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        PixelFormat::R32Float => wgpu::TextureFormat::R32Float,
        PixelFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        PixelFormat::R32Uint => wgpu::TextureFormat::R32Uint,
        PixelFormat::R32Sint => wgpu::TextureFormat::R32Sint,
        PixelFormat::Rgba32Uint => wgpu::TextureFormat::Rgba32Uint,
        PixelFormat::Rg11b10Float => wgpu::TextureFormat::Rg11b10Ufloat,
        PixelFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

/// The crate format for a wgpu format, if the crate knows it
pub(crate) fn pixel_format(format: wgpu::TextureFormat) -> Option<PixelFormat> {
    let format = match format {
        wgpu::TextureFormat::R8Unorm => PixelFormat::R8Unorm,
        wgpu::TextureFormat::Rg8Unorm => PixelFormat::Rg8Unorm,
        wgpu::TextureFormat::Rgba8Unorm => PixelFormat::Rgba8Unorm,
        wgpu::TextureFormat::Rgba8UnormSrgb => PixelFormat::Rgba8UnormSrgb,
        wgpu::TextureFormat::Bgra8Unorm => PixelFormat::Bgra8Unorm,
        wgpu::TextureFormat::Bgra8UnormSrgb => PixelFormat::Bgra8UnormSrgb,
        wgpu::TextureFormat::R16Float => PixelFormat::R16Float,
        wgpu::TextureFormat::Rg16Float => PixelFormat::Rg16Float,
        wgpu::TextureFormat::Rgba16Float => PixelFormat::Rgba16Float,
        wgpu::TextureFormat::R32Float => PixelFormat::R32Float,
        wgpu::TextureFormat::Rg32Float => PixelFormat::Rg32Float,
        wgpu::TextureFormat::Rgba32Float => PixelFormat::Rgba32Float,
        wgpu::TextureFormat::R32Uint => PixelFormat::R32Uint,
        wgpu::TextureFormat::R32Sint => PixelFormat::R32Sint,
        wgpu::TextureFormat::Rgba32Uint => PixelFormat::Rgba32Uint,
        wgpu::TextureFormat::Rg11b10Ufloat => PixelFormat::Rg11b10Float,
        wgpu::TextureFormat::Depth32Float => PixelFormat::Depth32Float,
        _ => return None,
    };
    Some(format)
}

/// Format of a storage texture as declared in WGSL
pub(crate) fn storage_format(format: naga::StorageFormat) -> Option<wgpu::TextureFormat> {
    let format = match format {
        naga::StorageFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        naga::StorageFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        naga::StorageFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        naga::StorageFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        naga::StorageFormat::R16Float => wgpu::TextureFormat::R16Float,
        naga::StorageFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        naga::StorageFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        naga::StorageFormat::R32Float => wgpu::TextureFormat::R32Float,
        naga::StorageFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        naga::StorageFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        naga::StorageFormat::R32Uint => wgpu::TextureFormat::R32Uint,
        naga::StorageFormat::R32Sint => wgpu::TextureFormat::R32Sint,
        naga::StorageFormat::Rgba32Uint => wgpu::TextureFormat::Rgba32Uint,
        _ => return None,
    };
    Some(format)
}

pub(crate) fn texture_usages(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::empty();
    if usage.contains(TextureUsage::SHADER_READ) {
        usages |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::SHADER_WRITE) {
        usages |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if usage.contains(TextureUsage::RENDER_TARGET) {
        usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.contains(TextureUsage::COPY_SRC) {
        usages |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        usages |= wgpu::TextureUsages::COPY_DST;
    }
    usages
}

pub(crate) fn texture_usage(usages: wgpu::TextureUsages) -> TextureUsage {
    let mut usage = TextureUsage::empty();
    usage.set(TextureUsage::SHADER_READ, usages.contains(wgpu::TextureUsages::TEXTURE_BINDING));
    usage.set(TextureUsage::SHADER_WRITE, usages.contains(wgpu::TextureUsages::STORAGE_BINDING));
    usage.set(TextureUsage::RENDER_TARGET, usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
    usage.set(TextureUsage::COPY_SRC, usages.contains(wgpu::TextureUsages::COPY_SRC));
    usage.set(TextureUsage::COPY_DST, usages.contains(wgpu::TextureUsages::COPY_DST));
    usage
}

pub(crate) fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    [
        (BufferUsage::STORAGE, wgpu::BufferUsages::STORAGE),
        (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
        (BufferUsage::VERTEX, wgpu::BufferUsages::VERTEX),
        (BufferUsage::INDEX, wgpu::BufferUsages::INDEX),
        (BufferUsage::COPY_SRC, wgpu::BufferUsages::COPY_SRC),
        (BufferUsage::COPY_DST, wgpu::BufferUsages::COPY_DST),
        (BufferUsage::MAP_READ, wgpu::BufferUsages::MAP_READ),
    ]
    .into_iter()
    .filter(|(flag, _)| usage.contains(*flag))
    .fold(wgpu::BufferUsages::empty(), |usages, (_, mapped)| usages | mapped)
}

pub(crate) fn extent(size: Extent3d) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.width,
        height: size.height,
        depth_or_array_layers: size.depth,
    }
}

pub(crate) fn from_extent(size: wgpu::Extent3d) -> Extent3d {
    Extent3d::new(size.width, size.height, size.depth_or_array_layers)
}

pub(crate) fn origin(origin: Origin3d) -> wgpu::Origin3d {
    wgpu::Origin3d {
        x: origin.x,
        y: origin.y,
        z: origin.z,
    }
}

pub(crate) fn filter_mode(filter: FilterMode) -> wgpu::FilterMode {
    match filter {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

pub(crate) fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

pub(crate) fn topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
    }
}

fn color(clear: ClearColor) -> wgpu::Color {
    wgpu::Color {
        r: clear.r,
        g: clear.g,
        b: clear.b,
        a: clear.a,
    }
}

/// wgpu has no "don't care" load; clearing is the cheapest equivalent on tiled GPUs
pub(crate) fn operations(load: LoadAction, store: StoreAction) -> wgpu::Operations<wgpu::Color> {
    wgpu::Operations {
        load: match load {
            LoadAction::DontCare => wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            LoadAction::Load => wgpu::LoadOp::Load,
            LoadAction::Clear(clear) => wgpu::LoadOp::Clear(color(clear)),
        },
        store: match store {
            StoreAction::Store => wgpu::StoreOp::Store,
            StoreAction::Discard => wgpu::StoreOp::Discard,
        },
    }
}
