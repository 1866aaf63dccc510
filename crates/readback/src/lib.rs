//! Image-file export for shaderweave textures on the wgpu backend
//!
//! Resolved textures and buffers are copied into a mapped staging buffer and read back on the
//! CPU. Texture rows are padded to wgpu's 256-byte copy alignment on the GPU side and unpadded
//! here before the pixels are converted and written through the `image` crate, which picks the
//! file format from the output path's extension. [`write_step`] packages an export as a step of
//! an [`OperationSet`](shaderweave::OperationSet).

use std::path::{Path, PathBuf};

use shaderweave::backend::TextureInfo;
use shaderweave::resource::{BufferHandle, SharedTexture, TextureHandle};
use shaderweave::{BackendError, LazyBuffer, LazyTexture, PixelFormat, Step, WgpuBackend};
use tracing::debug;

/// Errors raised while reading GPU data back or writing it to disk
#[derive(Debug, thiserror::Error)]
pub enum ReadbackError {
    #[error(transparent)]
    Shaderweave(#[from] shaderweave::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("only 2-D textures can be exported, this one has depth {0}")]
    NotTwoDimensional(u32),
    #[error("read back {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("could not map the staging buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error("the mapping callback was dropped before it ran")]
    MapCallbackDropped,
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl ReadbackError {
    /// Converts the failure of exporting `object` into a core error
    ///
    /// Core and backend failures keep their own kind; everything else becomes
    /// [`shaderweave::Error::Export`].
    pub fn into_error(self, object: &str) -> shaderweave::Error {
        match self {
            Self::Shaderweave(err) => err,
            Self::Backend(err) => shaderweave::Error::from_backend(object, err),
            other => shaderweave::Error::Export {
                object: object.to_owned(),
                reason: other.to_string(),
            },
        }
    }
}

/// Pixels of a texture read back with the row padding removed
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Tightly packed rows
    pub bytes: Vec<u8>,
}

/// Row stride of a texture-to-buffer copy
///
/// # Arguments
/// * `width` - Texture width in pixels
/// * `bytes_per_pixel` - Size of one texel
///
/// # Returns
/// The unpadded row size rounded up to [`wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`]
pub fn padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    (width * bytes_per_pixel).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
}

/// Drops the padding at the end of every row
pub fn unpad_rows(data: &[u8], unpadded_bytes_per_row: usize, padded_bytes_per_row: usize, height: usize) -> Vec<u8> {
    if unpadded_bytes_per_row == padded_bytes_per_row {
        return data[..unpadded_bytes_per_row * height].to_vec();
    }
    data.chunks(padded_bytes_per_row)
        .take(height)
        .flat_map(|row| &row[..unpadded_bytes_per_row])
        .copied()
        .collect()
}

fn half_values(data: &[u8]) -> impl Iterator<Item = f32> + '_ {
    data.chunks_exact(2).map(|chunk| half::f16::from_le_bytes([chunk[0], chunk[1]]).to_f32())
}

fn float_values(data: &[u8]) -> impl Iterator<Item = f32> + '_ {
    data.chunks_exact(4).map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

/// Expands `channels` values per pixel to RGBA, filling missing green/blue with zero and alpha
/// with one; single-channel data becomes grayscale
fn expand_to_rgba(values: impl Iterator<Item = f32>, channels: usize, pixels: usize) -> Vec<f32> {
    let values = values.collect::<Vec<_>>();
    let mut rgba = Vec::with_capacity(pixels * 4);
    for pixel in values.chunks_exact(channels) {
        match pixel {
            [r] => rgba.extend([r.abs(), r.abs(), r.abs(), 1.0]),
            [r, g] => rgba.extend([r.abs(), g.abs(), 0.0, 1.0]),
            [r, g, b, a] => rgba.extend([*r, *g, *b, *a]),
            _ => {}
        }
    }
    rgba
}

/// Converts tightly packed texels into an image
///
/// 8-bit colour formats are kept as 8-bit RGBA (BGRA is swizzled); float formats become a
/// 32-bit float image. Any other format is a configuration error.
pub fn to_image(format: PixelFormat, width: u32, height: u32, data: &[u8]) -> Result<image::DynamicImage, ReadbackError> {
    let pixels = (width * height) as usize;
    let expected = pixels * format.bytes_per_pixel() as usize;
    if data.len() != expected {
        return Err(ReadbackError::SizeMismatch { expected, actual: data.len() });
    }

    let size_error = || ReadbackError::SizeMismatch { expected, actual: data.len() };
    let image = match format {
        PixelFormat::Rgba8Unorm | PixelFormat::Rgba8UnormSrgb => image::DynamicImage::ImageRgba8(image::RgbaImage::from_raw(width, height, data.to_vec()).ok_or_else(size_error)?),
        PixelFormat::Bgra8Unorm | PixelFormat::Bgra8UnormSrgb => {
            let rgba = data.chunks_exact(4).flat_map(|bgra| [bgra[2], bgra[1], bgra[0], bgra[3]]).collect();
            image::DynamicImage::ImageRgba8(image::RgbaImage::from_raw(width, height, rgba).ok_or_else(size_error)?)
        }
        PixelFormat::R16Float | PixelFormat::Rg16Float | PixelFormat::Rgba16Float => {
            let rgba = expand_to_rgba(half_values(data), format.channels()? as usize, pixels);
            image::DynamicImage::ImageRgba32F(image::Rgba32FImage::from_raw(width, height, rgba).ok_or_else(size_error)?)
        }
        PixelFormat::R32Float | PixelFormat::Rg32Float | PixelFormat::Rgba32Float => {
            let rgba = expand_to_rgba(float_values(data), format.channels()? as usize, pixels);
            image::DynamicImage::ImageRgba32F(image::Rgba32FImage::from_raw(width, height, rgba).ok_or_else(size_error)?)
        }
        other => return Err(shaderweave::Error::configuration(format!("{other:?}"), "pixel format cannot be exported as an image").into()),
    };
    Ok(image)
}

/// Converts tightly packed texels into 8-bit RGBA
pub fn to_rgba8(format: PixelFormat, width: u32, height: u32, data: &[u8]) -> Result<image::RgbaImage, ReadbackError> {
    Ok(to_image(format, width, height, data)?.to_rgba8())
}

fn map_read(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Result<Vec<u8>, ReadbackError> {
    let buffer_slice = buffer.slice(..);
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device.poll(wgpu::PollType::Wait)?;
    pollster::block_on(receiver.receive()).ok_or(ReadbackError::MapCallbackDropped)??;

    let data = buffer_slice.get_mapped_range().to_vec();
    buffer.unmap();
    Ok(data)
}

/// Copies a 2-D texture into a staging buffer and returns its packed pixels
///
/// Blocks until the GPU has finished every submission made so far.
pub fn read_texture(backend: &WgpuBackend, texture: &wgpu::Texture, info: TextureInfo) -> Result<TextureData, ReadbackError> {
    if info.size.depth != 1 {
        return Err(ReadbackError::NotTwoDimensional(info.size.depth));
    }
    let (width, height) = (info.size.width, info.size.height);
    let bytes_per_pixel = info.format.bytes_per_pixel();
    let unpadded = width * bytes_per_pixel;
    let padded = padded_bytes_per_row(width, bytes_per_pixel);

    let device = backend.device();
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback staging"),
        size: padded as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    backend.queue().submit(std::iter::once(encoder.finish()));

    let data = map_read(device, &staging)?;
    debug!(width, height, format = ?info.format, "read back texture");
    Ok(TextureData {
        width,
        height,
        format: info.format,
        bytes: unpad_rows(&data, unpadded as usize, padded as usize, height as usize),
    })
}

/// Copies the first `byte_len` bytes of a buffer back to the CPU
pub fn read_buffer(backend: &WgpuBackend, handle: &BufferHandle<wgpu::Buffer>) -> Result<Vec<u8>, ReadbackError> {
    let device = backend.device();
    let size = handle.byte_len.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback staging"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
    encoder.copy_buffer_to_buffer(&handle.buffer, 0, &staging, 0, size);
    backend.queue().submit(std::iter::once(encoder.finish()));

    let mut data = map_read(device, &staging)?;
    data.truncate(handle.byte_len as usize);
    Ok(data)
}

/// Reads back a resolved lazy buffer
pub fn read_lazy_buffer(backend: &WgpuBackend, buffer: &LazyBuffer<WgpuBackend>) -> Result<Vec<u8>, ReadbackError> {
    read_buffer(backend, buffer.handle()?)
}

/// Writes a resolved texture to an image file
///
/// # Arguments
/// * `backend` - Backend the texture was created on
/// * `handle` - Resolved texture handle
/// * `path` - Output file; its extension selects the image format
pub fn save_texture(backend: &WgpuBackend, handle: &TextureHandle<wgpu::Texture>, path: impl AsRef<Path>) -> Result<(), ReadbackError> {
    let data = read_texture(backend, &handle.texture, handle.info)?;
    let image = to_rgba8(data.format, data.width, data.height, &data.bytes)?;
    image.save(path.as_ref())?;
    debug!(path = %path.as_ref().display(), "saved texture");
    Ok(())
}

/// Writes a resolved lazy texture to an image file
///
/// The texture must already have been resolved by an encode; reading an unresolved texture is
/// reported as [`shaderweave::Error::Unresolved`].
pub fn export_texture(backend: &WgpuBackend, texture: &LazyTexture<WgpuBackend>, path: impl AsRef<Path>) -> Result<(), ReadbackError> {
    save_texture(backend, texture.handle()?, path)
}

/// An operation-set step that saves `texture` once the submissions before it have completed
///
/// # Arguments
/// * `texture` - Cell shared with the units that render into the texture
/// * `path` - Output file; its extension selects the image format
pub fn write_step(texture: &SharedTexture<WgpuBackend>, path: impl Into<PathBuf>) -> Step<WgpuBackend> {
    let path = path.into();
    let label = format!("write {}", path.display());
    let object = texture.label().to_owned();
    Step::export(label, texture, move |backend, handle| save_texture(backend, handle, &path).map_err(|err| err.into_error(&object)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_failures_keep_core_kinds_and_name_the_texture() {
        let err = ReadbackError::NotTwoDimensional(4).into_error("volume");
        assert!(matches!(err, shaderweave::Error::Export { ref object, .. } if object == "volume"), "{err}");

        let err = ReadbackError::Backend(BackendError::OutOfMemory("staging".into())).into_error("canvas");
        assert!(matches!(err, shaderweave::Error::ResourceExhausted { ref object, .. } if object == "canvas"));

        let unresolved = shaderweave::Error::Unresolved { object: "canvas".into() };
        assert!(matches!(ReadbackError::from(unresolved).into_error("other"), shaderweave::Error::Unresolved { ref object } if object == "canvas"));
    }

    #[test]
    fn rows_are_padded_to_the_copy_alignment() {
        assert_eq!(padded_bytes_per_row(64, 4), 256);
        assert_eq!(padded_bytes_per_row(65, 4), 512);
        assert_eq!(padded_bytes_per_row(3, 16), 256);
    }

    #[test]
    fn padding_is_dropped_from_every_row() {
        let mut padded = vec![0u8; 2 * 8];
        padded[..3].copy_from_slice(&[1, 2, 3]);
        padded[8..11].copy_from_slice(&[4, 5, 6]);
        assert_eq!(unpad_rows(&padded, 3, 8, 2), [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn bgra_pixels_are_swizzled() {
        let image = to_rgba8(PixelFormat::Bgra8UnormSrgb, 1, 1, &[10, 20, 30, 40]).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [30, 20, 10, 40]);
    }

    #[test]
    fn single_channel_floats_become_grayscale() {
        let data = [0.0f32, -1.0].iter().flat_map(|value| value.to_le_bytes()).collect::<Vec<_>>();
        let image = to_rgba8(PixelFormat::R32Float, 2, 1, &data).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn unsupported_formats_are_configuration_errors() {
        let result = to_rgba8(PixelFormat::R32Uint, 1, 1, &[0; 4]);
        assert!(matches!(result, Err(ReadbackError::Shaderweave(shaderweave::Error::Configuration { .. }))));
    }

    #[test]
    fn short_data_is_rejected() {
        assert!(matches!(to_rgba8(PixelFormat::Rgba8Unorm, 2, 2, &[0; 12]), Err(ReadbackError::SizeMismatch { expected: 16, actual: 12 })));
    }
}
