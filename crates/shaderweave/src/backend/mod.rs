//! The opaque GPU interface everything in this crate is resolved and encoded against
//!
//! A [`Backend`] exposes creation primitives (buffers, textures, samplers, pipelines), a way to
//! obtain a command buffer and the commit / wait lifecycle. The command buffer itself implements
//! [`CommandEncoder`], which mirrors the "bind resource at slot N for stage S, then dispatch or
//! draw" model of the encoders the core drives.

use std::fmt;
use std::future::Future;
use std::ops::Range;

use crate::pipeline::FunctionConstants;
use crate::{BufferUsage, Extent3d, LoadAction, Origin3d, PixelFormat, PrimitiveTopology, Stage, StoreAction, TextureUsage};

pub mod recording;
#[cfg(feature = "wgpu")]
pub mod wgpu;

/// Failure reported by a backend primitive
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Device memory could not be allocated
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    /// The request was rejected (unknown entry point, incompatible descriptor, ...)
    #[error("validation failed: {0}")]
    Validation(String),
    /// A transient resource such as a command buffer is not available right now
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// The device was lost or a submission failed
    #[error("device lost: {0}")]
    Lost(String),
}

/// Parameters for [`Backend::create_buffer`]
#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    pub label: &'a str,
    /// Size in bytes
    pub size: u64,
    pub usage: BufferUsage,
}

/// Parameters for [`Backend::create_texture`]
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: String,
    pub size: Extent3d,
    pub format: PixelFormat,
    pub usage: TextureUsage,
    pub mip_level_count: u32,
}

impl TextureDescriptor {
    /// Describes a single-mip 2-D texture
    pub fn new_2d(label: impl Into<String>, width: u32, height: u32, format: PixelFormat, usage: TextureUsage) -> Self {
        Self {
            label: label.into(),
            size: Extent3d::new_2d(width, height),
            format,
            usage,
            mip_level_count: 1,
        }
    }

    /// Format the texture is actually created with
    ///
    /// Shader-writable textures cannot use sRGB encoding, so their format is demoted to the
    /// linear counterpart.
    pub fn effective_format(&self) -> PixelFormat {
        if self.format.is_srgb() && self.usage.contains(TextureUsage::SHADER_WRITE) {
            self.format.linear()
        } else {
            self.format
        }
    }
}

/// Metadata kept next to a resolved texture so it never has to be re-queried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub size: Extent3d,
    pub format: PixelFormat,
    pub usage: TextureUsage,
}

/// Texture sampling filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FilterMode {
    #[default]
    Nearest,
    Linear,
}

/// Behaviour when sampling outside `[0, 1]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AddressMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Parameters for [`Backend::create_sampler`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamplerDescriptor {
    pub label: String,
    pub filter: FilterMode,
    pub address_mode: AddressMode,
}

/// Parameters for [`Backend::create_compute_pipeline`]
#[derive(Debug, Clone, Copy)]
pub struct ComputePipelineDescriptor<'a> {
    pub label: &'a str,
    pub entry_point: &'a str,
    pub constants: &'a FunctionConstants,
}

/// Parameters for [`Backend::create_render_pipeline`]
#[derive(Debug, Clone, Copy)]
pub struct RenderPipelineDescriptor<'a> {
    pub label: &'a str,
    pub vertex_entry_point: &'a str,
    pub fragment_entry_point: &'a str,
    pub constants: &'a FunctionConstants,
    pub color_format: PixelFormat,
    pub topology: PrimitiveTopology,
}

/// Region and mip levels of a texture-to-texture copy
///
/// A `size` of `None` copies the whole source mip level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureCopy {
    pub source_origin: Origin3d,
    pub source_mip_level: u32,
    pub destination_origin: Origin3d,
    pub destination_mip_level: u32,
    pub size: Option<Extent3d>,
}

/// Colour attachment a render pass draws into
pub struct RenderPassTarget<B: Backend + ?Sized> {
    pub texture: B::Texture,
    pub format: PixelFormat,
    pub load: LoadAction,
    pub store: StoreAction,
}

impl<B: Backend + ?Sized> Clone for RenderPassTarget<B> {
    fn clone(&self) -> Self {
        Self {
            texture: self.texture.clone(),
            format: self.format,
            load: self.load,
            store: self.store,
        }
    }
}

impl<B: Backend + ?Sized> fmt::Debug for RenderPassTarget<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPassTarget")
            .field("texture", &self.texture)
            .field("format", &self.format)
            .field("load", &self.load)
            .field("store", &self.store)
            .finish()
    }
}

/// Creation primitives and command-buffer lifecycle of a GPU API
pub trait Backend: Send + Sync + 'static {
    type Buffer: Clone + fmt::Debug + Send + Sync;
    type Texture: Clone + fmt::Debug + Send + Sync;
    type Sampler: Clone + fmt::Debug + Send + Sync;
    type ComputePipeline: Clone + fmt::Debug + Send + Sync;
    type RenderPipeline: Clone + fmt::Debug + Send + Sync;
    /// Recording command buffer; encode calls are issued directly on it
    type CommandBuffer: CommandEncoder<Self>;
    /// Swap-chain image that can be presented after a commit
    type Drawable: Send;
    /// Token identifying committed work
    type Submission: Send + 'static;

    /// Human-readable device name for diagnostics
    fn name(&self) -> &str;

    /// Allocates a buffer, optionally initialised with `contents`
    fn create_buffer(&self, descriptor: &BufferDescriptor<'_>, contents: Option<&[u8]>) -> Result<Self::Buffer, BackendError>;

    /// Overwrites part of a buffer with new bytes
    ///
    /// A write that does not fit inside the buffer is a validation error.
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, bytes: &[u8]) -> Result<(), BackendError>;

    /// Size of a buffer in bytes
    fn buffer_size(&self, buffer: &Self::Buffer) -> u64;

    /// Allocates a texture
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<Self::Texture, BackendError>;

    /// Uploads tightly packed rows of texels into the first mip level
    fn write_texture(&self, texture: &Self::Texture, bytes: &[u8], bytes_per_row: u32, size: Extent3d) -> Result<(), BackendError>;

    /// Reads back size, format and usage of an existing texture
    fn texture_info(&self, texture: &Self::Texture) -> Result<TextureInfo, BackendError>;

    /// Creates a sampler state
    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<Self::Sampler, BackendError>;

    /// Looks up the entry point in the shader library and compiles a compute pipeline
    fn create_compute_pipeline(&self, descriptor: &ComputePipelineDescriptor<'_>) -> Result<Self::ComputePipeline, BackendError>;

    /// Looks up both entry points in the shader library and compiles a render pipeline
    fn create_render_pipeline(&self, descriptor: &RenderPipelineDescriptor<'_>) -> Result<Self::RenderPipeline, BackendError>;

    /// Obtains a fresh command buffer from the queue
    fn make_command_buffer(&self, label: &str) -> Result<Self::CommandBuffer, BackendError>;

    /// Commits a command buffer, presenting `present` once the work is scheduled
    fn commit(&self, command_buffer: Self::CommandBuffer, present: Option<Self::Drawable>) -> Result<Self::Submission, BackendError>;

    /// Resolves once the GPU has finished the committed work
    fn wait_until_completed(&self, submission: Self::Submission) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Encode calls issued on a command buffer
///
/// Resources are bound to positional slots per stage, then consumed by the next `dispatch` or
/// `draw`. Passes are opened explicitly and closed with [`CommandEncoder::end_pass`].
pub trait CommandEncoder<B: Backend + ?Sized> {
    fn begin_compute_pass(&mut self, label: &str, pipeline: &B::ComputePipeline);

    fn begin_render_pass(&mut self, label: &str, target: &RenderPassTarget<B>, pipeline: &B::RenderPipeline);

    fn set_buffer(&mut self, stage: Stage, slot: u32, buffer: &B::Buffer);

    /// Pushes encoder-local constant data; nothing is allocated that outlives the pass
    fn set_bytes(&mut self, stage: Stage, slot: u32, bytes: &[u8]);

    fn set_texture(&mut self, stage: Stage, slot: u32, texture: &B::Texture);

    fn set_sampler(&mut self, stage: Stage, slot: u32, sampler: &B::Sampler);

    fn dispatch(&mut self, thread_groups: Extent3d, threads_per_group: Extent3d) -> Result<(), BackendError>;

    fn draw(&mut self, topology: PrimitiveTopology, vertices: Range<u32>, instances: Range<u32>) -> Result<(), BackendError>;

    fn end_pass(&mut self);

    fn copy_texture_to_texture(&mut self, source: &B::Texture, destination: &B::Texture, copy: &TextureCopy);

    fn copy_buffer_to_buffer(&mut self, source: &B::Buffer, source_offset: u64, destination: &B::Buffer, destination_offset: u64, size: u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_writable_srgb_textures_are_created_linear() {
        let writable = TextureDescriptor::new_2d("out", 4, 4, PixelFormat::Rgba8UnormSrgb, TextureUsage::READ_WRITE);
        assert_eq!(writable.effective_format(), PixelFormat::Rgba8Unorm);

        let sampled = TextureDescriptor::new_2d("in", 4, 4, PixelFormat::Rgba8UnormSrgb, TextureUsage::SHADER_READ);
        assert_eq!(sampled.effective_format(), PixelFormat::Rgba8UnormSrgb);
    }
}
