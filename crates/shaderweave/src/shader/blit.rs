//! Copy units between textures and buffers

use std::fmt;

use tracing::trace;

use crate::backend::{Backend, CommandEncoder, TextureCopy};
use crate::resource::{LazyBuffer, LazyTexture};
use crate::{Error, Extent3d, Result};

/// One copy recorded by a [`BlitShader`]
pub enum BlitCommand<B: Backend> {
    /// Copies the whole source texture; both textures must have the same size
    CopyTexture { source: LazyTexture<B>, destination: LazyTexture<B> },
    /// Copies a region between the given origins and mip levels
    CopyTextureRegion {
        source: LazyTexture<B>,
        destination: LazyTexture<B>,
        copy: TextureCopy,
    },
    /// Copies `size` bytes, or the whole source when `None`
    CopyBuffer {
        source: LazyBuffer<B>,
        destination: LazyBuffer<B>,
        size: Option<u64>,
    },
}

/// A sequence of copies encoded outside any compute or render pass
pub struct BlitShader<B: Backend> {
    label: String,
    commands: Vec<BlitCommand<B>>,
}

fn contains(outer: Extent3d, inner: Extent3d) -> bool {
    inner.width <= outer.width && inner.height <= outer.height && inner.depth <= outer.depth
}

impl<B: Backend> BlitShader<B> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            commands: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn copy_texture(mut self, source: LazyTexture<B>, destination: LazyTexture<B>) -> Self {
        self.commands.push(BlitCommand::CopyTexture { source, destination });
        self
    }

    pub fn copy_texture_region(mut self, source: LazyTexture<B>, destination: LazyTexture<B>, copy: TextureCopy) -> Self {
        self.commands.push(BlitCommand::CopyTextureRegion { source, destination, copy });
        self
    }

    pub fn copy_buffer(mut self, source: LazyBuffer<B>, destination: LazyBuffer<B>, size: Option<u64>) -> Self {
        self.commands.push(BlitCommand::CopyBuffer { source, destination, size });
        self
    }

    /// Creates every source and destination
    pub fn prepare(&mut self, backend: &B) -> Result<()> {
        for command in &mut self.commands {
            match command {
                BlitCommand::CopyTexture { source, destination } | BlitCommand::CopyTextureRegion { source, destination, .. } => {
                    source.resolve(backend)?;
                    destination.resolve(backend)?;
                }
                BlitCommand::CopyBuffer { source, destination, .. } => {
                    source.resolve(backend)?;
                    destination.resolve(backend)?;
                }
            }
        }
        Ok(())
    }

    /// Records every copy in order
    pub fn encode(&mut self, backend: &B, encoder: &mut B::CommandBuffer) -> Result<()> {
        trace!(unit = %self.label, copies = self.commands.len(), "encoding blit");
        for command in &mut self.commands {
            match command {
                BlitCommand::CopyTexture { source, destination } => {
                    let source = source.resolve(backend)?;
                    let destination = destination.resolve(backend)?;
                    if source.size() != destination.size() {
                        return Err(Error::configuration(
                            self.label.as_str(),
                            format!("cannot copy a {:?} texture into a {:?} texture", source.size(), destination.size()),
                        ));
                    }
                    encoder.copy_texture_to_texture(&source.texture, &destination.texture, &TextureCopy::default());
                }
                BlitCommand::CopyTextureRegion { source, destination, copy } => {
                    let source = source.resolve(backend)?;
                    let destination = destination.resolve(backend)?;
                    let size = copy.size.unwrap_or(source.size());
                    let source_end = Extent3d::new(copy.source_origin.x + size.width, copy.source_origin.y + size.height, copy.source_origin.z + size.depth);
                    let destination_end = Extent3d::new(
                        copy.destination_origin.x + size.width,
                        copy.destination_origin.y + size.height,
                        copy.destination_origin.z + size.depth,
                    );
                    if !contains(source.size(), source_end) || !contains(destination.size(), destination_end) {
                        return Err(Error::configuration(self.label.as_str(), format!("copy region {copy:?} is out of bounds")));
                    }
                    encoder.copy_texture_to_texture(&source.texture, &destination.texture, copy);
                }
                BlitCommand::CopyBuffer { source, destination, size } => {
                    let source = source.resolve(backend)?;
                    let destination = destination.resolve(backend)?;
                    let size = size.unwrap_or(source.byte_len);
                    if size > source.byte_len || size > destination.byte_len {
                        return Err(Error::configuration(
                            self.label.as_str(),
                            format!("cannot copy {size} bytes from a {} byte buffer into a {} byte buffer", source.byte_len, destination.byte_len),
                        ));
                    }
                    encoder.copy_buffer_to_buffer(&source.buffer, 0, &destination.buffer, 0, size);
                }
            }
        }
        Ok(())
    }
}

impl<B: Backend> Clone for BlitCommand<B> {
    fn clone(&self) -> Self {
        match self {
            Self::CopyTexture { source, destination } => Self::CopyTexture {
                source: source.clone(),
                destination: destination.clone(),
            },
            Self::CopyTextureRegion { source, destination, copy } => Self::CopyTextureRegion {
                source: source.clone(),
                destination: destination.clone(),
                copy: *copy,
            },
            Self::CopyBuffer { source, destination, size } => Self::CopyBuffer {
                source: source.clone(),
                destination: destination.clone(),
                size: *size,
            },
        }
    }
}

impl<B: Backend> fmt::Debug for BlitCommand<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CopyTexture { source, destination } => f.debug_struct("CopyTexture").field("source", source).field("destination", destination).finish(),
            Self::CopyTextureRegion { source, destination, copy } => f
                .debug_struct("CopyTextureRegion")
                .field("source", source)
                .field("destination", destination)
                .field("copy", copy)
                .finish(),
            Self::CopyBuffer { source, destination, size } => f
                .debug_struct("CopyBuffer")
                .field("source", source)
                .field("destination", destination)
                .field("size", size)
                .finish(),
        }
    }
}

impl<B: Backend> Clone for BlitShader<B> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            commands: self.commands.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for BlitShader<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlitShader").field("label", &self.label).field("commands", &self.commands).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::Command;
    use crate::{BufferUsage, Origin3d, PixelFormat, RecordingBackend, TextureUsage};

    fn texture(label: &str, width: u32, height: u32) -> LazyTexture<RecordingBackend> {
        LazyTexture::new_2d(label, width, height, PixelFormat::Rgba8Unorm, TextureUsage::COPY_SRC | TextureUsage::COPY_DST)
    }

    #[test]
    fn copies_are_encoded_in_order() {
        let backend = RecordingBackend::new();
        let mut blit = BlitShader::new("snapshot")
            .copy_texture(texture("frame", 8, 8), texture("history", 8, 8))
            .copy_buffer(
                LazyBuffer::zeroed::<u32>("counters", 4, BufferUsage::default()),
                LazyBuffer::zeroed::<u32>("counters readback", 4, BufferUsage::COPY_DST | BufferUsage::MAP_READ),
                None,
            );
        let mut encoder = backend.make_command_buffer("copy").unwrap();

        blit.encode(&backend, &mut encoder).unwrap();
        assert!(matches!(encoder.commands(), [Command::CopyTexture { .. }, Command::CopyBuffer { size: 16, .. }]));
    }

    #[test]
    fn mismatched_texture_sizes_are_rejected() {
        let backend = RecordingBackend::new();
        let mut blit = BlitShader::new("snapshot").copy_texture(texture("frame", 8, 8), texture("thumbnail", 4, 4));
        let mut encoder = backend.make_command_buffer("copy").unwrap();
        assert!(matches!(blit.encode(&backend, &mut encoder), Err(Error::Configuration { .. })));
    }

    #[test]
    fn regions_must_fit_both_textures() {
        let backend = RecordingBackend::new();
        let inside = TextureCopy {
            destination_origin: Origin3d { x: 4, y: 4, z: 0 },
            size: Some(Extent3d::new_2d(4, 4)),
            ..TextureCopy::default()
        };
        let outside = TextureCopy {
            destination_origin: Origin3d { x: 6, y: 0, z: 0 },
            ..inside
        };

        let mut encoder = backend.make_command_buffer("copy").unwrap();
        let mut ok = BlitShader::new("tile").copy_texture_region(texture("tile", 4, 4), texture("atlas", 8, 8), inside);
        assert!(ok.encode(&backend, &mut encoder).is_ok());

        let mut bad = BlitShader::new("tile").copy_texture_region(texture("tile", 4, 4), texture("atlas", 8, 8), outside);
        assert!(bad.encode(&backend, &mut encoder).is_err());
    }
}
