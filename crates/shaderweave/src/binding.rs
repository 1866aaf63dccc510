//! Positional binding lists for one shader stage
//!
//! The index of an entry is its binding slot. Encoding a list resolves each lazy entry in place,
//! so the second encode of the same list binds cached handles without calling the backend's
//! creation primitives again. Inline constants are pushed with `set_bytes` on every encode.

use std::fmt;
use std::ops::{Index, IndexMut};

use crate::backend::{Backend, CommandEncoder};
use crate::resource::{BufferHandle, ConstantBytes, LazyBuffer, LazySampler, LazyTexture};
use crate::{Error, Result, Stage};

/// An entry of a [`BufferList`]
pub enum BufferBinding<B: Backend> {
    /// Addressable GPU memory
    Resource(LazyBuffer<B>),
    /// Encoder-local constant data without backing memory
    Constant(ConstantBytes),
}

impl<B: Backend> BufferBinding<B> {
    pub fn label(&self) -> &str {
        match self {
            Self::Resource(buffer) => buffer.label(),
            Self::Constant(constant) => constant.label(),
        }
    }

    /// Resolves the backing buffer
    ///
    /// Inline constants have no backing memory and yield [`Error::NoBackingMemory`].
    pub fn buffer(&mut self, backend: &B) -> Result<&BufferHandle<B::Buffer>> {
        match self {
            Self::Resource(buffer) => buffer.resolve(backend),
            Self::Constant(constant) => Err(Error::NoBackingMemory {
                object: constant.label().to_owned(),
            }),
        }
    }

    /// Binds the entry at `slot`, resolving it first if needed
    pub fn encode(&mut self, backend: &B, encoder: &mut B::CommandBuffer, stage: Stage, slot: u32) -> Result<()> {
        match self {
            Self::Resource(buffer) => {
                buffer.resolve(backend)?;
                let handle = buffer.handle()?;
                if let Some(host) = &handle.host {
                    host.with(|bytes| upload_host_bytes(backend, buffer.label(), handle, bytes))?;
                }
                encoder.set_buffer(stage, slot, &handle.buffer);
            }
            Self::Constant(constant) => constant.with_bytes(|bytes| encoder.set_bytes(stage, slot, bytes)),
        }
        Ok(())
    }
}

/// Host bytes may shrink after the buffer was sized, never grow past it
fn check_host_len<T>(label: &str, handle: &BufferHandle<T>, len: usize) -> Result<()> {
    if len as u64 > handle.byte_len {
        return Err(Error::configuration(label, format!("host bytes grew to {len} bytes but the buffer holds {}", handle.byte_len)));
    }
    Ok(())
}

fn upload_host_bytes<B: Backend>(backend: &B, label: &str, handle: &BufferHandle<B::Buffer>, bytes: &[u8]) -> Result<()> {
    check_host_len(label, handle, bytes.len())?;
    backend.write_buffer(&handle.buffer, 0, bytes).map_err(|err| Error::from_backend(label, err))
}

impl<B: Backend> Clone for BufferBinding<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Resource(buffer) => Self::Resource(buffer.clone()),
            Self::Constant(constant) => Self::Constant(constant.clone()),
        }
    }
}

impl<B: Backend> fmt::Debug for BufferBinding<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(buffer) => f.debug_tuple("Resource").field(buffer).finish(),
            Self::Constant(constant) => f.debug_tuple("Constant").field(constant).finish(),
        }
    }
}

impl<B: Backend> From<LazyBuffer<B>> for BufferBinding<B> {
    fn from(buffer: LazyBuffer<B>) -> Self {
        Self::Resource(buffer)
    }
}

impl<B: Backend> From<ConstantBytes> for BufferBinding<B> {
    fn from(constant: ConstantBytes) -> Self {
        Self::Constant(constant)
    }
}

/// Generates an ordered list type whose index is the binding slot
macro_rules! binding_list {
    ($(#[$meta:meta])* $name:ident, $entry:ty) => {
        $(#[$meta])*
        pub struct $name<B: Backend>(Vec<$entry>);

        impl<B: Backend> $name<B> {
            pub fn new() -> Self {
                Self(Vec::new())
            }

            /// Appends an entry at the next slot
            pub fn push(&mut self, entry: impl Into<$entry>) {
                self.0.push(entry.into());
            }

            /// Builder-style [`Self::push`]
            pub fn with(mut self, entry: impl Into<$entry>) -> Self {
                self.push(entry);
                self
            }

            pub fn get(&self, slot: usize) -> Option<&$entry> {
                self.0.get(slot)
            }

            pub fn get_mut(&mut self, slot: usize) -> Option<&mut $entry> {
                self.0.get_mut(slot)
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            pub fn iter(&self) -> std::slice::Iter<'_, $entry> {
                self.0.iter()
            }
        }

        impl<B: Backend> Clone for $name<B> {
            fn clone(&self) -> Self {
                Self(self.0.clone())
            }
        }

        impl<B: Backend> fmt::Debug for $name<B> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_list().entries(&self.0).finish()
            }
        }

        impl<B: Backend> Default for $name<B> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<B: Backend> Index<usize> for $name<B> {
            type Output = $entry;

            fn index(&self, slot: usize) -> &$entry {
                &self.0[slot]
            }
        }

        impl<B: Backend> IndexMut<usize> for $name<B> {
            fn index_mut(&mut self, slot: usize) -> &mut $entry {
                &mut self.0[slot]
            }
        }

        impl<B: Backend, E: Into<$entry>> FromIterator<E> for $name<B> {
            fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
                Self(iter.into_iter().map(Into::into).collect())
            }
        }

        impl<B: Backend> From<Vec<$entry>> for $name<B> {
            fn from(entries: Vec<$entry>) -> Self {
                Self(entries)
            }
        }
    };
}

binding_list!(
    /// Buffers and inline constants, one per slot
    BufferList,
    BufferBinding<B>
);
binding_list!(
    /// Textures, one per slot
    TextureList,
    LazyTexture<B>
);
binding_list!(
    /// Samplers, one per slot
    SamplerList,
    LazySampler<B>
);

fn slot_index(slot: usize) -> u32 {
    u32::try_from(slot).unwrap_or(u32::MAX)
}

impl<B: Backend> BufferList<B> {
    /// Resolves and binds every entry, in slot order
    pub fn encode_all(&mut self, backend: &B, encoder: &mut B::CommandBuffer, stage: Stage) -> Result<()> {
        for (slot, binding) in self.0.iter_mut().enumerate() {
            binding.encode(backend, encoder, stage, slot_index(slot))?;
        }
        Ok(())
    }

    /// Resolves every addressable buffer without encoding anything
    ///
    /// Host-backed buffers whose bytes no longer fit are reported here as well.
    pub fn resolve_all(&mut self, backend: &B) -> Result<()> {
        for binding in &mut self.0 {
            if let BufferBinding::Resource(buffer) = binding {
                buffer.resolve(backend)?;
                let handle = buffer.handle()?;
                if let Some(host) = &handle.host {
                    check_host_len(buffer.label(), handle, host.len())?;
                }
            }
        }
        Ok(())
    }
}

impl<B: Backend> TextureList<B> {
    /// Resolves and binds every entry, in slot order
    pub fn encode_all(&mut self, backend: &B, encoder: &mut B::CommandBuffer, stage: Stage) -> Result<()> {
        for (slot, texture) in self.0.iter_mut().enumerate() {
            let handle = texture.resolve(backend)?;
            encoder.set_texture(stage, slot_index(slot), &handle.texture);
        }
        Ok(())
    }

    pub fn resolve_all(&mut self, backend: &B) -> Result<()> {
        for texture in &mut self.0 {
            texture.resolve(backend)?;
        }
        Ok(())
    }
}

impl<B: Backend> SamplerList<B> {
    /// Resolves and binds every entry, in slot order
    pub fn encode_all(&mut self, backend: &B, encoder: &mut B::CommandBuffer, stage: Stage) -> Result<()> {
        for (slot, sampler) in self.0.iter_mut().enumerate() {
            let sampler = sampler.resolve(backend)?;
            encoder.set_sampler(stage, slot_index(slot), sampler);
        }
        Ok(())
    }

    pub fn resolve_all(&mut self, backend: &B) -> Result<()> {
        for sampler in &mut self.0 {
            sampler.resolve(backend)?;
        }
        Ok(())
    }
}

/// Textures, buffers and samplers bound to one shader stage
pub struct StageBindings<B: Backend> {
    pub textures: TextureList<B>,
    pub buffers: BufferList<B>,
    pub samplers: SamplerList<B>,
}

impl<B: Backend> StageBindings<B> {
    pub fn new() -> Self {
        Self {
            textures: TextureList::new(),
            buffers: BufferList::new(),
            samplers: SamplerList::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.buffers.is_empty() && self.samplers.is_empty()
    }

    /// Binds textures, then buffers, then samplers for `stage`
    pub fn encode_all(&mut self, backend: &B, encoder: &mut B::CommandBuffer, stage: Stage) -> Result<()> {
        self.textures.encode_all(backend, encoder, stage)?;
        self.buffers.encode_all(backend, encoder, stage)?;
        self.samplers.encode_all(backend, encoder, stage)
    }

    /// Materialises every lazy entry without encoding
    pub fn resolve_all(&mut self, backend: &B) -> Result<()> {
        self.textures.resolve_all(backend)?;
        self.buffers.resolve_all(backend)?;
        self.samplers.resolve_all(backend)
    }
}

impl<B: Backend> Clone for StageBindings<B> {
    fn clone(&self) -> Self {
        Self {
            textures: self.textures.clone(),
            buffers: self.buffers.clone(),
            samplers: self.samplers.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for StageBindings<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageBindings")
            .field("textures", &self.textures)
            .field("buffers", &self.buffers)
            .field("samplers", &self.samplers)
            .finish()
    }
}

impl<B: Backend> Default for StageBindings<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::Command;
    use crate::resource::Uniform;
    use crate::{BufferUsage, PixelFormat, RecordingBackend, TextureUsage};

    fn bindings() -> StageBindings<RecordingBackend> {
        StageBindings {
            textures: TextureList::new()
                .with(LazyTexture::new_2d("input", 8, 8, PixelFormat::Rgba8Unorm, TextureUsage::SHADER_READ))
                .with(LazyTexture::new_2d("output", 8, 8, PixelFormat::Rgba8Unorm, TextureUsage::READ_WRITE)),
            buffers: BufferList::new()
                .with(LazyBuffer::from_slice("weights", &[0.25f32; 4], BufferUsage::STORAGE))
                .with(ConstantBytes::from_value("exposure", &1.5f32)),
            samplers: SamplerList::new().with(LazySampler::linear("bilinear")),
        }
    }

    #[test]
    fn second_encode_reuses_resolved_handles() {
        let backend = RecordingBackend::new();
        let mut bindings = bindings();

        for _ in 0..2 {
            let mut encoder = backend.make_command_buffer("bind").unwrap();
            bindings.encode_all(&backend, &mut encoder, Stage::Compute).unwrap();
            backend.commit(encoder, None).unwrap();
        }

        assert_eq!(backend.creations().len(), 4);
        let set_bytes = backend.commands().iter().filter(|command| matches!(command, Command::SetBytes { .. })).count();
        assert_eq!(set_bytes, 2);
    }

    #[test]
    fn slots_follow_list_positions() {
        let backend = RecordingBackend::new();
        let mut bindings = bindings();
        let mut encoder = backend.make_command_buffer("bind").unwrap();
        bindings.encode_all(&backend, &mut encoder, Stage::Fragment).unwrap();

        let slots: Vec<_> = encoder
            .commands()
            .iter()
            .map(|command| match command {
                Command::SetTexture { slot, .. } => ("texture", *slot),
                Command::SetBuffer { slot, .. } => ("buffer", *slot),
                Command::SetBytes { slot, .. } => ("bytes", *slot),
                Command::SetSampler { slot, .. } => ("sampler", *slot),
                other => panic!("unexpected command {other:?}"),
            })
            .collect();
        assert_eq!(slots, [("texture", 0), ("texture", 1), ("buffer", 0), ("bytes", 1), ("sampler", 0)]);
    }

    #[test]
    fn constants_have_no_backing_buffer() {
        let backend = RecordingBackend::new();
        let mut bindings = bindings();

        assert!(bindings.buffers[0].buffer(&backend).is_ok());
        match bindings.buffers[1].buffer(&backend) {
            Err(Error::NoBackingMemory { object }) => assert_eq!(object, "exposure"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn host_buffers_upload_the_latest_value_on_encode() {
        let backend = RecordingBackend::new();
        let params = Uniform::new(1u32);
        let mut buffers = BufferList::<RecordingBackend>::new().with(LazyBuffer::from_uniform("params", &params, BufferUsage::UNIFORM));

        let mut encoder = backend.make_command_buffer("frame").unwrap();
        params.set(42);
        buffers.encode_all(&backend, &mut encoder, Stage::Compute).unwrap();

        let handle = buffers[0].buffer(&backend).unwrap();
        assert_eq!(backend.buffer_contents(&handle.buffer), 42u32.to_ne_bytes());
    }

    #[test]
    fn host_bytes_that_outgrow_their_buffer_are_rejected() {
        let backend = RecordingBackend::new();
        let params = Uniform::new([1.0f32; 4]);
        let mut buffers = BufferList::<RecordingBackend>::new().with(LazyBuffer::from_uniform("params", &params, BufferUsage::UNIFORM));

        let mut encoder = backend.make_command_buffer("frame").unwrap();
        buffers.encode_all(&backend, &mut encoder, Stage::Compute).unwrap();
        params.host_bytes().replace(&[0xff; 64]);

        let mut encoder = backend.make_command_buffer("frame").unwrap();
        let err = buffers.encode_all(&backend, &mut encoder, Stage::Compute).unwrap_err();
        assert!(matches!(err, Error::Configuration { ref object, .. } if object == "params"), "{err}");
        assert!(encoder.commands().is_empty());

        let handle = buffers[0].buffer(&backend).unwrap();
        assert_eq!(backend.buffer_contents(&handle.buffer), bytemuck::bytes_of(&[1.0f32; 4]));
    }

    #[test]
    fn resolution_failures_propagate_with_the_resource_name() {
        let backend = RecordingBackend::new().with_memory_limit(16);
        let mut textures = TextureList::<RecordingBackend>::new().with(LazyTexture::new_2d("huge", 1024, 1024, PixelFormat::Rgba32Float, TextureUsage::SHADER_READ));
        let mut encoder = backend.make_command_buffer("frame").unwrap();

        match textures.encode_all(&backend, &mut encoder, Stage::Compute) {
            Err(Error::ResourceExhausted { object, .. }) => assert_eq!(object, "huge"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(encoder.commands().is_empty());
    }
}
