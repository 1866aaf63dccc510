//! In-memory backend that records every call instead of talking to a GPU
//!
//! Creation primitives hand out numbered handles and are logged with their label, so callers can
//! assert how often a resource was materialised. Encode calls are collected per command buffer
//! and appended to the shared command log when the buffer is committed. Failures such as an
//! exhausted memory budget, an unknown entry point or a queue that has no command buffer left can
//! be injected to exercise the error paths of the engine.

use std::collections::{HashMap, HashSet};
use std::future::{Future, ready};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    Backend, BackendError, BufferDescriptor, CommandEncoder, ComputePipelineDescriptor, RenderPassTarget, RenderPipelineDescriptor, SamplerDescriptor, TextureCopy,
    TextureDescriptor, TextureInfo,
};
use crate::{Extent3d, PixelFormat, PrimitiveTopology, Stage};

/// Buffer handle issued by [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBuffer {
    pub id: u64,
    pub label: Arc<str>,
    pub size: u64,
}

/// Texture handle issued by [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTexture {
    pub id: u64,
    pub label: Arc<str>,
    pub info: TextureInfo,
}

/// Sampler or pipeline handle issued by [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedObject {
    pub id: u64,
    pub label: Arc<str>,
}

/// Stand-in for a swap-chain image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDrawable {
    pub texture: RecordedTexture,
}

/// A creation primitive invocation
#[derive(Debug, Clone, PartialEq)]
pub enum Creation {
    Buffer { label: String, size: u64 },
    Texture { label: String, size: Extent3d, format: PixelFormat },
    Sampler { label: String },
    ComputePipeline { label: String, entry_point: String },
    RenderPipeline { label: String, vertex: String, fragment: String, format: PixelFormat },
}

impl Creation {
    /// Label the object was created with
    pub fn label(&self) -> &str {
        match self {
            Self::Buffer { label, .. }
            | Self::Texture { label, .. }
            | Self::Sampler { label }
            | Self::ComputePipeline { label, .. }
            | Self::RenderPipeline { label, .. } => label,
        }
    }
}

/// An encode call, in the order it reached a command buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginCompute { label: String, pipeline: u64 },
    BeginRender { label: String, pipeline: u64, target: u64, format: PixelFormat },
    SetBuffer { stage: Stage, slot: u32, buffer: u64 },
    SetBytes { stage: Stage, slot: u32, bytes: Vec<u8> },
    SetTexture { stage: Stage, slot: u32, texture: u64 },
    SetSampler { stage: Stage, slot: u32, sampler: u64 },
    Dispatch { thread_groups: Extent3d, threads_per_group: Extent3d },
    Draw { topology: PrimitiveTopology, vertices: Range<u32>, instances: Range<u32> },
    EndPass,
    CopyTexture { source: u64, destination: u64, copy: TextureCopy },
    CopyBuffer { source: u64, destination: u64, size: u64 },
    Commit { label: String, presented: Option<u64> },
}

#[derive(Debug, Default)]
struct State {
    entry_points: Option<HashSet<String>>,
    memory_limit: Option<u64>,
    allocated: u64,
    unavailable_command_buffers: usize,
    creations: Vec<Creation>,
    commands: Vec<Command>,
    buffer_contents: HashMap<u64, Vec<u8>>,
    texture_contents: HashMap<u64, Vec<u8>>,
    submissions: u64,
}

/// Headless [`Backend`] that records creations and encode calls
#[derive(Debug, Default)]
pub struct RecordingBackend {
    state: Mutex<State>,
    next_id: AtomicU64,
}

impl RecordingBackend {
    /// A backend that accepts every entry point and has unlimited memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the shader library to the given entry points; others fail validation
    pub fn with_entry_points<I, S>(self, entry_points: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().entry_points = Some(entry_points.into_iter().map(Into::into).collect());
        self
    }

    /// Caps the total bytes of buffers and textures that may be allocated
    pub fn with_memory_limit(self, bytes: u64) -> Self {
        self.lock().memory_limit = Some(bytes);
        self
    }

    /// Makes the next `count` calls to `make_command_buffer` fail as unavailable
    pub fn fail_next_command_buffers(&self, count: usize) {
        self.lock().unavailable_command_buffers = count;
    }

    /// Every creation primitive invoked so far
    pub fn creations(&self) -> Vec<Creation> {
        self.lock().creations.clone()
    }

    /// How many objects were created with the given label
    pub fn creation_count(&self, label: &str) -> usize {
        self.lock().creations.iter().filter(|creation| creation.label() == label).count()
    }

    /// Every committed encode call, in submission order
    pub fn commands(&self) -> Vec<Command> {
        self.lock().commands.clone()
    }

    /// Labels of the passes that reached a committed command buffer, in encode order
    pub fn pass_labels(&self) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter_map(|command| match command {
                Command::BeginCompute { label, .. } | Command::BeginRender { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of committed command buffers
    pub fn submission_count(&self) -> u64 {
        self.lock().submissions
    }

    /// Current CPU-side contents of a buffer
    pub fn buffer_contents(&self, buffer: &RecordedBuffer) -> Vec<u8> {
        self.lock().buffer_contents.get(&buffer.id).cloned().unwrap_or_default()
    }

    /// Texel bytes last uploaded into a texture, empty if it was never written
    pub fn texture_contents(&self, texture: &RecordedTexture) -> Vec<u8> {
        self.lock().texture_contents.get(&texture.id).cloned().unwrap_or_default()
    }

    /// Forgets recorded creations and commands while keeping issued handles valid
    pub fn clear_log(&self) {
        let mut state = self.lock();
        state.creations.clear();
        state.commands.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // The state is plain data; a panic in another thread cannot leave it half-updated.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn allocate(state: &mut State, label: &str, bytes: u64) -> Result<(), BackendError> {
        let limit = state.memory_limit.unwrap_or(u64::MAX);
        match state.allocated.checked_add(bytes) {
            Some(total) if total <= limit => {
                state.allocated = total;
                Ok(())
            }
            _ => Err(BackendError::OutOfMemory(format!("{label} needs {bytes} bytes, {} of {limit} already in use", state.allocated))),
        }
    }

    fn check_entry_point(state: &State, name: &str) -> Result<(), BackendError> {
        match &state.entry_points {
            Some(known) if !known.contains(name) => Err(BackendError::Validation(format!("entry point `{name}` not found in shader library"))),
            _ => Ok(()),
        }
    }
}

impl Backend for RecordingBackend {
    type Buffer = RecordedBuffer;
    type Texture = RecordedTexture;
    type Sampler = RecordedObject;
    type ComputePipeline = RecordedObject;
    type RenderPipeline = RecordedObject;
    type CommandBuffer = RecordingCommandBuffer;
    type Drawable = RecordedDrawable;
    type Submission = u64;

    fn name(&self) -> &str {
        "recording"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor<'_>, contents: Option<&[u8]>) -> Result<Self::Buffer, BackendError> {
        let mut state = self.lock();
        Self::allocate(&mut state, descriptor.label, descriptor.size)?;

        let id = self.next_id();
        let mut bytes = vec![0u8; descriptor.size as usize];
        if let Some(contents) = contents {
            let len = contents.len().min(bytes.len());
            bytes[..len].copy_from_slice(&contents[..len]);
        }
        state.buffer_contents.insert(id, bytes);
        state.creations.push(Creation::Buffer {
            label: descriptor.label.to_owned(),
            size: descriptor.size,
        });

        Ok(RecordedBuffer {
            id,
            label: descriptor.label.into(),
            size: descriptor.size,
        })
    }

    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, bytes: &[u8]) -> Result<(), BackendError> {
        let mut state = self.lock();
        let contents = state
            .buffer_contents
            .get_mut(&buffer.id)
            .ok_or_else(|| BackendError::Validation(format!("buffer `{}` was not created by this backend", buffer.label)))?;
        let range = usize::try_from(offset)
            .ok()
            .and_then(|start| Some(start..start.checked_add(bytes.len())?))
            .filter(|range| range.end <= contents.len())
            .ok_or_else(|| BackendError::Validation(format!("write of {} bytes at offset {offset} overruns buffer `{}` of {} bytes", bytes.len(), buffer.label, contents.len())))?;
        contents[range].copy_from_slice(bytes);
        Ok(())
    }

    fn buffer_size(&self, buffer: &Self::Buffer) -> u64 {
        buffer.size
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<Self::Texture, BackendError> {
        if descriptor.size.is_empty() {
            return Err(BackendError::Validation(format!("texture size {:?} has a zero axis", descriptor.size)));
        }

        let format = descriptor.effective_format();
        let size = descriptor.size;
        let bytes = u64::from(size.width) * u64::from(size.height) * u64::from(size.depth) * u64::from(format.bytes_per_pixel());

        let mut state = self.lock();
        Self::allocate(&mut state, &descriptor.label, bytes)?;
        state.creations.push(Creation::Texture {
            label: descriptor.label.clone(),
            size,
            format,
        });

        Ok(RecordedTexture {
            id: self.next_id(),
            label: descriptor.label.as_str().into(),
            info: TextureInfo {
                size,
                format,
                usage: descriptor.usage,
            },
        })
    }

    fn write_texture(&self, texture: &Self::Texture, bytes: &[u8], bytes_per_row: u32, size: Extent3d) -> Result<(), BackendError> {
        if size.width > texture.info.size.width || size.height > texture.info.size.height || size.depth > texture.info.size.depth {
            return Err(BackendError::Validation(format!("upload of {size:?} does not fit texture `{}` of {:?}", texture.label, texture.info.size)));
        }
        let row = u64::from(size.width) * u64::from(texture.info.format.bytes_per_pixel());
        let expected = u64::from(bytes_per_row) * u64::from(size.height) * u64::from(size.depth);
        if u64::from(bytes_per_row) < row || bytes.len() as u64 != expected {
            return Err(BackendError::Validation(format!(
                "{} bytes with {bytes_per_row} bytes per row do not describe {size:?} texels of {:?}",
                bytes.len(),
                texture.info.format
            )));
        }
        self.lock().texture_contents.insert(texture.id, bytes.to_vec());
        Ok(())
    }

    fn texture_info(&self, texture: &Self::Texture) -> Result<TextureInfo, BackendError> {
        Ok(texture.info)
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<Self::Sampler, BackendError> {
        self.lock().creations.push(Creation::Sampler { label: descriptor.label.clone() });
        Ok(RecordedObject {
            id: self.next_id(),
            label: descriptor.label.as_str().into(),
        })
    }

    fn create_compute_pipeline(&self, descriptor: &ComputePipelineDescriptor<'_>) -> Result<Self::ComputePipeline, BackendError> {
        let mut state = self.lock();
        Self::check_entry_point(&state, descriptor.entry_point)?;
        state.creations.push(Creation::ComputePipeline {
            label: descriptor.label.to_owned(),
            entry_point: descriptor.entry_point.to_owned(),
        });

        Ok(RecordedObject {
            id: self.next_id(),
            label: descriptor.label.into(),
        })
    }

    fn create_render_pipeline(&self, descriptor: &RenderPipelineDescriptor<'_>) -> Result<Self::RenderPipeline, BackendError> {
        let mut state = self.lock();
        Self::check_entry_point(&state, descriptor.vertex_entry_point)?;
        Self::check_entry_point(&state, descriptor.fragment_entry_point)?;
        state.creations.push(Creation::RenderPipeline {
            label: descriptor.label.to_owned(),
            vertex: descriptor.vertex_entry_point.to_owned(),
            fragment: descriptor.fragment_entry_point.to_owned(),
            format: descriptor.color_format,
        });

        Ok(RecordedObject {
            id: self.next_id(),
            label: descriptor.label.into(),
        })
    }

    fn make_command_buffer(&self, label: &str) -> Result<Self::CommandBuffer, BackendError> {
        let mut state = self.lock();
        if state.unavailable_command_buffers > 0 {
            state.unavailable_command_buffers -= 1;
            return Err(BackendError::Unavailable("command queue has no free command buffer".into()));
        }

        Ok(RecordingCommandBuffer {
            label: label.to_owned(),
            commands: Vec::new(),
            open_pass: false,
        })
    }

    fn commit(&self, command_buffer: Self::CommandBuffer, present: Option<Self::Drawable>) -> Result<Self::Submission, BackendError> {
        let mut state = self.lock();
        state.commands.extend(command_buffer.commands);
        state.commands.push(Command::Commit {
            label: command_buffer.label,
            presented: present.map(|drawable| drawable.texture.id),
        });
        state.submissions += 1;
        Ok(state.submissions)
    }

    fn wait_until_completed(&self, _submission: Self::Submission) -> impl Future<Output = Result<(), BackendError>> + Send {
        ready(Ok(()))
    }
}

/// Command buffer of a [`RecordingBackend`]
#[derive(Debug)]
pub struct RecordingCommandBuffer {
    label: String,
    commands: Vec<Command>,
    open_pass: bool,
}

impl RecordingCommandBuffer {
    /// Commands encoded so far, before commit
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

impl CommandEncoder<RecordingBackend> for RecordingCommandBuffer {
    fn begin_compute_pass(&mut self, label: &str, pipeline: &RecordedObject) {
        self.open_pass = true;
        self.commands.push(Command::BeginCompute {
            label: label.to_owned(),
            pipeline: pipeline.id,
        });
    }

    fn begin_render_pass(&mut self, label: &str, target: &RenderPassTarget<RecordingBackend>, pipeline: &RecordedObject) {
        self.open_pass = true;
        self.commands.push(Command::BeginRender {
            label: label.to_owned(),
            pipeline: pipeline.id,
            target: target.texture.id,
            format: target.format,
        });
    }

    fn set_buffer(&mut self, stage: Stage, slot: u32, buffer: &RecordedBuffer) {
        self.commands.push(Command::SetBuffer { stage, slot, buffer: buffer.id });
    }

    fn set_bytes(&mut self, stage: Stage, slot: u32, bytes: &[u8]) {
        self.commands.push(Command::SetBytes {
            stage,
            slot,
            bytes: bytes.to_vec(),
        });
    }

    fn set_texture(&mut self, stage: Stage, slot: u32, texture: &RecordedTexture) {
        self.commands.push(Command::SetTexture { stage, slot, texture: texture.id });
    }

    fn set_sampler(&mut self, stage: Stage, slot: u32, sampler: &RecordedObject) {
        self.commands.push(Command::SetSampler { stage, slot, sampler: sampler.id });
    }

    fn dispatch(&mut self, thread_groups: Extent3d, threads_per_group: Extent3d) -> Result<(), BackendError> {
        if !self.open_pass {
            return Err(BackendError::Validation("dispatch issued outside a compute pass".into()));
        }
        self.commands.push(Command::Dispatch { thread_groups, threads_per_group });
        Ok(())
    }

    fn draw(&mut self, topology: PrimitiveTopology, vertices: Range<u32>, instances: Range<u32>) -> Result<(), BackendError> {
        if !self.open_pass {
            return Err(BackendError::Validation("draw issued outside a render pass".into()));
        }
        self.commands.push(Command::Draw { topology, vertices, instances });
        Ok(())
    }

    fn end_pass(&mut self) {
        self.open_pass = false;
        self.commands.push(Command::EndPass);
    }

    fn copy_texture_to_texture(&mut self, source: &RecordedTexture, destination: &RecordedTexture, copy: &TextureCopy) {
        self.commands.push(Command::CopyTexture {
            source: source.id,
            destination: destination.id,
            copy: *copy,
        });
    }

    fn copy_buffer_to_buffer(&mut self, source: &RecordedBuffer, _source_offset: u64, destination: &RecordedBuffer, _destination_offset: u64, size: u64) {
        self.commands.push(Command::CopyBuffer {
            source: source.id,
            destination: destination.id,
            size,
        });
    }
}
