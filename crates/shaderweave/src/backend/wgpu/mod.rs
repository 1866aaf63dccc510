//! [`Backend`] implementation on top of wgpu
//!
//! Pipelines are created by entry point name from a [`ShaderLibrary`] of WGSL modules. Slots
//! bound through the encoder map onto WGSL resource bindings by kind and stage:
//!
//! | kind     | group | compute / vertex slot `n` | fragment slot `n` |
//! |----------|-------|---------------------------|-------------------|
//! | buffers  | 0     | `@binding(n)`             | `@binding(16 + n)` |
//! | textures | 1     | `@binding(n)`             | `@binding(16 + n)` |
//! | samplers | 2     | `@binding(n)`             | `@binding(16 + n)` |
//!
//! Bind-group layouts are derived from the bindings each entry point actually uses, so a shader
//! only has to declare what it reads or writes. Device errors raised while creating objects are
//! captured with error scopes and reported as [`BackendError`]s; anything that still escapes is
//! logged rather than aborting the process.

use std::future::Future;

use tracing::{debug, error, info};

use crate::backend::{
    Backend, BackendError, BufferDescriptor, ComputePipelineDescriptor, RenderPassTarget, RenderPipelineDescriptor, SamplerDescriptor, TextureDescriptor, TextureInfo,
};
use crate::submit::Frame;
use crate::{Extent3d, LoadAction, StoreAction};

mod encoder;
mod format;
mod library;

pub use encoder::{BUFFER_GROUP, FRAGMENT_BINDING_OFFSET, SAMPLER_GROUP, TEXTURE_GROUP, WgpuCommandBuffer, WgpuComputePipeline, WgpuRenderPipeline};
pub use library::ShaderLibrary;

use encoder::BindingLayout;

/// Runs `create` inside validation and out-of-memory error scopes
pub(crate) fn scoped<T>(device: &wgpu::Device, create: impl FnOnce() -> T) -> Result<T, BackendError> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    let validation = pollster::block_on(device.pop_error_scope());
    let memory = pollster::block_on(device.pop_error_scope());

    match memory.or(validation) {
        None => Ok(value),
        Some(err @ wgpu::Error::OutOfMemory { .. }) => Err(BackendError::OutOfMemory(err.to_string())),
        Some(err) => Err(BackendError::Validation(err.to_string())),
    }
}

/// Options for acquiring a headless device
#[derive(Debug, Clone)]
pub struct WgpuBackendInit {
    /// Label of the device and prefix of diagnostics
    pub label: String,
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    pub required_features: wgpu::Features,
    pub required_limits: wgpu::Limits,
    /// WGSL modules pipelines are created from
    pub library: ShaderLibrary,
}

impl Default for WgpuBackendInit {
    fn default() -> Self {
        Self {
            label: "shaderweave".to_owned(),
            backends: wgpu::Backends::PRIMARY,
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            library: ShaderLibrary::new(),
        }
    }
}

impl WgpuBackendInit {
    pub fn with_library(mut self, library: ShaderLibrary) -> Self {
        self.library = library;
        self
    }

    pub fn with_features(mut self, features: wgpu::Features) -> Self {
        self.required_features |= features;
        self
    }
}

/// Committed work and the signal raised when the queue finishes it
pub struct WgpuSubmission {
    index: wgpu::SubmissionIndex,
    done: futures_intrusive::channel::shared::OneshotReceiver<()>,
}

/// A wgpu device and queue with a WGSL shader library
pub struct WgpuBackend {
    name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    library: ShaderLibrary,
    modules: Vec<wgpu::ShaderModule>,
}

impl WgpuBackend {
    /// Acquires an adapter and device without any surface
    ///
    /// # Arguments
    /// * `init` - Adapter preference, device requirements and the shader library
    ///
    /// # Returns
    /// The backend, or [`BackendError::Unavailable`] if no suitable adapter or device exists
    pub async fn new_headless(init: WgpuBackendInit) -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: init.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(&init.label),
                required_features: init.required_features,
                required_limits: init.required_limits.clone(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;

        let name = adapter.get_info().name;
        info!(adapter = %name, label = %init.label, "acquired wgpu device");
        Ok(Self::from_device(device, queue).named(name).with_library(init.library))
    }

    /// Wraps a device and queue created elsewhere, for example alongside a window surface
    ///
    /// Uncaptured device errors are routed to `tracing` instead of the default panic handler.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        device.on_uncaptured_error(Box::new(|err| error!(error = %err, "uncaptured wgpu error")));
        Self {
            name: "wgpu".to_owned(),
            device,
            queue,
            library: ShaderLibrary::new(),
            modules: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replaces the shader library and creates a shader module for each of its sources
    pub fn with_library(mut self, library: ShaderLibrary) -> Self {
        self.modules = library
            .modules()
            .iter()
            .map(|module| {
                self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&module.label),
                    source: wgpu::ShaderSource::Wgsl(module.source.as_ref().into()),
                })
            })
            .collect();
        self.library = library;
        self
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn library(&self) -> &ShaderLibrary {
        &self.library
    }

    /// Describes a surface texture as the frame render units inherit
    ///
    /// # Arguments
    /// * `surface_texture` - Texture acquired from the surface for this tick
    /// * `load` - What to do with its previous contents
    ///
    /// # Returns
    /// A frame whose drawable is presented after the submission that renders into it
    pub fn frame(surface_texture: wgpu::SurfaceTexture, load: LoadAction) -> Result<Frame<Self>, BackendError> {
        let format = format::pixel_format(surface_texture.texture.format())
            .ok_or_else(|| BackendError::Validation(format!("surface format {:?} is not supported", surface_texture.texture.format())))?;
        Ok(Frame {
            target: RenderPassTarget {
                texture: surface_texture.texture.clone(),
                format,
                load,
                store: StoreAction::Store,
            },
            drawable: surface_texture,
        })
    }

    fn lookup(&self, name: &str, stage: naga::ShaderStage) -> Result<(&library::EntryPoint, &wgpu::ShaderModule), BackendError> {
        let entry = self
            .library
            .entry_point(name)
            .ok_or_else(|| BackendError::Validation(format!("entry point `{name}` not found in shader library")))?;
        if entry.stage != stage {
            return Err(BackendError::Validation(format!("entry point `{name}` is a {:?} function, not {stage:?}", entry.stage)));
        }
        let module = self
            .modules
            .get(entry.module)
            .ok_or_else(|| BackendError::Validation(format!("shader module of `{name}` was never created")))?;
        Ok((entry, module))
    }
}

impl Backend for WgpuBackend {
    type Buffer = wgpu::Buffer;
    type Texture = wgpu::Texture;
    type Sampler = wgpu::Sampler;
    type ComputePipeline = WgpuComputePipeline;
    type RenderPipeline = WgpuRenderPipeline;
    type CommandBuffer = WgpuCommandBuffer;
    type Drawable = wgpu::SurfaceTexture;
    type Submission = WgpuSubmission;

    fn name(&self) -> &str {
        &self.name
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor<'_>, contents: Option<&[u8]>) -> Result<wgpu::Buffer, BackendError> {
        let size = descriptor
            .size
            .max(contents.map_or(0, |contents| contents.len() as u64))
            .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);

        scoped(&self.device, || {
            let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(descriptor.label),
                size,
                usage: format::buffer_usages(descriptor.usage),
                mapped_at_creation: contents.is_some(),
            });
            if let Some(contents) = contents {
                buffer.slice(..).get_mapped_range_mut()[..contents.len()].copy_from_slice(contents);
                buffer.unmap();
            }
            buffer
        })
    }

    /// Queue writes must be a multiple of four bytes; short tails are zero padded
    fn write_buffer(&self, buffer: &wgpu::Buffer, offset: u64, bytes: &[u8]) -> Result<(), BackendError> {
        let aligned = (bytes.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        if offset.checked_add(aligned).is_none_or(|end| end > buffer.size()) {
            return Err(BackendError::Validation(format!(
                "write of {} bytes at offset {offset} overruns a buffer of {} bytes",
                bytes.len(),
                buffer.size()
            )));
        }
        scoped(&self.device, || {
            if aligned as usize == bytes.len() {
                self.queue.write_buffer(buffer, offset, bytes);
            } else {
                let mut padded = bytes.to_vec();
                padded.resize(aligned as usize, 0);
                self.queue.write_buffer(buffer, offset, &padded);
            }
        })
    }

    fn write_texture(&self, texture: &wgpu::Texture, bytes: &[u8], bytes_per_row: u32, size: Extent3d) -> Result<(), BackendError> {
        scoped(&self.device, || {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytes,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(size.height),
                },
                format::extent(size),
            );
        })
    }

    fn buffer_size(&self, buffer: &wgpu::Buffer) -> u64 {
        buffer.size()
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<wgpu::Texture, BackendError> {
        let format = descriptor.effective_format();
        scoped(&self.device, || {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&descriptor.label),
                size: format::extent(descriptor.size),
                mip_level_count: descriptor.mip_level_count.max(1),
                sample_count: 1,
                dimension: if descriptor.size.depth > 1 {
                    wgpu::TextureDimension::D3
                } else {
                    wgpu::TextureDimension::D2
                },
                format: format::texture_format(format),
                usage: format::texture_usages(descriptor.usage),
                view_formats: &[],
            })
        })
    }

    fn texture_info(&self, texture: &wgpu::Texture) -> Result<TextureInfo, BackendError> {
        let format = format::pixel_format(texture.format()).ok_or_else(|| BackendError::Validation(format!("texture format {:?} is not supported", texture.format())))?;
        Ok(TextureInfo {
            size: format::from_extent(texture.size()),
            format,
            usage: format::texture_usage(texture.usage()),
        })
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<wgpu::Sampler, BackendError> {
        let filter = format::filter_mode(descriptor.filter);
        let address_mode = format::address_mode(descriptor.address_mode);
        scoped(&self.device, || {
            self.device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(&descriptor.label),
                address_mode_u: address_mode,
                address_mode_v: address_mode,
                address_mode_w: address_mode,
                mag_filter: filter,
                min_filter: filter,
                mipmap_filter: wgpu::FilterMode::Nearest,
                lod_min_clamp: 0.0,
                lod_max_clamp: 32.0,
                compare: None,
                anisotropy_clamp: 1,
                border_color: None,
            })
        })
    }

    fn create_compute_pipeline(&self, descriptor: &ComputePipelineDescriptor<'_>) -> Result<WgpuComputePipeline, BackendError> {
        let (entry, module) = self.lookup(descriptor.entry_point, naga::ShaderStage::Compute)?;
        let (layout, pipeline_layout) = BindingLayout::new(&self.device, descriptor.label, [(entry.bindings.as_slice(), wgpu::ShaderStages::COMPUTE)]);
        let constants = descriptor.constants.iter().collect::<Vec<_>>();

        let pipeline = scoped(&self.device, || {
            self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(descriptor.label),
                layout: Some(&pipeline_layout),
                module,
                entry_point: Some(descriptor.entry_point),
                compilation_options: wgpu::PipelineCompilationOptions {
                    constants: &constants,
                    zero_initialize_workgroup_memory: true,
                },
                cache: None,
            })
        })?;
        debug!(pipeline = descriptor.label, entry_point = descriptor.entry_point, workgroup_size = ?entry.workgroup_size, "created compute pipeline");

        Ok(WgpuComputePipeline {
            pipeline,
            layout,
            entry_point: descriptor.entry_point.into(),
            workgroup_size: entry.workgroup_size,
        })
    }

    fn create_render_pipeline(&self, descriptor: &RenderPipelineDescriptor<'_>) -> Result<WgpuRenderPipeline, BackendError> {
        let (vertex, vertex_module) = self.lookup(descriptor.vertex_entry_point, naga::ShaderStage::Vertex)?;
        let (fragment, fragment_module) = self.lookup(descriptor.fragment_entry_point, naga::ShaderStage::Fragment)?;
        let (layout, pipeline_layout) = BindingLayout::new(
            &self.device,
            descriptor.label,
            [
                (vertex.bindings.as_slice(), wgpu::ShaderStages::VERTEX),
                (fragment.bindings.as_slice(), wgpu::ShaderStages::FRAGMENT),
            ],
        );
        let constants = descriptor.constants.iter().collect::<Vec<_>>();
        let compilation_options = wgpu::PipelineCompilationOptions {
            constants: &constants,
            zero_initialize_workgroup_memory: true,
        };

        let pipeline = scoped(&self.device, || {
            self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(descriptor.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: vertex_module,
                    entry_point: Some(descriptor.vertex_entry_point),
                    compilation_options: compilation_options.clone(),
                    buffers: &[],
                },
                primitive: wgpu::PrimitiveState {
                    topology: format::topology(descriptor.topology),
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: fragment_module,
                    entry_point: Some(descriptor.fragment_entry_point),
                    compilation_options: compilation_options.clone(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: format::texture_format(descriptor.color_format),
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                multiview: None,
                cache: None,
            })
        })?;
        debug!(pipeline = descriptor.label, format = ?descriptor.color_format, "created render pipeline");

        Ok(WgpuRenderPipeline { pipeline, layout })
    }

    fn make_command_buffer(&self, label: &str) -> Result<WgpuCommandBuffer, BackendError> {
        Ok(WgpuCommandBuffer::new(self.device.clone(), label))
    }

    fn commit(&self, command_buffer: WgpuCommandBuffer, present: Option<wgpu::SurfaceTexture>) -> Result<WgpuSubmission, BackendError> {
        let index = scoped(&self.device, || self.queue.submit(std::iter::once(command_buffer.finish())))?;

        let (sender, done) = futures_intrusive::channel::shared::oneshot_channel();
        self.queue.on_submitted_work_done(move || {
            let _ = sender.send(());
        });

        if let Some(drawable) = present {
            drawable.present();
        }
        Ok(WgpuSubmission { index, done })
    }

    /// Polls the device on the blocking pool until the submission has executed
    fn wait_until_completed(&self, submission: WgpuSubmission) -> impl Future<Output = Result<(), BackendError>> + Send {
        let device = self.device.clone();
        async move {
            let WgpuSubmission { index, done } = submission;
            tokio::task::spawn_blocking(move || device.poll(wgpu::PollType::WaitForSubmissionIndex(index)))
                .await
                .map_err(|err| BackendError::Lost(err.to_string()))?
                .map_err(|err| BackendError::Lost(err.to_string()))?;
            done.receive().await.ok_or_else(|| BackendError::Lost("queue dropped the completion callback".to_owned()))
        }
    }
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("name", &self.name)
            .field("entry_points", &self.library.entry_points().count())
            .finish_non_exhaustive()
    }
}
