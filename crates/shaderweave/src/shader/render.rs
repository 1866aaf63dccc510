//! Render pass units
//!
//! The compiled pipeline state is cached once, while the render target the pass draws into is
//! re-bound on every encode: it can be a fixed attachment, a texture created on first use, or the
//! frame target handed in by the caller for this submission.

use std::fmt;
use std::ops::Range;

use tracing::trace;

use super::EncodeContext;
use crate::backend::{Backend, CommandEncoder, RenderPassTarget};
use crate::binding::{BufferBinding, StageBindings};
use crate::pipeline::{RenderFunction, RenderPipeline};
use crate::resource::{LazySampler, LazyTexture};
use crate::{ClearColor, Error, LoadAction, Result, Stage, StoreAction};

/// Colour attachment a render unit draws into
pub enum RenderTarget<B: Backend> {
    /// A fixed attachment
    Custom(RenderPassTarget<B>),
    /// A texture created on first use
    Future { texture: LazyTexture<B>, load: LoadAction, store: StoreAction },
    /// Whatever frame target the submission supplies
    Inherit,
}

impl<B: Backend> RenderTarget<B> {
    /// Draws into `texture`, clearing it to `clear` first
    pub fn cleared(texture: LazyTexture<B>, clear: ClearColor) -> Self {
        Self::Future {
            texture,
            load: LoadAction::Clear(clear),
            store: StoreAction::Store,
        }
    }

    fn working_target(&mut self, backend: &B, context: &EncodeContext<'_, B>, unit: &str) -> Result<RenderPassTarget<B>> {
        match self {
            Self::Custom(target) => Ok(target.clone()),
            Self::Future { texture, load, store } => {
                let handle = texture.resolve(backend)?;
                Ok(RenderPassTarget {
                    texture: handle.texture.clone(),
                    format: handle.format(),
                    load: *load,
                    store: *store,
                })
            }
            Self::Inherit => context
                .frame_target
                .cloned()
                .ok_or_else(|| Error::configuration(unit, "renders into the frame target, but the submission has no frame")),
        }
    }
}

/// A render pipeline, per-stage bindings, a render target and the vertex range to draw
pub struct RenderShader<B: Backend> {
    label: String,
    pipeline: RenderPipeline<B>,
    vertex: StageBindings<B>,
    fragment: StageBindings<B>,
    target: RenderTarget<B>,
    vertices: Range<u32>,
    instances: Range<u32>,
}

impl<B: Backend> RenderShader<B> {
    /// A unit drawing a full-screen triangle into the frame target
    pub fn new(label: impl Into<String>, function: RenderFunction<B>) -> Self {
        Self {
            label: label.into(),
            pipeline: RenderPipeline::new(function),
            vertex: StageBindings::new(),
            fragment: StageBindings::new(),
            target: RenderTarget::Inherit,
            vertices: 0..3,
            instances: 0..1,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn target(mut self, target: RenderTarget<B>) -> Self {
        self.target = target;
        self
    }

    pub fn vertices(mut self, vertices: Range<u32>) -> Self {
        self.vertices = vertices;
        self
    }

    pub fn instances(mut self, instances: Range<u32>) -> Self {
        self.instances = instances;
        self
    }

    pub fn vertex_buffer(mut self, buffer: impl Into<BufferBinding<B>>) -> Self {
        self.vertex.buffers.push(buffer);
        self
    }

    pub fn fragment_texture(mut self, texture: LazyTexture<B>) -> Self {
        self.fragment.textures.push(texture);
        self
    }

    pub fn fragment_buffer(mut self, buffer: impl Into<BufferBinding<B>>) -> Self {
        self.fragment.buffers.push(buffer);
        self
    }

    pub fn fragment_sampler(mut self, sampler: LazySampler<B>) -> Self {
        self.fragment.samplers.push(sampler);
        self
    }

    pub fn vertex_bindings(mut self, bindings: StageBindings<B>) -> Self {
        self.vertex = bindings;
        self
    }

    pub fn fragment_bindings(mut self, bindings: StageBindings<B>) -> Self {
        self.fragment = bindings;
        self
    }

    pub fn is_compiled(&self) -> bool {
        self.pipeline.is_resolved()
    }

    /// Creates every bound resource, and compiles the pipeline if its colour format is known
    ///
    /// A unit that inherits the frame target compiles on its first encode instead.
    pub fn prepare(&mut self, backend: &B) -> Result<()> {
        self.vertex.resolve_all(backend)?;
        self.fragment.resolve_all(backend)?;
        match &mut self.target {
            RenderTarget::Inherit => {}
            target => {
                let working = target.working_target(backend, &EncodeContext::default(), &self.label)?;
                self.compile_for(backend, &working)?;
            }
        }
        Ok(())
    }

    fn compile_for(&mut self, backend: &B, target: &RenderPassTarget<B>) -> Result<()> {
        if let Some(function) = self.pipeline.description_mut() {
            function.set_target_format(target.format);
        }

        let compiled = self.pipeline.resolve(backend)?.color_format;
        if compiled != target.format {
            return Err(Error::configuration(
                self.label.as_str(),
                format!("pipeline was compiled for {compiled:?} but the render target is {:?}", target.format),
            ));
        }
        Ok(())
    }

    /// Records one render pass into the working render target
    ///
    /// # Arguments
    /// * `backend` - Backend used for any resolution still outstanding
    /// * `encoder` - Command buffer being recorded
    /// * `context` - Per-submission settings, including the frame target for inheriting units
    pub fn encode(&mut self, backend: &B, encoder: &mut B::CommandBuffer, context: &EncodeContext<'_, B>) -> Result<()> {
        let target = self.target.working_target(backend, context, &self.label)?;
        self.compile_for(backend, &target)?;
        let pipeline = self.pipeline.handle()?;
        trace!(unit = %self.label, format = ?target.format, vertices = ?self.vertices, "encoding render pass");

        self.vertex.resolve_all(backend)?;
        self.fragment.resolve_all(backend)?;
        encoder.begin_render_pass(&self.label, &target, &pipeline.pipeline);
        self.vertex.encode_all(backend, encoder, Stage::Vertex)?;
        self.fragment.encode_all(backend, encoder, Stage::Fragment)?;
        encoder
            .draw(pipeline.topology, self.vertices.clone(), self.instances.clone())
            .map_err(|err| Error::from_backend(self.label.as_str(), err))?;
        encoder.end_pass();
        Ok(())
    }
}

impl<B: Backend> Clone for RenderTarget<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Custom(target) => Self::Custom(target.clone()),
            Self::Future { texture, load, store } => Self::Future {
                texture: texture.clone(),
                load: *load,
                store: *store,
            },
            Self::Inherit => Self::Inherit,
        }
    }
}

impl<B: Backend> fmt::Debug for RenderTarget<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(target) => f.debug_tuple("Custom").field(target).finish(),
            Self::Future { texture, load, store } => f.debug_struct("Future").field("texture", texture).field("load", load).field("store", store).finish(),
            Self::Inherit => f.write_str("Inherit"),
        }
    }
}

impl<B: Backend> Clone for RenderShader<B> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            pipeline: self.pipeline.clone(),
            vertex: self.vertex.clone(),
            fragment: self.fragment.clone(),
            target: self.target.clone(),
            vertices: self.vertices.clone(),
            instances: self.instances.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for RenderShader<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderShader")
            .field("label", &self.label)
            .field("pipeline", &self.pipeline)
            .field("target", &self.target)
            .field("vertices", &self.vertices)
            .field("instances", &self.instances)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::Command;
    use crate::backend::{Backend, TextureDescriptor};
    use crate::{PixelFormat, RecordingBackend, TextureUsage};

    type Shader = RenderShader<RecordingBackend>;

    fn frame_target(backend: &RecordingBackend, format: PixelFormat) -> RenderPassTarget<RecordingBackend> {
        let texture = backend
            .create_texture(&TextureDescriptor::new_2d("drawable", 64, 64, format, TextureUsage::RENDER_TARGET))
            .unwrap();
        RenderPassTarget {
            texture,
            format,
            load: LoadAction::Clear(ClearColor::BLACK),
            store: StoreAction::Store,
        }
    }

    #[test]
    fn inheriting_units_draw_into_the_frame_target() {
        let backend = RecordingBackend::new();
        let target = frame_target(&backend, PixelFormat::Bgra8Unorm);
        let mut shader = Shader::new("present", RenderFunction::new("fullscreen_vs", "present_fs"))
            .fragment_texture(LazyTexture::new_2d("scene", 64, 64, PixelFormat::Rgba16Float, TextureUsage::SHADER_READ))
            .fragment_sampler(LazySampler::linear("bilinear"));

        let context = EncodeContext {
            frame_target: Some(&target),
            ..EncodeContext::default()
        };
        let mut encoder = backend.make_command_buffer("frame").unwrap();
        shader.encode(&backend, &mut encoder, &context).unwrap();

        let commands = encoder.commands();
        assert!(matches!(&commands[0], Command::BeginRender { target: id, format: PixelFormat::Bgra8Unorm, .. } if *id == target.texture.id));
        assert!(commands.iter().any(|command| matches!(command, Command::Draw { vertices, .. } if *vertices == (0..3))));
    }

    #[test]
    fn inheriting_without_a_frame_is_a_configuration_error() {
        let backend = RecordingBackend::new();
        let mut shader = Shader::new("present", RenderFunction::new("fullscreen_vs", "present_fs"));
        let mut encoder = backend.make_command_buffer("frame").unwrap();

        match shader.encode(&backend, &mut encoder, &EncodeContext::default()) {
            Err(Error::Configuration { object, .. }) => assert_eq!(object, "present"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn future_targets_are_created_once_and_rebound_each_encode() {
        let backend = RecordingBackend::new();
        let canvas = LazyTexture::new_2d("canvas", 32, 32, PixelFormat::Rgba8Unorm, TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ);
        let mut shader = Shader::new("points", RenderFunction::new("points_vs", "points_fs"))
            .target(RenderTarget::cleared(canvas, ClearColor::TRANSPARENT))
            .vertices(0..100);

        for _ in 0..3 {
            let mut encoder = backend.make_command_buffer("frame").unwrap();
            shader.encode(&backend, &mut encoder, &EncodeContext::default()).unwrap();
            backend.commit(encoder, None).unwrap();
        }

        assert_eq!(backend.creation_count("canvas"), 1);
        assert_eq!(backend.creation_count("points_vs+points_fs"), 1);
        assert_eq!(backend.pass_labels(), ["points", "points", "points"]);
    }

    #[test]
    fn failed_bindings_never_open_a_pass() {
        let backend = RecordingBackend::new().with_memory_limit(8192);
        let canvas = LazyTexture::new_2d("canvas", 32, 32, PixelFormat::Rgba8Unorm, TextureUsage::RENDER_TARGET);
        let mut shader = Shader::new("present", RenderFunction::new("fullscreen_vs", "present_fs"))
            .target(RenderTarget::cleared(canvas, ClearColor::BLACK))
            .fragment_texture(LazyTexture::new_2d("scene", 64, 64, PixelFormat::Rgba16Float, TextureUsage::SHADER_READ));
        let mut encoder = backend.make_command_buffer("frame").unwrap();

        match shader.encode(&backend, &mut encoder, &EncodeContext::default()) {
            Err(Error::ResourceExhausted { object, .. }) => assert_eq!(object, "scene"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(encoder.commands().is_empty());
    }

    #[test]
    fn format_changes_after_compilation_are_reported() {
        let backend = RecordingBackend::new();
        let mut shader = Shader::new("present", RenderFunction::new("fullscreen_vs", "present_fs"));

        let first = frame_target(&backend, PixelFormat::Bgra8Unorm);
        let mut encoder = backend.make_command_buffer("frame").unwrap();
        let context = EncodeContext {
            frame_target: Some(&first),
            ..EncodeContext::default()
        };
        shader.encode(&backend, &mut encoder, &context).unwrap();

        let second = frame_target(&backend, PixelFormat::Rgba16Float);
        let context = EncodeContext {
            frame_target: Some(&second),
            ..EncodeContext::default()
        };
        assert!(matches!(shader.encode(&backend, &mut encoder, &context), Err(Error::Configuration { .. })));
    }
}
