//! Render pipeline descriptions
//!
//! A render pipeline is compiled for one colour format. The format comes from an explicit
//! [`PixelFormat`], from a lazily created texture (resolving it if needed), or from the render
//! target the unit draws into, which is only known when the unit is first encoded.

use std::fmt;
use std::marker::PhantomData;

use tracing::debug;

use super::FunctionConstants;
use crate::backend::{Backend, RenderPipelineDescriptor};
use crate::resource::{LazyResource, LazyTexture, Realize};
use crate::{Error, PixelFormat, PrimitiveTopology, Result};

/// Where a render pipeline takes its colour attachment format from
pub enum ColorOutput<B: Backend> {
    Format(PixelFormat),
    /// The format of this texture, resolved on pipeline compilation
    Texture(LazyTexture<B>),
    /// The format of the render target the unit is encoded into
    Target,
}

/// A compiled render pipeline and the state it was compiled for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPipelineHandle<P> {
    pub pipeline: P,
    pub color_format: PixelFormat,
    pub topology: PrimitiveTopology,
}

/// A vertex and fragment entry point pair
pub struct RenderFunction<B: Backend> {
    label: String,
    vertex: String,
    fragment: String,
    constants: FunctionConstants,
    topology: PrimitiveTopology,
    color: ColorOutput<B>,
    target_format: Option<PixelFormat>,
    _backend: PhantomData<fn() -> B>,
}

/// A render pipeline compiled on first use
pub type RenderPipeline<B> = LazyResource<RenderFunction<B>>;

impl<B: Backend> RenderFunction<B> {
    /// Describes a pipeline drawing a triangle list into the unit's render target
    pub fn new(vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        let vertex = vertex.into();
        let fragment = fragment.into();
        Self {
            label: format!("{vertex}+{fragment}"),
            vertex,
            fragment,
            constants: FunctionConstants::new(),
            topology: PrimitiveTopology::default(),
            color: ColorOutput::Target,
            target_format: None,
            _backend: PhantomData,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn constants(mut self, constants: FunctionConstants) -> Self {
        self.constants = constants;
        self
    }

    pub fn topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn color_format(mut self, format: PixelFormat) -> Self {
        self.color = ColorOutput::Format(format);
        self
    }

    /// Takes the colour format from `texture`
    pub fn color_format_of(mut self, texture: LazyTexture<B>) -> Self {
        self.color = ColorOutput::Texture(texture);
        self
    }

    /// Supplies the format of the render target for [`ColorOutput::Target`]
    pub(crate) fn set_target_format(&mut self, format: PixelFormat) {
        self.target_format = Some(format);
    }

    fn resolve_color_format(&mut self, backend: &B) -> Result<PixelFormat> {
        match &mut self.color {
            ColorOutput::Format(format) => Ok(*format),
            ColorOutput::Texture(texture) => Ok(texture.resolve(backend)?.format()),
            ColorOutput::Target => self
                .target_format
                .ok_or_else(|| Error::configuration(self.label.as_str(), "colour format follows the render target, but no target is bound yet")),
        }
    }
}

impl<B: Backend> Realize for RenderFunction<B> {
    type Backend = B;
    type Output = RenderPipelineHandle<B::RenderPipeline>;

    fn label(&self) -> &str {
        &self.label
    }

    fn realize(&mut self, backend: &B) -> Result<Self::Output> {
        let color_format = self.resolve_color_format(backend)?;
        debug!(pipeline = %self.label, vertex = %self.vertex, fragment = %self.fragment, ?color_format, "compiling render pipeline");

        let descriptor = RenderPipelineDescriptor {
            label: &self.label,
            vertex_entry_point: &self.vertex,
            fragment_entry_point: &self.fragment,
            constants: &self.constants,
            color_format,
            topology: self.topology,
        };
        let pipeline = backend.create_render_pipeline(&descriptor).map_err(|err| Error::from_backend(self.label.as_str(), err))?;

        Ok(RenderPipelineHandle {
            pipeline,
            color_format,
            topology: self.topology,
        })
    }
}

impl<B: Backend> Clone for ColorOutput<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Format(format) => Self::Format(*format),
            Self::Texture(texture) => Self::Texture(texture.clone()),
            Self::Target => Self::Target,
        }
    }
}

impl<B: Backend> fmt::Debug for ColorOutput<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format(format) => f.debug_tuple("Format").field(format).finish(),
            Self::Texture(texture) => f.debug_tuple("Texture").field(texture).finish(),
            Self::Target => f.write_str("Target"),
        }
    }
}

impl<B: Backend> Clone for RenderFunction<B> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            vertex: self.vertex.clone(),
            fragment: self.fragment.clone(),
            constants: self.constants.clone(),
            topology: self.topology,
            color: self.color.clone(),
            target_format: self.target_format,
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> fmt::Debug for RenderFunction<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderFunction")
            .field("label", &self.label)
            .field("vertex", &self.vertex)
            .field("fragment", &self.fragment)
            .field("topology", &self.topology)
            .field("color", &self.color)
            .finish_non_exhaustive()
    }
}
