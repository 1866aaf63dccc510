//! Materialised units of GPU work
//!
//! A [`ShaderUnit`] is ready to encode: its pipeline and resources may still be descriptions,
//! but everything it needs to resolve them is in place. Units are produced directly or by the
//! constructors of an [`Operation`](crate::Operation) tree.

use std::fmt;

use crate::backend::{Backend, RenderPassTarget};
use crate::{Extent3d, Result};

mod blit;
mod compute;
mod custom;
mod render;

pub use blit::{BlitCommand, BlitShader};
pub use compute::ComputeShader;
pub use custom::{CustomUnit, EncodeFn};
pub use render::{RenderShader, RenderTarget};

/// Work-group size used when neither the unit nor the renderer sets one
pub const DEFAULT_THREADS_PER_GROUP: Extent3d = Extent3d::new(8, 8, 1);

/// Settings shared by every unit encoded into one command buffer
pub struct EncodeContext<'a, B: Backend> {
    /// Work-group size for compute units that do not declare their own
    pub threads_per_group: Extent3d,
    /// Target for render units that inherit the frame target
    pub frame_target: Option<&'a RenderPassTarget<B>>,
}

impl<B: Backend> Default for EncodeContext<'_, B> {
    fn default() -> Self {
        Self {
            threads_per_group: DEFAULT_THREADS_PER_GROUP,
            frame_target: None,
        }
    }
}

impl<B: Backend> fmt::Debug for EncodeContext<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodeContext")
            .field("threads_per_group", &self.threads_per_group)
            .field("frame_target", &self.frame_target)
            .finish()
    }
}

/// A compute, render, blit or closure-encoded unit
pub enum ShaderUnit<B: Backend> {
    Compute(ComputeShader<B>),
    Render(RenderShader<B>),
    Blit(BlitShader<B>),
    Custom(CustomUnit<B>),
}

impl<B: Backend> ShaderUnit<B> {
    pub fn label(&self) -> &str {
        match self {
            Self::Compute(shader) => shader.label(),
            Self::Render(shader) => shader.label(),
            Self::Blit(shader) => shader.label(),
            Self::Custom(unit) => unit.label(),
        }
    }

    /// Resolves everything that can be resolved before the first encode
    pub fn prepare(&mut self, backend: &B) -> Result<()> {
        match self {
            Self::Compute(shader) => shader.prepare(backend),
            Self::Render(shader) => shader.prepare(backend),
            Self::Blit(shader) => shader.prepare(backend),
            Self::Custom(_) => Ok(()),
        }
    }

    /// Records the unit into `encoder`
    pub fn encode(&mut self, backend: &B, encoder: &mut B::CommandBuffer, context: &EncodeContext<'_, B>) -> Result<()> {
        match self {
            Self::Compute(shader) => shader.encode(backend, encoder, context),
            Self::Render(shader) => shader.encode(backend, encoder, context),
            Self::Blit(shader) => shader.encode(backend, encoder),
            Self::Custom(unit) => unit.encode(backend, encoder),
        }
    }
}

impl<B: Backend> From<ComputeShader<B>> for ShaderUnit<B> {
    fn from(shader: ComputeShader<B>) -> Self {
        Self::Compute(shader)
    }
}

impl<B: Backend> From<RenderShader<B>> for ShaderUnit<B> {
    fn from(shader: RenderShader<B>) -> Self {
        Self::Render(shader)
    }
}

impl<B: Backend> From<BlitShader<B>> for ShaderUnit<B> {
    fn from(shader: BlitShader<B>) -> Self {
        Self::Blit(shader)
    }
}

impl<B: Backend> From<CustomUnit<B>> for ShaderUnit<B> {
    fn from(unit: CustomUnit<B>) -> Self {
        Self::Custom(unit)
    }
}

impl<B: Backend> Clone for ShaderUnit<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Compute(shader) => Self::Compute(shader.clone()),
            Self::Render(shader) => Self::Render(shader.clone()),
            Self::Blit(shader) => Self::Blit(shader.clone()),
            Self::Custom(unit) => Self::Custom(unit.clone()),
        }
    }
}

impl<B: Backend> fmt::Debug for ShaderUnit<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compute(shader) => fmt::Debug::fmt(shader, f),
            Self::Render(shader) => fmt::Debug::fmt(shader, f),
            Self::Blit(shader) => fmt::Debug::fmt(shader, f),
            Self::Custom(unit) => fmt::Debug::fmt(unit, f),
        }
    }
}
