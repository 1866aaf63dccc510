//! Compute dispatch units

use std::fmt;

use tracing::{debug, trace};

use super::EncodeContext;
use crate::backend::{Backend, CommandEncoder};
use crate::binding::{BufferBinding, StageBindings};
use crate::dispatch::{DispatchSize, thread_groups};
use crate::pipeline::{ComputeFunction, ComputePipeline};
use crate::resource::{LazySampler, LazyTexture};
use crate::{Error, Extent3d, Result, Stage};

/// A compute pipeline, its bindings and the extent it dispatches over
pub struct ComputeShader<B: Backend> {
    label: String,
    pipeline: ComputePipeline<B>,
    bindings: StageBindings<B>,
    dispatch: DispatchSize<B>,
    threads_per_group: Option<Extent3d>,
}

impl<B: Backend> ComputeShader<B> {
    /// A unit running `function`, dispatched over its first texture until told otherwise
    pub fn new(label: impl Into<String>, function: ComputeFunction<B>) -> Self {
        Self {
            label: label.into(),
            pipeline: ComputePipeline::new(function),
            bindings: StageBindings::new(),
            dispatch: DispatchSize::TextureSlot(0),
            threads_per_group: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Binds a texture at the next texture slot
    pub fn texture(mut self, texture: LazyTexture<B>) -> Self {
        self.bindings.textures.push(texture);
        self
    }

    /// Binds a buffer or inline constant at the next buffer slot
    pub fn buffer(mut self, buffer: impl Into<BufferBinding<B>>) -> Self {
        self.bindings.buffers.push(buffer);
        self
    }

    /// Binds a sampler at the next sampler slot
    pub fn sampler(mut self, sampler: LazySampler<B>) -> Self {
        self.bindings.samplers.push(sampler);
        self
    }

    /// Replaces all bindings at once
    pub fn bindings(mut self, bindings: StageBindings<B>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn dispatch(mut self, dispatch: DispatchSize<B>) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Work-group size the shader was written for; the renderer default is used otherwise
    pub fn threads_per_group(mut self, threads_per_group: impl Into<Extent3d>) -> Self {
        self.threads_per_group = Some(threads_per_group.into());
        self
    }

    pub fn stage_bindings(&self) -> &StageBindings<B> {
        &self.bindings
    }

    pub fn stage_bindings_mut(&mut self) -> &mut StageBindings<B> {
        &mut self.bindings
    }

    pub fn is_compiled(&self) -> bool {
        self.pipeline.is_resolved()
    }

    /// Compiles the pipeline and creates every bound resource
    pub fn prepare(&mut self, backend: &B) -> Result<()> {
        self.pipeline.resolve(backend)?;
        self.bindings.resolve_all(backend)
    }

    /// Records one compute pass
    ///
    /// An extent with a zero axis (for example an empty element buffer) encodes nothing.
    ///
    /// # Arguments
    /// * `backend` - Backend used for any resolution still outstanding
    /// * `encoder` - Command buffer being recorded
    /// * `context` - Per-submission encode settings
    pub fn encode(&mut self, backend: &B, encoder: &mut B::CommandBuffer, context: &EncodeContext<'_, B>) -> Result<()> {
        let pipeline = self.pipeline.resolve(backend)?;
        let extent = self.dispatch.extent(backend, &mut self.bindings, &self.label)?;
        if extent.is_empty() {
            debug!(unit = %self.label, ?extent, "skipping compute dispatch over an empty extent");
            return Ok(());
        }

        let threads_per_group = self.threads_per_group.unwrap_or(context.threads_per_group);
        let groups = thread_groups(extent, threads_per_group).map_err(|_| Error::configuration(self.label.as_str(), format!("thread group size {threads_per_group:?} has a zero axis")))?;
        trace!(unit = %self.label, ?extent, ?groups, "encoding compute pass");

        self.bindings.resolve_all(backend)?;
        encoder.begin_compute_pass(&self.label, pipeline);
        self.bindings.encode_all(backend, encoder, Stage::Compute)?;
        encoder.dispatch(groups, threads_per_group).map_err(|err| Error::from_backend(self.label.as_str(), err))?;
        encoder.end_pass();
        Ok(())
    }
}

impl<B: Backend> Clone for ComputeShader<B> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            pipeline: self.pipeline.clone(),
            bindings: self.bindings.clone(),
            dispatch: self.dispatch.clone(),
            threads_per_group: self.threads_per_group,
        }
    }
}

impl<B: Backend> fmt::Debug for ComputeShader<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeShader")
            .field("label", &self.label)
            .field("pipeline", &self.pipeline)
            .field("bindings", &self.bindings)
            .field("dispatch", &self.dispatch)
            .field("threads_per_group", &self.threads_per_group)
            .finish()
    }
}
