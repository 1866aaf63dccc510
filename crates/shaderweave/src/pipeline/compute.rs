//! Compute pipeline descriptions

use std::fmt;
use std::marker::PhantomData;

use tracing::debug;

use super::FunctionConstants;
use crate::backend::{Backend, ComputePipelineDescriptor};
use crate::resource::{LazyResource, Realize};
use crate::{Error, Result};

/// A compute entry point and the constants it is specialised with
pub struct ComputeFunction<B: Backend> {
    label: String,
    entry_point: String,
    constants: FunctionConstants,
    _backend: PhantomData<fn() -> B>,
}

/// A compute pipeline compiled on first use
pub type ComputePipeline<B> = LazyResource<ComputeFunction<B>>;

impl<B: Backend> ComputeFunction<B> {
    /// Describes the pipeline for `entry_point`, labelled after it
    pub fn new(entry_point: impl Into<String>) -> Self {
        let entry_point = entry_point.into();
        Self {
            label: entry_point.clone(),
            entry_point,
            constants: FunctionConstants::new(),
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

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

impl<B: Backend> Realize for ComputeFunction<B> {
    type Backend = B;
    type Output = B::ComputePipeline;

    fn label(&self) -> &str {
        &self.label
    }

    fn realize(&mut self, backend: &B) -> Result<B::ComputePipeline> {
        debug!(pipeline = %self.label, entry_point = %self.entry_point, constants = self.constants.len(), "compiling compute pipeline");
        let descriptor = ComputePipelineDescriptor {
            label: &self.label,
            entry_point: &self.entry_point,
            constants: &self.constants,
        };
        backend.create_compute_pipeline(&descriptor).map_err(|err| Error::from_backend(self.label.as_str(), err))
    }
}

impl<B: Backend> Clone for ComputeFunction<B> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            entry_point: self.entry_point.clone(),
            constants: self.constants.clone(),
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> fmt::Debug for ComputeFunction<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeFunction")
            .field("label", &self.label)
            .field("entry_point", &self.entry_point)
            .field("constants", &self.constants)
            .finish()
    }
}
