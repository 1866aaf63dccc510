//! Sampler states, created lazily like buffers and textures

use std::fmt;

use super::{LazyResource, Realize};
use crate::backend::{AddressMode, Backend, FilterMode, SamplerDescriptor};
use crate::{Error, Result};

/// How to obtain a sampler
pub enum SamplerSource<B: Backend> {
    New(SamplerDescriptor),
    Existing { label: String, sampler: B::Sampler },
}

/// A sampler that is created on first use
pub type LazySampler<B> = LazyResource<SamplerSource<B>>;

impl<B: Backend> Realize for SamplerSource<B> {
    type Backend = B;
    type Output = B::Sampler;

    fn label(&self) -> &str {
        match self {
            Self::New(descriptor) => &descriptor.label,
            Self::Existing { label, .. } => label,
        }
    }

    fn realize(&mut self, backend: &B) -> Result<B::Sampler> {
        match self {
            Self::New(descriptor) => backend.create_sampler(descriptor).map_err(|err| Error::from_backend(descriptor.label.as_str(), err)),
            Self::Existing { sampler, .. } => Ok(sampler.clone()),
        }
    }
}

impl<B: Backend> Clone for SamplerSource<B> {
    fn clone(&self) -> Self {
        match self {
            Self::New(descriptor) => Self::New(descriptor.clone()),
            Self::Existing { label, sampler } => Self::Existing {
                label: label.clone(),
                sampler: sampler.clone(),
            },
        }
    }
}

impl<B: Backend> fmt::Debug for SamplerSource<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New(descriptor) => f.debug_tuple("New").field(descriptor).finish(),
            Self::Existing { label, .. } => f.debug_struct("Existing").field("label", label).finish_non_exhaustive(),
        }
    }
}

impl<B: Backend> LazyResource<SamplerSource<B>> {
    pub fn with_filter(label: impl Into<String>, filter: FilterMode, address_mode: AddressMode) -> Self {
        Self::new(SamplerSource::New(SamplerDescriptor {
            label: label.into(),
            filter,
            address_mode,
        }))
    }

    /// Bilinear filtering, clamped to the edge
    pub fn linear(label: impl Into<String>) -> Self {
        Self::with_filter(label, FilterMode::Linear, AddressMode::ClampToEdge)
    }

    /// Point sampling, clamped to the edge
    pub fn nearest(label: impl Into<String>) -> Self {
        Self::with_filter(label, FilterMode::Nearest, AddressMode::ClampToEdge)
    }

    pub fn from_sampler(label: impl Into<String>, sampler: B::Sampler) -> Self {
        Self::new(SamplerSource::Existing { label: label.into(), sampler })
    }
}
