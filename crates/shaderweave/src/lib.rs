//! Declarative GPU work built from lazily resolved resources
//!
//! This crate lets a caller describe GPU work (compute dispatches, render passes, blits) as
//! plain values. Buffers, textures, samplers and pipelines start out as descriptions and are
//! turned into backend objects the first time an encode needs them; the resolved handle is
//! then cached for the lifetime of the value that owns it.
//!
//! Work units are composed into an [`Operation`] tree with `+` or [`Operation::sequence`].
//! A [`Renderer`] flattens the tree once, encodes every unit in order into a single command
//! buffer and commits it, optionally presenting a drawable and optionally waiting for the GPU.
//! Several trees that must finish one after another, with host work such as image export in
//! between, form an [`OperationSet`].
//!
//! The GPU itself is reached through the [`Backend`] trait. Two implementations ship with the
//! crate: [`RecordingBackend`], which records every call in memory, and (with the `wgpu`
//! feature) [`WgpuBackend`].

mod binding;
mod dispatch;
mod error;
mod operation;
mod sequence;
mod submit;
mod types;

pub mod backend;
pub mod pipeline;
pub mod resource;
pub mod shader;

pub use backend::recording::RecordingBackend;
#[cfg(feature = "wgpu")]
pub use backend::wgpu::{ShaderLibrary, WgpuBackend, WgpuBackendInit};
pub use backend::{Backend, BackendError, CommandEncoder, RenderPassTarget};
pub use binding::{BufferBinding, BufferList, SamplerList, StageBindings, TextureList};
pub use dispatch::{DispatchSize, grid_for_elements, thread_groups};
pub use error::{Error, Result};
pub use operation::{Constructor, Operation};
pub use sequence::{HostFn, OperationSet, Step};
pub use pipeline::{ComputeFunction, FunctionConstants, RenderFunction};
pub use resource::{ConstantBytes, LazyBuffer, LazySampler, LazyTexture, Uniform};
pub use shader::{BlitShader, ComputeShader, CustomUnit, RenderShader, RenderTarget, ShaderUnit};
pub use submit::{Completion, Frame, Renderer, RendererConfig, SubmitOptions};
pub use types::{BufferUsage, ClearColor, Extent3d, LoadAction, Origin3d, PixelFormat, PrimitiveTopology, Stage, StoreAction, TextureUsage};
