//! Compute and render pipeline descriptions, compiled once and cached

mod compute;
mod constants;
mod render;

pub use compute::{ComputeFunction, ComputePipeline};
pub use constants::FunctionConstants;
pub use render::{ColorOutput, RenderFunction, RenderPipeline, RenderPipelineHandle};
