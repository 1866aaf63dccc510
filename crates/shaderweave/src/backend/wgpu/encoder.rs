//! Pass recording on top of `wgpu::CommandEncoder`
//!
//! wgpu passes borrow their encoder and need every bind group before the first dispatch, while
//! the crate's encoder model binds one resource at a time. The command buffer therefore keeps
//! the open pass and its bound resources aside and records the whole wgpu pass when the
//! dispatch or draw arrives.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, trace};
use wgpu::util::DeviceExt;

use super::library::ReflectedBinding;
use super::{WgpuBackend, format, scoped};
use crate::backend::{BackendError, CommandEncoder, RenderPassTarget, TextureCopy};
use crate::{Extent3d, LoadAction, PrimitiveTopology, Stage};

/// Bind group holding the buffers of a stage
pub const BUFFER_GROUP: u32 = 0;
/// Bind group holding the textures of a stage
pub const TEXTURE_GROUP: u32 = 1;
/// Bind group holding the samplers of a stage
pub const SAMPLER_GROUP: u32 = 2;
/// Added to a fragment-stage slot to get its `@binding` index
pub const FRAGMENT_BINDING_OFFSET: u32 = 16;

/// `(group, binding)` a slot of `stage` maps to
fn location(stage: Stage, group: u32, slot: u32) -> (u32, u32) {
    match stage {
        Stage::Compute | Stage::Vertex => (group, slot),
        Stage::Fragment => (group, FRAGMENT_BINDING_OFFSET + slot),
    }
}

enum Bound {
    Buffer(wgpu::Buffer),
    Texture(wgpu::Texture),
    Sampler(wgpu::Sampler),
}

impl Bound {
    fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Texture(_) => "texture",
            Self::Sampler(_) => "sampler",
        }
    }
}

enum Prepared<'a> {
    Buffer(&'a wgpu::Buffer),
    Sampler(&'a wgpu::Sampler),
    View(wgpu::TextureView),
}

#[derive(Debug)]
struct GroupLayout {
    index: u32,
    layout: wgpu::BindGroupLayout,
    entries: Vec<(u32, wgpu::BindingType)>,
}

impl GroupLayout {
    fn bind(&self, device: &wgpu::Device, label: &str, bound: &BTreeMap<(u32, u32), Bound>) -> Result<wgpu::BindGroup, BackendError> {
        let mut prepared = Vec::with_capacity(self.entries.len());
        for (binding, ty) in &self.entries {
            let resource = bound
                .get(&(self.index, *binding))
                .ok_or_else(|| BackendError::Validation(format!("{label}: nothing is bound at @group({}) @binding({binding})", self.index)))?;
            let resource = match (resource, ty) {
                (Bound::Buffer(buffer), wgpu::BindingType::Buffer { .. }) => Prepared::Buffer(buffer),
                (Bound::Sampler(sampler), wgpu::BindingType::Sampler(_)) => Prepared::Sampler(sampler),
                (Bound::Texture(texture), wgpu::BindingType::Texture { .. } | wgpu::BindingType::StorageTexture { .. }) => {
                    Prepared::View(texture.create_view(&wgpu::TextureViewDescriptor::default()))
                }
                (resource, _) => {
                    return Err(BackendError::Validation(format!(
                        "{label}: @group({}) @binding({binding}) does not accept a {}",
                        self.index,
                        resource.kind()
                    )));
                }
            };
            prepared.push((*binding, resource));
        }

        let entries = prepared
            .iter()
            .map(|(binding, resource)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: match resource {
                    Prepared::Buffer(buffer) => buffer.as_entire_binding(),
                    Prepared::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                    Prepared::View(view) => wgpu::BindingResource::TextureView(view),
                },
            })
            .collect::<Vec<_>>();

        scoped(device, || {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &self.layout,
                entries: &entries,
            })
        })
    }
}

/// Bind-group layouts of a pipeline, derived from the bindings its entry points use
#[derive(Debug, Clone)]
pub(crate) struct BindingLayout {
    groups: Arc<[GroupLayout]>,
}

impl BindingLayout {
    /// Merges the reflected bindings of every stage and creates one layout per group
    ///
    /// Groups below the highest one in use get an empty layout so indices stay contiguous.
    pub(crate) fn new<'a>(device: &wgpu::Device, label: &str, stages: impl IntoIterator<Item = (&'a [ReflectedBinding], wgpu::ShaderStages)>) -> (Self, wgpu::PipelineLayout) {
        let mut merged = BTreeMap::<(u32, u32), (wgpu::BindingType, wgpu::ShaderStages)>::new();
        for (bindings, visibility) in stages {
            for binding in bindings {
                merged
                    .entry((binding.group, binding.binding))
                    .and_modify(|(_, stages)| *stages |= visibility)
                    .or_insert((binding.ty, visibility));
            }
        }

        let group_count = merged.keys().next_back().map_or(0, |(group, _)| group + 1);
        let groups = (0..group_count)
            .map(|index| {
                let entries = merged
                    .range((index, 0)..=(index, u32::MAX))
                    .map(|(&(_, binding), &(ty, visibility))| wgpu::BindGroupLayoutEntry {
                        binding,
                        visibility,
                        ty,
                        count: None,
                    })
                    .collect::<Vec<_>>();
                let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{label} group {index}")),
                    entries: &entries,
                });
                GroupLayout {
                    index,
                    layout,
                    entries: entries.iter().map(|entry| (entry.binding, entry.ty)).collect(),
                }
            })
            .collect::<Vec<_>>();

        let layouts = groups.iter().map(|group| &group.layout).collect::<Vec<_>>();
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &layouts,
            push_constant_ranges: &[],
        });

        (Self { groups: groups.into() }, pipeline_layout)
    }

    fn bind_groups(&self, device: &wgpu::Device, label: &str, bound: &BTreeMap<(u32, u32), Bound>) -> Result<Vec<wgpu::BindGroup>, BackendError> {
        self.groups.iter().map(|group| group.bind(device, label, bound)).collect()
    }
}

/// Compiled compute pipeline with the layout its bind groups are built against
#[derive(Debug, Clone)]
pub struct WgpuComputePipeline {
    pub(crate) pipeline: wgpu::ComputePipeline,
    pub(crate) layout: BindingLayout,
    pub(crate) entry_point: Arc<str>,
    pub(crate) workgroup_size: [u32; 3],
}

impl WgpuComputePipeline {
    pub fn raw(&self) -> &wgpu::ComputePipeline {
        &self.pipeline
    }

    /// `@workgroup_size` declared by the entry point
    pub fn workgroup_size(&self) -> Extent3d {
        let [width, height, depth] = self.workgroup_size;
        Extent3d::new(width, height, depth)
    }
}

/// Compiled render pipeline with the layout its bind groups are built against
#[derive(Debug, Clone)]
pub struct WgpuRenderPipeline {
    pub(crate) pipeline: wgpu::RenderPipeline,
    pub(crate) layout: BindingLayout,
}

impl WgpuRenderPipeline {
    pub fn raw(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }
}

enum PassKind {
    Compute(WgpuComputePipeline),
    Render {
        pipeline: WgpuRenderPipeline,
        target: RenderPassTarget<WgpuBackend>,
        drawn: bool,
    },
}

struct PendingPass {
    label: String,
    kind: PassKind,
    bound: BTreeMap<(u32, u32), Bound>,
}

/// A recording wgpu command encoder
pub struct WgpuCommandBuffer {
    device: wgpu::Device,
    encoder: wgpu::CommandEncoder,
    pass: Option<PendingPass>,
}

impl WgpuCommandBuffer {
    pub(crate) fn new(device: wgpu::Device, label: &str) -> Self {
        let encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        Self { device, encoder, pass: None }
    }

    /// Closes any open pass and finishes the encoder
    pub(crate) fn finish(mut self) -> wgpu::CommandBuffer {
        self.end_pass();
        self.encoder.finish()
    }

    fn bind(&mut self, stage: Stage, group: u32, slot: u32, resource: Bound) {
        match &mut self.pass {
            Some(pass) => {
                pass.bound.insert(location(stage, group, slot), resource);
            }
            None => debug!(?stage, slot, kind = resource.kind(), "ignoring a binding made outside a pass"),
        }
    }

    fn record_render_pass(&mut self, vertices: Option<(Range<u32>, Range<u32>)>) -> Result<(), BackendError> {
        let Some(PendingPass {
            label,
            kind: PassKind::Render { pipeline, target, drawn },
            bound,
        }) = &mut self.pass
        else {
            return Err(BackendError::Validation("draw issued outside a render pass".into()));
        };

        let groups = match &vertices {
            Some(_) => pipeline.layout.bind_groups(&self.device, label, bound)?,
            None => Vec::new(),
        };
        let load = if *drawn { LoadAction::Load } else { target.load };
        let view = target.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut render_pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: format::operations(load, target.store),
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        if let Some((vertices, instances)) = vertices {
            render_pass.set_pipeline(&pipeline.pipeline);
            for (index, group) in groups.iter().enumerate() {
                render_pass.set_bind_group(index as u32, group, &[]);
            }
            render_pass.draw(vertices, instances);
        }
        *drawn = true;
        Ok(())
    }
}

impl CommandEncoder<WgpuBackend> for WgpuCommandBuffer {
    fn begin_compute_pass(&mut self, label: &str, pipeline: &WgpuComputePipeline) {
        self.end_pass();
        self.pass = Some(PendingPass {
            label: label.to_owned(),
            kind: PassKind::Compute(pipeline.clone()),
            bound: BTreeMap::new(),
        });
    }

    fn begin_render_pass(&mut self, label: &str, target: &RenderPassTarget<WgpuBackend>, pipeline: &WgpuRenderPipeline) {
        self.end_pass();
        self.pass = Some(PendingPass {
            label: label.to_owned(),
            kind: PassKind::Render {
                pipeline: pipeline.clone(),
                target: target.clone(),
                drawn: false,
            },
            bound: BTreeMap::new(),
        });
    }

    fn set_buffer(&mut self, stage: Stage, slot: u32, buffer: &wgpu::Buffer) {
        self.bind(stage, BUFFER_GROUP, slot, Bound::Buffer(buffer.clone()));
    }

    /// Uploads `bytes` into a transient buffer that is dropped with the pass
    fn set_bytes(&mut self, stage: Stage, slot: u32, bytes: &[u8]) {
        let mut contents = bytes.to_vec();
        contents.resize(bytes.len().max(1).next_multiple_of(16), 0);
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("inline constants"),
            contents: &contents,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::STORAGE,
        });
        self.bind(stage, BUFFER_GROUP, slot, Bound::Buffer(buffer));
    }

    fn set_texture(&mut self, stage: Stage, slot: u32, texture: &wgpu::Texture) {
        self.bind(stage, TEXTURE_GROUP, slot, Bound::Texture(texture.clone()));
    }

    fn set_sampler(&mut self, stage: Stage, slot: u32, sampler: &wgpu::Sampler) {
        self.bind(stage, SAMPLER_GROUP, slot, Bound::Sampler(sampler.clone()));
    }

    fn dispatch(&mut self, thread_groups: Extent3d, threads_per_group: Extent3d) -> Result<(), BackendError> {
        let Some(PendingPass {
            label,
            kind: PassKind::Compute(pipeline),
            bound,
        }) = &self.pass
        else {
            return Err(BackendError::Validation("dispatch issued outside a compute pass".into()));
        };

        if pipeline.workgroup_size() != threads_per_group {
            return Err(BackendError::Validation(format!(
                "`{}` declares @workgroup_size{:?} but the dispatch was sized for {:?}",
                pipeline.entry_point, pipeline.workgroup_size, threads_per_group
            )));
        }

        let groups = pipeline.layout.bind_groups(&self.device, label, bound)?;
        trace!(pass = %label, ?thread_groups, "recording compute pass");

        let mut compute_pass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&pipeline.pipeline);
        for (index, group) in groups.iter().enumerate() {
            compute_pass.set_bind_group(index as u32, group, &[]);
        }
        compute_pass.dispatch_workgroups(thread_groups.width, thread_groups.height, thread_groups.depth);
        Ok(())
    }

    fn draw(&mut self, _topology: PrimitiveTopology, vertices: Range<u32>, instances: Range<u32>) -> Result<(), BackendError> {
        self.record_render_pass(Some((vertices, instances)))
    }

    /// A render pass that was opened but never drew still applies its load action
    fn end_pass(&mut self) {
        let clear_only = matches!(
            &self.pass,
            Some(PendingPass {
                kind: PassKind::Render {
                    drawn: false,
                    target: RenderPassTarget { load: LoadAction::Clear(_), .. },
                    ..
                },
                ..
            })
        );
        if clear_only && self.record_render_pass(None).is_err() {
            debug!("could not record a clear-only render pass");
        }
        self.pass = None;
    }

    fn copy_texture_to_texture(&mut self, source: &wgpu::Texture, destination: &wgpu::Texture, copy: &TextureCopy) {
        let size = match copy.size {
            Some(size) => format::extent(size),
            None => source.size().mip_level_size(copy.source_mip_level, source.dimension()),
        };
        self.encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: source,
                mip_level: copy.source_mip_level,
                origin: format::origin(copy.source_origin),
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: destination,
                mip_level: copy.destination_mip_level,
                origin: format::origin(copy.destination_origin),
                aspect: wgpu::TextureAspect::All,
            },
            size,
        );
    }

    fn copy_buffer_to_buffer(&mut self, source: &wgpu::Buffer, source_offset: u64, destination: &wgpu::Buffer, destination_offset: u64, size: u64) {
        self.encoder.copy_buffer_to_buffer(source, source_offset, destination, destination_offset, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_slots_are_offset_within_their_group() {
        assert_eq!(location(Stage::Compute, TEXTURE_GROUP, 2), (1, 2));
        assert_eq!(location(Stage::Vertex, BUFFER_GROUP, 0), (0, 0));
        assert_eq!(location(Stage::Fragment, SAMPLER_GROUP, 1), (2, 17));
    }
}
