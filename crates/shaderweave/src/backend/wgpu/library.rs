//! WGSL shader library indexed by entry point name
//!
//! Every module added to the library is parsed and validated with naga up front. The entry
//! points it declares are indexed by name together with their stage, work-group size and the
//! resource bindings each one actually uses, so pipelines can be created by entry point name
//! and bind-group layouts derived without compiling anything twice.

use std::collections::HashMap;
use std::sync::Arc;

use super::format;
use crate::backend::BackendError;

/// One resource binding an entry point reads or writes
#[derive(Debug, Clone)]
pub(crate) struct ReflectedBinding {
    pub group: u32,
    pub binding: u32,
    pub ty: wgpu::BindingType,
}

/// What the library knows about an entry point
#[derive(Debug, Clone)]
pub(crate) struct EntryPoint {
    /// Index of the module declaring it
    pub module: usize,
    pub stage: naga::ShaderStage,
    pub workgroup_size: [u32; 3],
    pub bindings: Vec<ReflectedBinding>,
}

#[derive(Debug, Clone)]
pub(crate) struct LibraryModule {
    pub label: Arc<str>,
    pub source: Arc<str>,
}

/// Parsed WGSL modules and the entry points they declare
#[derive(Debug, Clone, Default)]
pub struct ShaderLibrary {
    modules: Vec<LibraryModule>,
    entry_points: HashMap<String, EntryPoint>,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`ShaderLibrary::add_wgsl`]
    pub fn with_wgsl(mut self, label: &str, source: &str) -> Result<Self, BackendError> {
        self.add_wgsl(label, source)?;
        Ok(self)
    }

    /// Parses, validates and indexes a WGSL module
    ///
    /// # Arguments
    /// * `label` - Name used in diagnostics and for the wgpu shader module
    /// * `source` - WGSL source text
    ///
    /// # Returns
    /// A validation error with the rendered naga diagnostic if the source does not parse or
    /// validate, or if it declares an entry point name the library already contains
    pub fn add_wgsl(&mut self, label: &str, source: &str) -> Result<(), BackendError> {
        let module = naga::front::wgsl::parse_str(source).map_err(|err| BackendError::Validation(format!("{label}: {}", err.emit_to_string(source))))?;
        let info = naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
            .validate(&module)
            .map_err(|err| BackendError::Validation(format!("{label}: {}", err.emit_to_string(source))))?;

        let index = self.modules.len();
        let mut declared = Vec::with_capacity(module.entry_points.len());
        for (entry_index, entry) in module.entry_points.iter().enumerate() {
            if self.entry_points.contains_key(&entry.name) {
                return Err(BackendError::Validation(format!("{label}: entry point `{}` is already in the shader library", entry.name)));
            }

            let usage = info.get_entry_point(entry_index);
            let mut bindings = Vec::new();
            for (handle, variable) in module.global_variables.iter() {
                let Some(resource) = &variable.binding else { continue };
                if usage[handle].is_empty() {
                    continue;
                }
                if let Some(ty) = binding_type(&module, variable).map_err(|reason| BackendError::Validation(format!("{label}: {reason}")))? {
                    bindings.push(ReflectedBinding {
                        group: resource.group,
                        binding: resource.binding,
                        ty,
                    });
                }
            }

            declared.push((
                entry.name.clone(),
                EntryPoint {
                    module: index,
                    stage: entry.stage,
                    workgroup_size: entry.workgroup_size,
                    bindings,
                },
            ));
        }

        tracing::debug!(module = label, entry_points = declared.len(), "indexed WGSL module");
        self.entry_points.extend(declared);
        self.modules.push(LibraryModule {
            label: label.into(),
            source: source.into(),
        });
        Ok(())
    }

    pub fn contains(&self, entry_point: &str) -> bool {
        self.entry_points.contains_key(entry_point)
    }

    /// Names of every indexed entry point, in no particular order
    pub fn entry_points(&self) -> impl Iterator<Item = &str> {
        self.entry_points.keys().map(String::as_str)
    }

    pub(crate) fn entry_point(&self, name: &str) -> Option<&EntryPoint> {
        self.entry_points.get(name)
    }

    pub(crate) fn modules(&self) -> &[LibraryModule] {
        &self.modules
    }
}

fn view_dimension(dim: naga::ImageDimension, arrayed: bool) -> wgpu::TextureViewDimension {
    match (dim, arrayed) {
        (naga::ImageDimension::D1, _) => wgpu::TextureViewDimension::D1,
        (naga::ImageDimension::D2, false) => wgpu::TextureViewDimension::D2,
        (naga::ImageDimension::D2, true) => wgpu::TextureViewDimension::D2Array,
        (naga::ImageDimension::D3, _) => wgpu::TextureViewDimension::D3,
        (naga::ImageDimension::Cube, false) => wgpu::TextureViewDimension::Cube,
        (naga::ImageDimension::Cube, true) => wgpu::TextureViewDimension::CubeArray,
    }
}

fn storage_access(access: naga::StorageAccess) -> wgpu::StorageTextureAccess {
    let load = access.contains(naga::StorageAccess::LOAD);
    let store = access.contains(naga::StorageAccess::STORE);
    match (load, store) {
        (true, true) => wgpu::StorageTextureAccess::ReadWrite,
        (false, true) => wgpu::StorageTextureAccess::WriteOnly,
        _ => wgpu::StorageTextureAccess::ReadOnly,
    }
}

/// The layout entry type of a global, or `None` for globals that are not bindable resources
fn binding_type(module: &naga::Module, variable: &naga::GlobalVariable) -> Result<Option<wgpu::BindingType>, String> {
    let ty = match variable.space {
        naga::AddressSpace::Uniform => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        naga::AddressSpace::Storage { access } => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage {
                read_only: !access.contains(naga::StorageAccess::STORE),
            },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        naga::AddressSpace::Handle => match &module.types[variable.ty].inner {
            naga::TypeInner::Sampler { comparison } => wgpu::BindingType::Sampler(if *comparison {
                wgpu::SamplerBindingType::Comparison
            } else {
                wgpu::SamplerBindingType::Filtering
            }),
            naga::TypeInner::Image { dim, arrayed, class } => {
                let view_dimension = view_dimension(*dim, *arrayed);
                match class {
                    naga::ImageClass::Sampled { kind, multi } => wgpu::BindingType::Texture {
                        sample_type: match kind {
                            naga::ScalarKind::Sint => wgpu::TextureSampleType::Sint,
                            naga::ScalarKind::Uint => wgpu::TextureSampleType::Uint,
                            _ => wgpu::TextureSampleType::Float { filterable: true },
                        },
                        view_dimension,
                        multisampled: *multi,
                    },
                    naga::ImageClass::Depth { multi } => wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Depth,
                        view_dimension,
                        multisampled: *multi,
                    },
                    naga::ImageClass::Storage { format: storage, access } => wgpu::BindingType::StorageTexture {
                        access: storage_access(*access),
                        format: format::storage_format(*storage).ok_or_else(|| format!("storage texture format {storage:?} is not supported"))?,
                        view_dimension,
                    },
                }
            }
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };
    Ok(Some(ty))
}
