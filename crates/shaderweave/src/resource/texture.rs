//! Texture descriptions and their resolved form

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::{LazyResource, Realize, SharedResource};
use crate::backend::{Backend, TextureDescriptor, TextureInfo};
use crate::{Error, Extent3d, PixelFormat, Result, TextureUsage};

/// A resolved texture with its size, format and usage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureHandle<T> {
    pub texture: T,
    pub info: TextureInfo,
}

impl<T> TextureHandle<T> {
    pub fn size(&self) -> Extent3d {
        self.info.size
    }

    pub fn format(&self) -> PixelFormat {
        self.info.format
    }
}

/// Closure building a texture when the engine first needs it
pub type DeferredTexture<B> = Arc<dyn Fn(&B) -> Result<TextureHandle<<B as Backend>::Texture>> + Send + Sync>;

/// How to build a texture
pub enum TextureSource<B: Backend> {
    /// Allocate from a descriptor
    New(TextureDescriptor),
    /// Allocate an empty texture shaped like `template`, which is resolved first
    Like {
        label: String,
        template: Box<LazyTexture<B>>,
        format: Option<PixelFormat>,
        usage: Option<TextureUsage>,
    },
    /// Wrap a texture that already exists
    Existing { label: String, texture: B::Texture },
    /// Decode an image file into an sRGB RGBA texture of the same size
    Path { label: String, path: PathBuf, usage: TextureUsage },
    /// Let a closure build it
    Deferred { label: String, build: DeferredTexture<B> },
    /// Resolve through a cell shared with other owners
    Shared(SharedTexture<B>),
}

/// A texture that is created on first use
pub type LazyTexture<B> = LazyResource<TextureSource<B>>;

/// A texture cell several lazy textures resolve through
pub type SharedTexture<B> = SharedResource<TextureSource<B>>;

fn allocate<B: Backend>(backend: &B, descriptor: &TextureDescriptor) -> Result<TextureHandle<B::Texture>> {
    if descriptor.size.is_empty() {
        return Err(Error::configuration(descriptor.label.as_str(), format!("texture size {:?} has a zero axis", descriptor.size)));
    }

    let texture = backend.create_texture(descriptor).map_err(|err| Error::from_backend(descriptor.label.as_str(), err))?;
    Ok(TextureHandle {
        texture,
        info: TextureInfo {
            size: descriptor.size,
            format: descriptor.effective_format(),
            usage: descriptor.usage,
        },
    })
}

fn load_image<B: Backend>(backend: &B, label: &str, path: &Path, usage: TextureUsage) -> Result<TextureHandle<B::Texture>> {
    let image = image::open(path)
        .map_err(|err| Error::configuration(label, format!("cannot load {}: {err}", path.display())))?
        .to_rgba8();
    let (width, height) = image.dimensions();

    let descriptor = TextureDescriptor::new_2d(label, width, height, PixelFormat::Rgba8UnormSrgb, usage | TextureUsage::COPY_DST);
    let handle = allocate(backend, &descriptor)?;
    backend
        .write_texture(&handle.texture, image.as_raw(), width * 4, handle.size())
        .map_err(|err| Error::from_backend(label, err))?;
    debug!(texture = label, path = %path.display(), width, height, "loaded texture from image file");
    Ok(handle)
}

impl<B: Backend> Realize for TextureSource<B> {
    type Backend = B;
    type Output = TextureHandle<B::Texture>;

    fn label(&self) -> &str {
        match self {
            Self::New(descriptor) => &descriptor.label,
            Self::Like { label, .. } | Self::Existing { label, .. } | Self::Path { label, .. } | Self::Deferred { label, .. } => label,
            Self::Shared(shared) => shared.label(),
        }
    }

    fn realize(&mut self, backend: &B) -> Result<Self::Output> {
        match self {
            Self::New(descriptor) => allocate(backend, descriptor),
            Self::Like { label, template, format, usage } => {
                let info = template.resolve(backend)?.info;
                let descriptor = TextureDescriptor {
                    label: label.clone(),
                    size: info.size,
                    format: format.unwrap_or(info.format),
                    usage: usage.unwrap_or(info.usage),
                    mip_level_count: 1,
                };
                allocate(backend, &descriptor)
            }
            Self::Existing { label, texture } => {
                let info = backend.texture_info(texture).map_err(|err| Error::from_backend(label.as_str(), err))?;
                Ok(TextureHandle { texture: texture.clone(), info })
            }
            Self::Path { label, path, usage } => load_image(backend, label, path, *usage),
            Self::Deferred { build, .. } => {
                let build = &**build;
                build(backend)
            }
            Self::Shared(shared) => shared.resolve(backend),
        }
    }
}

impl<B: Backend> Clone for TextureSource<B> {
    fn clone(&self) -> Self {
        match self {
            Self::New(descriptor) => Self::New(descriptor.clone()),
            Self::Like { label, template, format, usage } => Self::Like {
                label: label.clone(),
                template: template.clone(),
                format: *format,
                usage: *usage,
            },
            Self::Existing { label, texture } => Self::Existing {
                label: label.clone(),
                texture: texture.clone(),
            },
            Self::Path { label, path, usage } => Self::Path {
                label: label.clone(),
                path: path.clone(),
                usage: *usage,
            },
            Self::Deferred { label, build } => Self::Deferred {
                label: label.clone(),
                build: build.clone(),
            },
            Self::Shared(shared) => Self::Shared(shared.clone()),
        }
    }
}

impl<B: Backend> fmt::Debug for TextureSource<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New(descriptor) => f.debug_tuple("New").field(descriptor).finish(),
            Self::Like { label, template, .. } => f.debug_struct("Like").field("label", label).field("template", template).finish_non_exhaustive(),
            Self::Existing { label, texture } => f.debug_struct("Existing").field("label", label).field("texture", texture).finish(),
            Self::Path { label, path, usage } => f.debug_struct("Path").field("label", label).field("path", path).field("usage", usage).finish(),
            Self::Deferred { label, .. } => f.debug_struct("Deferred").field("label", label).finish_non_exhaustive(),
            Self::Shared(shared) => f.debug_tuple("Shared").field(shared).finish(),
        }
    }
}

impl<B: Backend> LazyResource<TextureSource<B>> {
    /// A texture built from a full descriptor
    pub fn from_descriptor(descriptor: TextureDescriptor) -> Self {
        Self::new(TextureSource::New(descriptor))
    }

    /// A single-mip 2-D texture
    pub fn new_2d(label: impl Into<String>, width: u32, height: u32, format: PixelFormat, usage: TextureUsage) -> Self {
        Self::from_descriptor(TextureDescriptor::new_2d(label, width, height, format, usage))
    }

    /// An empty texture with the size, format and usage of `template`
    pub fn like(label: impl Into<String>, template: LazyTexture<B>) -> Self {
        Self::new(TextureSource::Like {
            label: label.into(),
            template: Box::new(template),
            format: None,
            usage: None,
        })
    }

    /// An empty texture with the size of `template` but its own format and usage
    pub fn like_with(label: impl Into<String>, template: LazyTexture<B>, format: PixelFormat, usage: TextureUsage) -> Self {
        Self::new(TextureSource::Like {
            label: label.into(),
            template: Box::new(template),
            format: Some(format),
            usage: Some(usage),
        })
    }

    /// Wraps an existing backend texture; its metadata is queried on resolve
    pub fn from_texture(label: impl Into<String>, texture: B::Texture) -> Self {
        Self::new(TextureSource::Existing { label: label.into(), texture })
    }

    /// Loads an image file on first use
    ///
    /// The texture is `Rgba8UnormSrgb` sized like the image; `COPY_DST` is added to `usage`.
    pub fn from_path(label: impl Into<String>, path: impl Into<PathBuf>, usage: TextureUsage) -> Self {
        Self::new(TextureSource::Path {
            label: label.into(),
            path: path.into(),
            usage,
        })
    }

    /// Defers construction to a closure
    pub fn deferred<F>(label: impl Into<String>, build: F) -> Self
    where
        F: Fn(&B) -> Result<TextureHandle<B::Texture>> + Send + Sync + 'static,
    {
        Self::new(TextureSource::Deferred {
            label: label.into(),
            build: Arc::new(build),
        })
    }

    /// Resolves through a shared cell
    pub fn shared(shared: &SharedTexture<B>) -> Self {
        Self::new(TextureSource::Shared(shared.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordingBackend;
    use crate::backend::recording::Creation;

    type Texture = LazyTexture<RecordingBackend>;

    #[test]
    fn new_textures_cache_their_metadata() {
        let backend = RecordingBackend::new();
        let mut texture = Texture::new_2d("albedo", 640, 480, PixelFormat::Rgba8Unorm, TextureUsage::SHADER_READ);

        let first = texture.resolve(&backend).unwrap().clone();
        let second = texture.resolve(&backend).unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(first.size(), Extent3d::new_2d(640, 480));
        assert_eq!(backend.creation_count("albedo"), 1);
    }

    #[test]
    fn image_files_are_decoded_and_uploaded() {
        let path = std::env::temp_dir().join(format!("shaderweave-texture-{}.png", std::process::id()));
        let pixels = image::RgbaImage::from_fn(3, 2, |x, y| image::Rgba([x as u8 * 40, y as u8 * 90, 7, 255]));
        pixels.save(&path).unwrap();

        let backend = RecordingBackend::new();
        let mut texture = Texture::from_path("photo", &path, TextureUsage::SHADER_READ);
        let handle = texture.resolve(&backend).unwrap().clone();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(handle.size(), Extent3d::new_2d(3, 2));
        assert_eq!(handle.format(), PixelFormat::Rgba8UnormSrgb);
        assert!(handle.info.usage.contains(TextureUsage::COPY_DST));
        assert_eq!(backend.texture_contents(&handle.texture), pixels.into_raw());
        assert_eq!(backend.creation_count("photo"), 1);
    }

    #[test]
    fn unreadable_image_files_are_configuration_errors() {
        let backend = RecordingBackend::new();
        let mut texture = Texture::from_path("photo", "/nonexistent/shaderweave/photo.png", TextureUsage::SHADER_READ);

        match texture.resolve(&backend) {
            Err(Error::Configuration { object, reason }) => {
                assert_eq!(object, "photo");
                assert!(reason.contains("photo.png"), "{reason}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(backend.creations().is_empty());
        assert!(!texture.is_resolved());
    }

    #[test]
    fn writable_srgb_textures_resolve_with_a_linear_format() {
        let backend = RecordingBackend::new();
        let mut texture = Texture::new_2d("output", 8, 8, PixelFormat::Bgra8UnormSrgb, TextureUsage::READ_WRITE);
        assert_eq!(texture.resolve(&backend).unwrap().format(), PixelFormat::Bgra8Unorm);
    }

    #[test]
    fn copies_inherit_the_template_shape() {
        let backend = RecordingBackend::new();
        let source = Texture::new_2d("source", 32, 16, PixelFormat::Rgba16Float, TextureUsage::SHADER_READ);
        let mut copy = Texture::like_with("scratch", source, PixelFormat::R32Float, TextureUsage::READ_WRITE);

        let handle = copy.resolve(&backend).unwrap();
        assert_eq!(handle.size(), Extent3d::new_2d(32, 16));
        assert_eq!(handle.format(), PixelFormat::R32Float);
        assert_eq!(
            backend.creations(),
            vec![
                Creation::Texture {
                    label: "source".into(),
                    size: Extent3d::new_2d(32, 16),
                    format: PixelFormat::Rgba16Float
                },
                Creation::Texture {
                    label: "scratch".into(),
                    size: Extent3d::new_2d(32, 16),
                    format: PixelFormat::R32Float
                },
            ]
        );
    }

    #[test]
    fn zero_sized_textures_are_rejected_before_the_backend() {
        let backend = RecordingBackend::new();
        let mut texture = Texture::new_2d("empty", 0, 4, PixelFormat::R8Unorm, TextureUsage::SHADER_READ);
        assert!(matches!(texture.resolve(&backend), Err(Error::Configuration { .. })));
        assert!(backend.creations().is_empty());
    }

    #[test]
    fn existing_textures_are_queried_not_created() {
        let backend = RecordingBackend::new();
        let raw = backend
            .create_texture(&TextureDescriptor::new_2d("swapchain", 4, 4, PixelFormat::Bgra8Unorm, TextureUsage::RENDER_TARGET))
            .unwrap();
        backend.clear_log();

        let mut texture = Texture::from_texture("swapchain", raw.clone());
        assert_eq!(texture.resolve(&backend).unwrap().texture, raw);
        assert!(backend.creations().is_empty());
    }
}
