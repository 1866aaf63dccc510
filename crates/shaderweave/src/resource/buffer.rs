//! Buffer descriptions and their resolved form

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use bytes::Bytes;

use super::{HostBytes, LazyResource, Realize, SharedResource, Uniform};
use crate::backend::{Backend, BufferDescriptor};
use crate::{BufferUsage, Error, Result};

/// A resolved buffer and the metadata cached with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferHandle<T> {
    pub buffer: T,
    /// Number of logical elements, used by element-count dispatch sizes
    pub element_count: usize,
    pub byte_len: u64,
    /// CPU-side bytes that are uploaded again before every encode
    pub host: Option<HostBytes>,
}

impl<T> BufferHandle<T> {
    pub fn new(buffer: T, element_count: usize, byte_len: u64) -> Self {
        Self {
            buffer,
            element_count,
            byte_len,
            host: None,
        }
    }
}

/// Closure building a buffer when the engine first needs it
pub type DeferredBuffer<B> = Arc<dyn Fn(&B) -> Result<BufferHandle<<B as Backend>::Buffer>> + Send + Sync>;

/// How to build a buffer
pub enum BufferSource<B: Backend> {
    /// Upload these bytes
    Contents {
        label: String,
        bytes: Bytes,
        element_count: usize,
        usage: BufferUsage,
    },
    /// Allocate zero-initialised storage for `element_count` elements of `element_size` bytes
    Zeroed {
        label: String,
        element_size: usize,
        element_count: usize,
        usage: BufferUsage,
    },
    /// Allocate from CPU bytes that later writes keep in sync with the GPU copy
    Host {
        label: String,
        bytes: HostBytes,
        element_count: usize,
        usage: BufferUsage,
    },
    /// Wrap a buffer that already exists
    Existing { label: String, buffer: B::Buffer, element_count: usize },
    /// Let a closure build it
    Deferred { label: String, build: DeferredBuffer<B> },
    /// Resolve through a cell shared with other owners
    Shared(SharedBuffer<B>),
}

/// A buffer that is created on first use
pub type LazyBuffer<B> = LazyResource<BufferSource<B>>;

/// A buffer cell several lazy buffers resolve through
pub type SharedBuffer<B> = SharedResource<BufferSource<B>>;

impl<B: Backend> BufferSource<B> {
    fn allocate(backend: &B, label: &str, size: u64, usage: BufferUsage, contents: Option<&[u8]>) -> Result<B::Buffer> {
        let descriptor = BufferDescriptor { label, size, usage };
        backend.create_buffer(&descriptor, contents).map_err(|err| Error::from_backend(label, err))
    }
}

impl<B: Backend> Realize for BufferSource<B> {
    type Backend = B;
    type Output = BufferHandle<B::Buffer>;

    fn label(&self) -> &str {
        match self {
            Self::Contents { label, .. } | Self::Zeroed { label, .. } | Self::Host { label, .. } | Self::Existing { label, .. } | Self::Deferred { label, .. } => label,
            Self::Shared(shared) => shared.label(),
        }
    }

    fn realize(&mut self, backend: &B) -> Result<Self::Output> {
        match self {
            Self::Contents {
                label,
                bytes,
                element_count,
                usage,
            } => {
                let buffer = Self::allocate(backend, label, bytes.len() as u64, *usage, Some(bytes.as_ref()))?;
                Ok(BufferHandle::new(buffer, *element_count, bytes.len() as u64))
            }
            Self::Zeroed {
                label,
                element_size,
                element_count,
                usage,
            } => {
                let size = element_size
                    .checked_mul(*element_count)
                    .ok_or_else(|| Error::configuration(label.as_str(), format!("{element_count} elements of {element_size} bytes overflow")))?;
                if size == 0 {
                    return Err(Error::configuration(label.as_str(), "buffer would be empty"));
                }
                let buffer = Self::allocate(backend, label, size as u64, *usage, None)?;
                Ok(BufferHandle::new(buffer, *element_count, size as u64))
            }
            Self::Host {
                label,
                bytes,
                element_count,
                usage,
            } => {
                let contents = bytes.with(<[u8]>::to_vec);
                let buffer = Self::allocate(backend, label, contents.len() as u64, *usage | BufferUsage::COPY_DST, Some(contents.as_slice()))?;
                Ok(BufferHandle {
                    host: Some(bytes.clone()),
                    ..BufferHandle::new(buffer, *element_count, contents.len() as u64)
                })
            }
            Self::Existing { buffer, element_count, .. } => {
                let byte_len = backend.buffer_size(buffer);
                Ok(BufferHandle::new(buffer.clone(), *element_count, byte_len))
            }
            Self::Deferred { build, .. } => {
                let build = &**build;
                build(backend)
            }
            Self::Shared(shared) => shared.resolve(backend),
        }
    }
}

impl<B: Backend> Clone for BufferSource<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Contents {
                label,
                bytes,
                element_count,
                usage,
            } => Self::Contents {
                label: label.clone(),
                bytes: bytes.clone(),
                element_count: *element_count,
                usage: *usage,
            },
            Self::Zeroed {
                label,
                element_size,
                element_count,
                usage,
            } => Self::Zeroed {
                label: label.clone(),
                element_size: *element_size,
                element_count: *element_count,
                usage: *usage,
            },
            Self::Host {
                label,
                bytes,
                element_count,
                usage,
            } => Self::Host {
                label: label.clone(),
                bytes: bytes.clone(),
                element_count: *element_count,
                usage: *usage,
            },
            Self::Existing { label, buffer, element_count } => Self::Existing {
                label: label.clone(),
                buffer: buffer.clone(),
                element_count: *element_count,
            },
            Self::Deferred { label, build } => Self::Deferred {
                label: label.clone(),
                build: build.clone(),
            },
            Self::Shared(shared) => Self::Shared(shared.clone()),
        }
    }
}

impl<B: Backend> fmt::Debug for BufferSource<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Contents { .. } => "Contents",
            Self::Zeroed { .. } => "Zeroed",
            Self::Host { .. } => "Host",
            Self::Existing { .. } => "Existing",
            Self::Deferred { .. } => "Deferred",
            Self::Shared(_) => "Shared",
        };
        f.debug_struct("BufferSource").field("kind", &kind).field("label", &self.label()).finish()
    }
}

impl<B: Backend> LazyResource<BufferSource<B>> {
    /// A buffer initialised with a copy of `values`
    pub fn from_slice<T: Pod>(label: impl Into<String>, values: &[T], usage: BufferUsage) -> Self {
        Self::new(BufferSource::Contents {
            label: label.into(),
            bytes: Bytes::copy_from_slice(bytemuck::cast_slice(values)),
            element_count: values.len(),
            usage,
        })
    }

    /// A buffer initialised with raw bytes counted as one element per byte
    pub fn from_bytes(label: impl Into<String>, bytes: impl Into<Bytes>, usage: BufferUsage) -> Self {
        let bytes = bytes.into();
        Self::new(BufferSource::Contents {
            label: label.into(),
            element_count: bytes.len(),
            bytes,
            usage,
        })
    }

    /// Zero-initialised storage for `element_count` values of `T`
    pub fn zeroed<T: Pod>(label: impl Into<String>, element_count: usize, usage: BufferUsage) -> Self {
        Self::new(BufferSource::Zeroed {
            label: label.into(),
            element_size: size_of::<T>(),
            element_count,
            usage,
        })
    }

    /// A buffer mirroring a [`Uniform`]; the current value is uploaded before each encode
    pub fn from_uniform<T: Pod>(label: impl Into<String>, uniform: &Uniform<T>, usage: BufferUsage) -> Self {
        Self::new(BufferSource::Host {
            label: label.into(),
            bytes: uniform.host_bytes().clone(),
            element_count: 1,
            usage,
        })
    }

    /// Wraps an existing backend buffer
    pub fn from_buffer(label: impl Into<String>, buffer: B::Buffer, element_count: usize) -> Self {
        Self::new(BufferSource::Existing {
            label: label.into(),
            buffer,
            element_count,
        })
    }

    /// Defers construction to a closure
    pub fn deferred<F>(label: impl Into<String>, build: F) -> Self
    where
        F: Fn(&B) -> Result<BufferHandle<B::Buffer>> + Send + Sync + 'static,
    {
        Self::new(BufferSource::Deferred {
            label: label.into(),
            build: Arc::new(build),
        })
    }

    /// Resolves through a shared cell
    pub fn shared(shared: &SharedBuffer<B>) -> Self {
        Self::new(BufferSource::Shared(shared.clone()))
    }

    /// Uploads new contents into the buffer, resolving it first if needed
    ///
    /// # Arguments
    /// * `backend` - Backend owning the buffer
    /// * `offset` - Byte offset of the write
    /// * `values` - Values to write
    pub fn write<T: Pod>(&mut self, backend: &B, offset: u64, values: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let byte_len = self.resolve(backend)?.byte_len;
        if offset.checked_add(bytes.len() as u64).is_none_or(|end| end > byte_len) {
            return Err(Error::configuration(
                self.label(),
                format!("write of {} bytes at offset {offset} exceeds buffer length {byte_len}", bytes.len()),
            ));
        }
        backend
            .write_buffer(&self.handle()?.buffer, offset, bytes)
            .map_err(|err| Error::from_backend(self.label(), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordingBackend;
    use crate::backend::recording::Creation;

    #[test]
    fn slices_record_element_count_and_length() {
        let backend = RecordingBackend::new();
        let mut buffer = LazyBuffer::<RecordingBackend>::from_slice("weights", &[1.0f32, 2.0, 3.0], BufferUsage::STORAGE);

        let handle = buffer.resolve(&backend).unwrap().clone();
        assert_eq!(handle.element_count, 3);
        assert_eq!(handle.byte_len, 12);
        assert_eq!(backend.buffer_contents(&handle.buffer), bytemuck::cast_slice::<f32, u8>(&[1.0, 2.0, 3.0]));

        buffer.resolve(&backend).unwrap();
        assert_eq!(backend.creation_count("weights"), 1);
    }

    #[test]
    fn zeroed_buffers_are_sized_from_the_element_type() {
        let backend = RecordingBackend::new();
        let mut buffer = LazyBuffer::<RecordingBackend>::zeroed::<[f32; 4]>("particles", 10, BufferUsage::default());

        assert_eq!(buffer.resolve(&backend).unwrap().byte_len, 160);
        assert_eq!(backend.creations(), vec![Creation::Buffer {
            label: "particles".into(),
            size: 160
        }]);
    }

    #[test]
    fn empty_zeroed_buffers_are_a_configuration_error() {
        let backend = RecordingBackend::new();
        let mut buffer = LazyBuffer::<RecordingBackend>::zeroed::<u32>("nothing", 0, BufferUsage::default());
        assert!(matches!(buffer.resolve(&backend), Err(Error::Configuration { .. })));
    }

    #[test]
    fn allocation_failure_names_the_buffer() {
        let backend = RecordingBackend::new().with_memory_limit(8);
        let mut buffer = LazyBuffer::<RecordingBackend>::zeroed::<u64>("histogram", 256, BufferUsage::default());

        match buffer.resolve(&backend) {
            Err(Error::ResourceExhausted { object, .. }) => assert_eq!(object, "histogram"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!buffer.is_resolved());
    }

    #[test]
    fn writes_are_bounds_checked() {
        let backend = RecordingBackend::new();
        let mut buffer = LazyBuffer::<RecordingBackend>::zeroed::<u32>("counters", 2, BufferUsage::default());

        buffer.write(&backend, 4, &[7u32]).unwrap();
        let handle = buffer.handle().unwrap();
        assert_eq!(backend.buffer_contents(&handle.buffer), vec![0, 0, 0, 0, 7, 0, 0, 0]);
        assert!(buffer.write(&backend, 4, &[1u32, 2]).is_err());
    }

    #[test]
    fn writes_at_huge_offsets_are_rejected_without_wrapping() {
        let backend = RecordingBackend::new();
        let mut buffer = LazyBuffer::<RecordingBackend>::zeroed::<u32>("counters", 2, BufferUsage::default());

        let err = buffer.write(&backend, u64::MAX - 1, &[7u32]).unwrap_err();
        assert!(matches!(err, Error::Configuration { ref object, .. } if object == "counters"), "{err}");
        assert_eq!(backend.buffer_contents(&buffer.handle().unwrap().buffer), vec![0; 8]);
    }

    #[test]
    fn shared_buffers_are_created_once_for_every_owner() {
        let backend = RecordingBackend::new();
        let shared = SharedBuffer::new(BufferSource::Zeroed {
            label: "lut".into(),
            element_size: 4,
            element_count: 64,
            usage: BufferUsage::default(),
        });
        let mut first = LazyBuffer::shared(&shared);
        let mut second = LazyBuffer::shared(&shared);

        let a = first.resolve(&backend).unwrap().buffer.id;
        let b = second.resolve(&backend).unwrap().buffer.id;
        assert_eq!(a, b);
        assert_eq!(backend.creation_count("lut"), 1);
    }

    #[test]
    fn deferred_buffers_receive_the_backend() {
        let backend = RecordingBackend::new();
        let mut buffer = LazyBuffer::<RecordingBackend>::deferred("indirect", |backend: &RecordingBackend| {
            let descriptor = BufferDescriptor {
                label: "indirect",
                size: 12,
                usage: BufferUsage::default(),
            };
            let raw = backend.create_buffer(&descriptor, None).map_err(|err| Error::from_backend("indirect", err))?;
            Ok(BufferHandle::new(raw, 3, 12))
        });

        assert_eq!(buffer.resolve(&backend).unwrap().element_count, 3);
        assert_eq!(backend.creation_count("indirect"), 1);
    }
}
