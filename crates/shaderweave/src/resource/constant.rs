//! Inline constant data pushed straight into the encoder

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use bytemuck::Pod;
use bytes::Bytes;

/// CPU-side bytes shared between the caller and the values that upload them
///
/// Writes made through any clone are seen by the next encode.
#[derive(Clone, Default)]
pub struct HostBytes(Arc<Mutex<Vec<u8>>>);

impl HostBytes {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(Mutex::new(bytes.into())))
    }

    /// Replaces the contents
    pub fn replace(&self, bytes: &[u8]) {
        let mut guard = self.lock();
        guard.clear();
        guard.extend_from_slice(bytes);
    }

    /// Runs `f` with the current contents
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Two values are equal when they share the same storage
impl PartialEq for HostBytes {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for HostBytes {}

impl fmt::Debug for HostBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostBytes").field(&self.len()).finish()
    }
}

/// A typed value the caller updates between frames
///
/// ```
/// # use shaderweave::resource::Uniform;
/// let time = Uniform::new(0.0f32);
/// time.set(1.5);
/// assert_eq!(time.get(), 1.5);
/// ```
pub struct Uniform<T: Pod> {
    bytes: HostBytes,
    _marker: PhantomData<T>,
}

impl<T: Pod> Uniform<T> {
    pub fn new(value: T) -> Self {
        Self {
            bytes: HostBytes::new(bytemuck::bytes_of(&value)),
            _marker: PhantomData,
        }
    }

    pub fn set(&self, value: T) {
        self.bytes.replace(bytemuck::bytes_of(&value));
    }

    pub fn get(&self) -> T {
        self.bytes.with(|bytes| bytemuck::pod_read_unaligned(bytes))
    }

    /// Updates the value in place
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut value = self.get();
        f(&mut value);
        self.set(value);
    }

    /// The shared bytes backing this value
    pub fn host_bytes(&self) -> &HostBytes {
        &self.bytes
    }

    /// An inline constant that reads the current value on every encode
    pub fn constant(&self, label: impl Into<String>) -> ConstantBytes {
        ConstantBytes::Host {
            label: label.into(),
            bytes: self.bytes.clone(),
        }
    }
}

impl<T: Pod> Clone for Uniform<T> {
    fn clone(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Pod + fmt::Debug> fmt::Debug for Uniform<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Uniform").field(&self.get()).finish()
    }
}

/// Small constant data bound with `set_bytes` instead of a buffer
///
/// Constants are never turned into a cached backend resource; they are pushed again on every
/// encode so per-frame changes are picked up.
#[derive(Debug, Clone)]
pub enum ConstantBytes {
    /// Fixed bytes
    Owned { label: String, bytes: Bytes },
    /// Bytes shared with a [`Uniform`] or other writer
    Host { label: String, bytes: HostBytes },
}

impl ConstantBytes {
    /// A constant holding a single value
    pub fn from_value<T: Pod>(label: impl Into<String>, value: &T) -> Self {
        Self::Owned {
            label: label.into(),
            bytes: Bytes::copy_from_slice(bytemuck::bytes_of(value)),
        }
    }

    /// A constant holding an array of values
    pub fn from_slice<T: Pod>(label: impl Into<String>, values: &[T]) -> Self {
        Self::Owned {
            label: label.into(),
            bytes: Bytes::copy_from_slice(bytemuck::cast_slice(values)),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Owned { label, .. } | Self::Host { label, .. } => label,
        }
    }

    /// Runs `f` with the bytes to push for this encode
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        match self {
            Self::Owned { bytes, .. } => f(bytes),
            Self::Host { bytes, .. } => bytes.with(f),
        }
    }
}
