//! Lazily materialised GPU resources
//!
//! Every buffer, texture and sampler used by a shader unit starts life as a *description* of how
//! to build it. The first time an encode needs the backend object, [`LazyResource::resolve`]
//! invokes the backend creation primitive once, stores the resulting handle together with the
//! metadata needed later (element count, byte length, pixel size and format) and drops the
//! description. Subsequent resolves return the cached handle without touching the backend.
//!
//! Resolution needs `&mut self`, so two threads can never race on the first resolve of the same
//! cell. When several owners need one backend object, each holds its own [`LazyResource`] whose
//! description points at a [`SharedResource`]: a guarded cell that performs the check-and-set
//! under a mutex.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::backend::Backend;
use crate::{Error, Result};

mod buffer;
mod constant;
mod sampler;
mod texture;

pub use buffer::{BufferHandle, BufferSource, DeferredBuffer, LazyBuffer, SharedBuffer};
pub use constant::{ConstantBytes, HostBytes, Uniform};
pub use sampler::{LazySampler, SamplerSource};
pub use texture::{DeferredTexture, LazyTexture, SharedTexture, TextureHandle, TextureSource};

/// A description that can be turned into a backend object
pub trait Realize {
    type Backend: Backend;
    /// Handle plus the metadata cached next to it
    type Output: Clone;

    /// Name used in logs and error messages
    fn label(&self) -> &str;

    /// Builds the backend object; called at most once per [`LazyResource`]
    fn realize(&mut self, backend: &Self::Backend) -> Result<Self::Output>;
}

#[derive(Clone)]
enum State<D: Realize> {
    Description(D),
    Handle(D::Output),
}

/// A resource that is either still a description or an already-built handle
///
/// The transition from description to handle happens exactly once and never reverts.
#[derive(Clone)]
pub struct LazyResource<D: Realize> {
    label: Arc<str>,
    state: State<D>,
}

impl<D: Realize> LazyResource<D> {
    /// Wraps a description that has not been built yet
    pub fn new(description: D) -> Self {
        Self {
            label: description.label().into(),
            state: State::Description(description),
        }
    }

    /// Wraps an already-built handle
    pub fn from_handle(label: impl Into<Arc<str>>, handle: D::Output) -> Self {
        Self {
            label: label.into(),
            state: State::Handle(handle),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether the backend object exists
    pub fn is_resolved(&self) -> bool {
        matches!(self.state, State::Handle(_))
    }

    /// Returns the handle, building it on first call
    ///
    /// # Arguments
    /// * `backend` - Backend whose creation primitives are used on the first call
    ///
    /// # Returns
    /// The cached handle; the backend is only called when the resource was still a description
    pub fn resolve(&mut self, backend: &D::Backend) -> Result<&D::Output> {
        if let State::Description(description) = &mut self.state {
            let handle = description.realize(backend)?;
            debug!(resource = %self.label, "resolved lazy resource");
            self.state = State::Handle(handle);
        }

        match &self.state {
            State::Handle(handle) => Ok(handle),
            State::Description(_) => unreachable!("lazy resource left unresolved after a successful realize"),
        }
    }

    /// The handle if it has been resolved
    pub fn handle(&self) -> Result<&D::Output> {
        match &self.state {
            State::Handle(handle) => Ok(handle),
            State::Description(_) => Err(Error::Unresolved { object: self.label.to_string() }),
        }
    }

    /// The pending description, if the resource has not been resolved
    pub fn description(&self) -> Option<&D> {
        match &self.state {
            State::Description(description) => Some(description),
            State::Handle(_) => None,
        }
    }

    /// Mutable access to the pending description, for settings only known at encode time
    pub fn description_mut(&mut self) -> Option<&mut D> {
        match &mut self.state {
            State::Description(description) => Some(description),
            State::Handle(_) => None,
        }
    }
}

impl<D: Realize> fmt::Debug for LazyResource<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyResource")
            .field("label", &self.label)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// A lazy resource behind a mutex, shared by several owners
///
/// Resolution is a guarded check-and-set: whichever owner resolves first builds the backend
/// object, every other owner receives a clone of the same handle.
pub struct SharedResource<D: Realize> {
    label: Arc<str>,
    cell: Arc<Mutex<LazyResource<D>>>,
}

impl<D: Realize> SharedResource<D> {
    pub fn new(description: D) -> Self {
        let lazy = LazyResource::new(description);
        Self {
            label: lazy.label.clone(),
            cell: Arc::new(Mutex::new(lazy)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner).is_resolved()
    }

    /// Resolves the shared cell and returns a clone of its handle
    pub fn resolve(&self, backend: &D::Backend) -> Result<D::Output> {
        // A panic inside realize leaves the cell as a description, so a poisoned lock is still consistent.
        let mut cell = self.cell.lock().unwrap_or_else(PoisonError::into_inner);
        cell.resolve(backend).cloned()
    }
}

impl<D: Realize> Clone for SharedResource<D> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            cell: self.cell.clone(),
        }
    }
}

impl<D: Realize> fmt::Debug for SharedResource<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResource").field("label", &self.label).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::RecordingBackend;

    /// Counts how often it is realised
    struct Counted {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Realize for Counted {
        type Backend = RecordingBackend;
        type Output = usize;

        fn label(&self) -> &str {
            "counted"
        }

        fn realize(&mut self, _backend: &RecordingBackend) -> Result<usize> {
            if self.fail {
                return Err(Error::configuration("counted", "refused"));
            }
            Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 100)
        }
    }

    #[test]
    fn resolve_realizes_once_and_caches() {
        let backend = RecordingBackend::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut lazy = LazyResource::new(Counted { calls: calls.clone(), fail: false });

        assert!(matches!(lazy.handle(), Err(Error::Unresolved { .. })));
        let first = *lazy.resolve(&backend).unwrap();
        let second = *lazy.resolve(&backend).unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(lazy.is_resolved());
        assert!(lazy.description().is_none());
    }

    #[test]
    fn failed_resolution_keeps_the_description() {
        let backend = RecordingBackend::new();
        let mut lazy = LazyResource::new(Counted {
            calls: Arc::default(),
            fail: true,
        });

        assert!(lazy.resolve(&backend).is_err());
        assert!(!lazy.is_resolved());
        assert!(lazy.description().is_some());
    }

    #[test]
    fn shared_cells_realize_once_across_clones() {
        let backend = RecordingBackend::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = SharedResource::new(Counted { calls: calls.clone(), fail: false });
        let other = shared.clone();

        assert_eq!(shared.resolve(&backend).unwrap(), other.resolve(&backend).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(other.is_resolved());
    }
}
