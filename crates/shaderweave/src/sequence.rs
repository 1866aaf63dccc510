//! Ordered steps that each get their own submission
//!
//! An [`OperationSet`] is run by [`Renderer::run_set`](crate::Renderer::run_set). Every
//! [`Step::Submit`] is encoded into a fresh command buffer, committed and awaited before the next
//! step starts, so a host step placed after it sees the finished GPU results. Host steps run on
//! the calling task with the backend and never touch a command buffer.

use std::fmt;
use std::sync::Arc;

use crate::backend::Backend;
use crate::operation::Operation;
use crate::resource::{SharedTexture, TextureHandle};
use crate::Result;

/// Closure run on the host between submissions
pub type HostFn<B> = Arc<dyn Fn(&B) -> Result<()> + Send + Sync>;

/// One entry of an [`OperationSet`]
pub enum Step<B: Backend> {
    /// Encode into its own command buffer and wait for the GPU
    Submit(Operation<B>),
    /// Run a closure with the backend
    Execute { label: String, run: HostFn<B> },
}

impl<B: Backend> Step<B> {
    /// A host closure receiving the backend
    pub fn execute<F>(label: impl Into<String>, run: F) -> Self
    where
        F: Fn(&B) -> Result<()> + Send + Sync + 'static,
    {
        Self::Execute {
            label: label.into(),
            run: Arc::new(run),
        }
    }

    /// Hands the resolved texture to `write` once every earlier submission has completed
    ///
    /// The texture is resolved through the shared cell, so it is the same object the earlier
    /// steps rendered into. Resolving it here creates it if no earlier step did.
    pub fn export<F>(label: impl Into<String>, texture: &SharedTexture<B>, write: F) -> Self
    where
        F: Fn(&B, &TextureHandle<B::Texture>) -> Result<()> + Send + Sync + 'static,
    {
        let texture = texture.clone();
        Self::execute(label, move |backend: &B| {
            let handle = texture.resolve(backend)?;
            write(backend, &handle)
        })
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Submit(_) => "submit",
            Self::Execute { label, .. } => label,
        }
    }
}

impl<B: Backend> From<Operation<B>> for Step<B> {
    fn from(operation: Operation<B>) -> Self {
        Self::Submit(operation)
    }
}

impl<B: Backend> fmt::Debug for Step<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submit(operation) => f.debug_tuple("Submit").field(operation).finish(),
            Self::Execute { label, .. } => f.debug_struct("Execute").field("label", label).finish_non_exhaustive(),
        }
    }
}

/// Steps run strictly one after another
pub struct OperationSet<B: Backend> {
    steps: Vec<Step<B>>,
}

impl<B: Backend> OperationSet<B> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Appends a step
    pub fn then(mut self, step: impl Into<Step<B>>) -> Self {
        self.steps.push(step.into());
        self
    }

    pub fn push(&mut self, step: impl Into<Step<B>>) {
        self.steps.push(step.into());
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step<B>] {
        &self.steps
    }

    pub(crate) fn steps_mut(&mut self) -> &mut [Step<B>] {
        &mut self.steps
    }
}

impl<B: Backend> Default for OperationSet<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend, S: Into<Step<B>>> FromIterator<S> for OperationSet<B> {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            steps: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<B: Backend> fmt::Debug for OperationSet<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.steps).finish()
    }
}
