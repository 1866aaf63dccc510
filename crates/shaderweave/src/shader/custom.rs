//! Units whose commands are written by a closure

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::Result;
use crate::backend::Backend;

/// Closure recording commands straight into the command buffer
pub type EncodeFn<B> = Arc<dyn Fn(&B, &mut <B as Backend>::CommandBuffer) -> Result<()> + Send + Sync>;

/// A unit encoded by caller code instead of a pipeline
///
/// The closure runs on every encode, between the units around it, and must leave no pass open.
pub struct CustomUnit<B: Backend> {
    label: String,
    encode: EncodeFn<B>,
}

impl<B: Backend> CustomUnit<B> {
    pub fn new<F>(label: impl Into<String>, encode: F) -> Self
    where
        F: Fn(&B, &mut B::CommandBuffer) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            encode: Arc::new(encode),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn encode(&self, backend: &B, encoder: &mut B::CommandBuffer) -> Result<()> {
        trace!(unit = %self.label, "encoding custom unit");
        let encode = &*self.encode;
        encode(backend, encoder)
    }
}

impl<B: Backend> Clone for CustomUnit<B> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            encode: self.encode.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for CustomUnit<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomUnit").field("label", &self.label).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::Command;
    use crate::backend::{BufferDescriptor, CommandEncoder};
    use crate::{BufferUsage, Error, RecordingBackend};

    #[test]
    fn closures_record_into_the_given_command_buffer() {
        let backend = RecordingBackend::new();
        let descriptor = BufferDescriptor {
            label: "staging",
            size: 16,
            usage: BufferUsage::default(),
        };
        let source = backend.create_buffer(&descriptor, None).unwrap();
        let destination = backend.create_buffer(&descriptor, None).unwrap();
        let unit = CustomUnit::<RecordingBackend>::new("mirror", move |_backend, encoder| {
            encoder.copy_buffer_to_buffer(&source, 0, &destination, 0, 16);
            Ok(())
        });

        let mut encoder = backend.make_command_buffer("custom").unwrap();
        unit.clone().encode(&backend, &mut encoder).unwrap();
        assert!(matches!(encoder.commands(), [Command::CopyBuffer { size: 16, .. }]));
    }

    #[test]
    fn closure_errors_are_returned_unchanged() {
        let backend = RecordingBackend::new();
        let unit = CustomUnit::<RecordingBackend>::new("reject", |_backend, _encoder| Err(Error::configuration("reject", "nothing to encode")));

        let mut encoder = backend.make_command_buffer("custom").unwrap();
        assert!(matches!(unit.encode(&backend, &mut encoder), Err(Error::Configuration { ref object, .. }) if object == "reject"));
    }
}
