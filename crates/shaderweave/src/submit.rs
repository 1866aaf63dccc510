//! Command submission with bounded in-flight work
//!
//! A [`Renderer`] turns an [`Operation`] into one committed command buffer. Before a command
//! buffer is requested it acquires a permit from a counting semaphore; the permit is held until
//! the GPU reports completion, so no more than `max_in_flight` submissions per renderer are ever
//! outstanding. Whether the caller waits for completion is chosen per call.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::{Backend, RenderPassTarget};
use crate::operation::Operation;
use crate::sequence::{OperationSet, Step};
use crate::shader::{DEFAULT_THREADS_PER_GROUP, EncodeContext};
use crate::{Error, Extent3d, Result};

/// Settings of a [`Renderer`]
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Label given to every command buffer
    pub label: String,
    /// Upper bound of submissions awaiting GPU completion
    pub max_in_flight: usize,
    /// Work-group size for compute units that do not declare one
    pub default_threads_per_group: Extent3d,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            label: "shaderweave".to_owned(),
            max_in_flight: 1,
            default_threads_per_group: DEFAULT_THREADS_PER_GROUP,
        }
    }
}

impl RendererConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_threads_per_group(mut self, threads_per_group: impl Into<Extent3d>) -> Self {
        self.default_threads_per_group = threads_per_group.into();
        self
    }
}

/// A drawable supplied by a view for one tick, with the target describing it
pub struct Frame<B: Backend> {
    pub drawable: B::Drawable,
    pub target: RenderPassTarget<B>,
}

/// Per-call submission policy
pub struct SubmitOptions<B: Backend> {
    /// Wait for GPU completion before returning
    pub wait: bool,
    /// Frame to render into and present
    pub frame: Option<Frame<B>>,
}

impl<B: Backend> SubmitOptions<B> {
    /// Block until the GPU has finished the submission
    pub fn wait() -> Self {
        Self { wait: true, frame: None }
    }

    /// Return as soon as the command buffer is committed
    pub fn detach() -> Self {
        Self { wait: false, frame: None }
    }

    /// Renders into `frame` and presents its drawable
    pub fn present(mut self, frame: Frame<B>) -> Self {
        self.frame = Some(frame);
        self
    }
}

/// Outcome of a successful submission
#[derive(Debug)]
pub enum Completion {
    /// The GPU finished before the call returned
    Waited,
    /// The GPU may still be working; the task resolves on completion
    Detached(JoinHandle<Result<()>>),
}

impl Completion {
    /// Waits for a detached submission; returns immediately for a waited one
    pub async fn wait(self) -> Result<()> {
        match self {
            Self::Waited => Ok(()),
            Self::Detached(handle) => handle.await.map_err(|err| Error::Completion { reason: err.to_string() })?,
        }
    }
}

/// Encodes operation trees into command buffers and commits them
pub struct Renderer<B: Backend> {
    backend: Arc<B>,
    permits: Arc<Semaphore>,
    config: RendererConfig,
}

impl<B: Backend> Renderer<B> {
    /// Creates a renderer; `max_in_flight` is raised to at least one
    pub fn new(backend: Arc<B>, config: RendererConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self { backend, permits, config }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Submissions that could start right now without waiting for a permit
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Encodes `operation` into one command buffer and commits it
    ///
    /// Detached submissions spawn a tokio task that waits for completion, so they must be made
    /// from inside a tokio runtime.
    ///
    /// # Arguments
    /// * `operation` - Tree to encode; it is flattened in place on first use
    /// * `options` - Whether to wait for completion and which frame to present
    ///
    /// # Returns
    /// How completion is reported, or the first failure raised while resolving or encoding
    pub async fn submit(&self, operation: &mut Operation<B>, options: SubmitOptions<B>) -> Result<Completion> {
        let label = self.config.label.as_str();
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| Error::Completion { reason: err.to_string() })?;

        let mut command_buffer = self.backend.make_command_buffer(label).map_err(|err| {
            warn!(renderer = label, error = %err, "could not obtain a command buffer");
            Error::from_backend(label, err)
        })?;

        let context = EncodeContext {
            threads_per_group: self.config.default_threads_per_group,
            frame_target: options.frame.as_ref().map(|frame| &frame.target),
        };
        if let Err(err) = operation.encode(&self.backend, &mut command_buffer, &context) {
            if err.is_retryable() {
                warn!(renderer = label, error = %err, "encoding failed");
            }
            return Err(err);
        }

        let present = options.frame.map(|frame| frame.drawable);
        let presenting = present.is_some();
        let submission = self.backend.commit(command_buffer, present).map_err(|err| Error::from_backend(label, err))?;
        debug!(renderer = label, presenting, wait = options.wait, "committed command buffer");

        if options.wait {
            let result = self.backend.wait_until_completed(submission).await;
            drop(permit);
            result.map_err(|err| Error::from_backend(label, err))?;
            return Ok(Completion::Waited);
        }

        let backend = self.backend.clone();
        let label = label.to_owned();
        let handle = tokio::spawn(async move {
            let result = backend.wait_until_completed(submission).await;
            drop(permit);
            result.map_err(|err| Error::from_backend(label, err))
        });
        Ok(Completion::Detached(handle))
    }

    /// Submits and waits for completion
    pub async fn run(&self, operation: &mut Operation<B>) -> Result<()> {
        self.submit(operation, SubmitOptions::wait()).await?.wait().await
    }

    /// Runs every step of `set` in order, each submission in its own command buffer
    ///
    /// A submission is awaited before the next step starts. The first failing step stops the
    /// set; steps that already ran are not repeated by a later call unless it runs the whole set
    /// again, which reuses every operation tree flattened the first time.
    pub async fn run_set(&self, set: &mut OperationSet<B>) -> Result<()> {
        let label = self.config.label.as_str();
        for (index, step) in set.steps_mut().iter_mut().enumerate() {
            match step {
                Step::Submit(operation) => self.run(operation).await?,
                Step::Execute { label: name, run } => {
                    debug!(renderer = label, step = %name, index, "running host step");
                    let run = &**run;
                    run(self.backend.as_ref())?;
                }
            }
        }
        Ok(())
    }

    /// Submits a frame tick: inheriting render units draw into `frame`, which is presented
    /// after the command buffer is committed; completion is not awaited
    pub async fn draw(&self, operation: &mut Operation<B>, frame: Frame<B>) -> Result<Completion> {
        self.submit(operation, SubmitOptions::detach().present(frame)).await
    }
}

impl<B: Backend> std::fmt::Debug for Renderer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("backend", &self.backend.name())
            .field("available_permits", &self.permits.available_permits())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TextureDescriptor;
    use crate::backend::recording::{Command, RecordedDrawable};
    use crate::pipeline::{ComputeFunction, RenderFunction};
    use crate::resource::{SharedTexture, TextureSource};
    use crate::shader::{ComputeShader, RenderShader};
    use crate::{ClearColor, DispatchSize, LoadAction, PixelFormat, RecordingBackend, StoreAction, TextureUsage};

    fn renderer(backend: RecordingBackend) -> Renderer<RecordingBackend> {
        Renderer::new(Arc::new(backend), RendererConfig::default().with_label("test"))
    }

    fn compute(label: &str) -> Operation<RecordingBackend> {
        Operation::unit(ComputeShader::new(label, ComputeFunction::new("main")).dispatch(DispatchSize::fixed((64, 64))))
    }

    #[tokio::test]
    async fn waited_submissions_release_their_permit() {
        let renderer = renderer(RecordingBackend::new());
        let mut operation = compute("a");

        renderer.run(&mut operation).await.unwrap();
        assert_eq!(renderer.available_permits(), 1);
        assert_eq!(renderer.backend().submission_count(), 1);
    }

    #[tokio::test]
    async fn detached_submissions_hold_the_permit_until_complete() {
        let renderer = renderer(RecordingBackend::new());
        let mut operation = compute("a");

        let completion = renderer.submit(&mut operation, SubmitOptions::detach()).await.unwrap();
        assert!(matches!(completion, Completion::Detached(_)));
        completion.wait().await.unwrap();
        assert_eq!(renderer.available_permits(), 1);
    }

    #[tokio::test]
    async fn missing_command_buffers_are_a_distinct_retryable_error() {
        let renderer = renderer(RecordingBackend::new());
        renderer.backend().fail_next_command_buffers(1);
        let mut operation = compute("a");

        let err = renderer.run(&mut operation).await.unwrap_err();
        assert!(matches!(err, Error::CommandBufferUnavailable { .. }));
        assert!(err.is_retryable());
        assert_eq!(renderer.available_permits(), 1);

        renderer.run(&mut operation).await.unwrap();
        assert_eq!(renderer.backend().pass_labels(), ["a"]);
    }

    #[tokio::test]
    async fn frames_are_rendered_into_and_presented() {
        let backend = RecordingBackend::new();
        let texture = backend
            .create_texture(&TextureDescriptor::new_2d("drawable", 32, 32, PixelFormat::Bgra8Unorm, TextureUsage::RENDER_TARGET))
            .unwrap();
        let frame = Frame {
            drawable: RecordedDrawable { texture: texture.clone() },
            target: RenderPassTarget {
                texture: texture.clone(),
                format: PixelFormat::Bgra8Unorm,
                load: LoadAction::Clear(ClearColor::BLACK),
                store: StoreAction::Store,
            },
        };
        let renderer = renderer(backend);
        let mut operation = compute("simulate") + Operation::unit(RenderShader::new("present", RenderFunction::new("fullscreen_vs", "present_fs")));

        renderer.draw(&mut operation, frame).await.unwrap().wait().await.unwrap();

        let commands = renderer.backend().commands();
        assert!(matches!(commands.last(), Some(Command::Commit { presented: Some(id), .. }) if *id == texture.id));
        assert_eq!(renderer.backend().pass_labels(), ["simulate", "present"]);
    }

    #[tokio::test]
    async fn encode_failures_surface_and_commit_nothing() {
        let renderer = renderer(RecordingBackend::new().with_entry_points(["other"]));
        let mut operation = compute("a");

        assert!(matches!(renderer.run(&mut operation).await, Err(Error::Configuration { .. })));
        assert_eq!(renderer.backend().submission_count(), 0);
    }

    #[tokio::test]
    async fn set_steps_get_one_command_buffer_each() {
        let renderer = renderer(RecordingBackend::new());
        let mut set = OperationSet::new().then(compute("a") + compute("b")).then(compute("c"));

        renderer.run_set(&mut set).await.unwrap();
        assert_eq!(renderer.backend().submission_count(), 2);
        assert_eq!(renderer.backend().pass_labels(), ["a", "b", "c"]);
        let commits = renderer.backend().commands().iter().filter(|command| matches!(command, Command::Commit { .. })).count();
        assert_eq!(commits, 2);
        assert_eq!(renderer.available_permits(), 1);
    }

    #[tokio::test]
    async fn host_steps_run_after_the_previous_submission() {
        let renderer = renderer(RecordingBackend::new());
        let submitted_before = Arc::new(std::sync::Mutex::new(Vec::new()));
        let observe = {
            let submitted_before = submitted_before.clone();
            Step::execute("observe", move |backend: &RecordingBackend| {
                submitted_before.lock().unwrap().push(backend.submission_count());
                Ok(())
            })
        };
        let mut set = OperationSet::new().then(compute("a")).then(observe).then(compute("b"));

        renderer.run_set(&mut set).await.unwrap();
        renderer.run_set(&mut set).await.unwrap();
        assert_eq!(*submitted_before.lock().unwrap(), [1, 3]);
    }

    #[tokio::test]
    async fn exports_receive_the_texture_the_set_rendered_into() {
        let renderer = renderer(RecordingBackend::new());
        let canvas = SharedTexture::new(TextureSource::New(TextureDescriptor::new_2d("canvas", 16, 16, PixelFormat::Rgba8Unorm, TextureUsage::READ_WRITE)));
        let exported = Arc::new(std::sync::Mutex::new(None));
        let write = {
            let exported = exported.clone();
            Step::export("write canvas", &canvas, move |_backend: &RecordingBackend, handle| {
                *exported.lock().unwrap() = Some(handle.texture.id);
                Ok(())
            })
        };
        let fill = Operation::unit(ComputeShader::new("fill", ComputeFunction::new("fill")).texture(crate::LazyTexture::shared(&canvas)));
        let mut set = OperationSet::new().then(fill).then(write);

        renderer.run_set(&mut set).await.unwrap();
        let canvas_id = canvas.resolve(renderer.backend()).unwrap().texture.id;
        assert_eq!(*exported.lock().unwrap(), Some(canvas_id));
        assert_eq!(renderer.backend().creation_count("canvas"), 1);
    }

    #[tokio::test]
    async fn a_failing_step_stops_the_set() {
        let renderer = renderer(RecordingBackend::new());
        let fail = Step::execute("fail", |_: &RecordingBackend| Err(Error::configuration("fail", "export target missing")));
        let mut set = OperationSet::new().then(compute("a")).then(fail).then(compute("b"));

        let err = renderer.run_set(&mut set).await.unwrap_err();
        assert!(matches!(err, Error::Configuration { ref object, .. } if object == "fail"), "{err}");
        assert_eq!(renderer.backend().pass_labels(), ["a"]);
    }
}
