//! End-to-end runs of operation trees against the recording backend

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use shaderweave::backend::recording::{Command, Creation};
use shaderweave::backend::TextureDescriptor;
use shaderweave::resource::{BufferSource, SharedBuffer, SharedTexture, TextureSource};
use shaderweave::{
    BlitShader, BufferUsage, ClearColor, ComputeFunction, ComputeShader, DispatchSize, Error, Extent3d, LazyBuffer, LazySampler, LazyTexture, Operation, OperationSet,
    PixelFormat, RecordingBackend, RenderFunction, RenderShader, RenderTarget, Renderer, RendererConfig, Stage, Step, TextureUsage, Uniform,
};

fn renderer(backend: RecordingBackend) -> Renderer<RecordingBackend> {
    Renderer::new(Arc::new(backend), RendererConfig::default().with_label("scenario"))
}

fn shared_texture(label: &str, width: u32, height: u32) -> SharedTexture<RecordingBackend> {
    SharedTexture::new(TextureSource::New(TextureDescriptor::new_2d(label, width, height, PixelFormat::Rgba8Unorm, TextureUsage::READ_WRITE)))
}

fn fixed(label: &str) -> Operation<RecordingBackend> {
    Operation::unit(ComputeShader::new(label, ComputeFunction::new("fill")).dispatch(DispatchSize::fixed((16, 16))))
}

fn dispatches(backend: &RecordingBackend) -> Vec<Extent3d> {
    backend
        .commands()
        .into_iter()
        .filter_map(|command| match command {
            Command::Dispatch { thread_groups, .. } => Some(thread_groups),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn shared_texture_is_created_once_across_units_and_frames() {
    let renderer = renderer(RecordingBackend::new());
    let texture_a = shared_texture("textureA", 64, 64);
    let params = Uniform::new([1.0f32, 2.0, 3.0, 4.0]);

    let constructed = Arc::new(AtomicUsize::new(0));
    let writer = {
        let texture_a = texture_a.clone();
        let params = params.clone();
        let constructed = constructed.clone();
        Operation::constructor(move |_backend: &RecordingBackend| {
            constructed.fetch_add(1, Ordering::SeqCst);
            Ok(ComputeShader::new("write", ComputeFunction::new("write_field"))
                .texture(LazyTexture::shared(&texture_a))
                .buffer(params.constant("bufferB")))
        })
    };
    let reader = ComputeShader::new("read", ComputeFunction::new("read_field")).texture(LazyTexture::shared(&texture_a));
    let mut operation = writer + Operation::unit(reader);

    renderer.run(&mut operation).await.unwrap();
    assert!(operation.is_materialized());
    assert_eq!(renderer.backend().creation_count("textureA"), 1);
    // Inline constants never allocate a buffer
    assert_eq!(renderer.backend().creation_count("bufferB"), 0);
    assert_eq!(renderer.backend().pass_labels(), ["write", "read"]);

    renderer.backend().clear_log();
    params.set([5.0, 6.0, 7.0, 8.0]);
    renderer.run(&mut operation).await.unwrap();

    assert_eq!(constructed.load(Ordering::SeqCst), 1);
    assert!(renderer.backend().creations().is_empty());
    assert_eq!(renderer.backend().pass_labels(), ["write", "read"]);
    let bytes = renderer
        .backend()
        .commands()
        .into_iter()
        .find_map(|command| match command {
            Command::SetBytes { stage: Stage::Compute, slot: 0, bytes } => Some(bytes),
            _ => None,
        })
        .unwrap();
    assert_eq!(bytes, bytemuck::bytes_of(&[5.0f32, 6.0, 7.0, 8.0]));
}

#[tokio::test]
async fn grouping_does_not_change_encode_order() {
    let left_backend = RecordingBackend::new();
    let right_backend = RecordingBackend::new();
    let left = renderer(left_backend);
    let right = renderer(right_backend);

    let mut left_nested = (fixed("a") + fixed("b")) + fixed("c");
    let mut right_nested = fixed("a") + (fixed("b") + fixed("c"));
    left.run(&mut left_nested).await.unwrap();
    right.run(&mut right_nested).await.unwrap();

    assert_eq!(left.backend().pass_labels(), ["a", "b", "c"]);
    assert_eq!(left.backend().pass_labels(), right.backend().pass_labels());
}

#[tokio::test]
async fn flattening_is_idempotent() {
    let backend = RecordingBackend::new();
    let mut operation = Operation::sequence([fixed("a"), Operation::empty(), fixed("b") + fixed("c")]);

    let first = operation.resolve(&backend).unwrap().iter().map(|unit| unit.label().to_owned()).collect::<Vec<_>>();
    let second = operation.resolve(&backend).unwrap().iter().map(|unit| unit.label().to_owned()).collect::<Vec<_>>();
    assert_eq!(first, ["a", "b", "c"]);
    assert_eq!(first, second);
}

#[tokio::test]
async fn texture_dispatch_rounds_groups_up() {
    let renderer = renderer(RecordingBackend::new());
    let image = LazyTexture::new_2d("image", 1000, 1000, PixelFormat::Rgba8Unorm, TextureUsage::READ_WRITE);
    let mut operation = Operation::unit(ComputeShader::new("invert", ComputeFunction::new("invert")).texture(image).threads_per_group((16, 16)));

    renderer.run(&mut operation).await.unwrap();
    assert_eq!(dispatches(renderer.backend()), [Extent3d::new(63, 63, 1)]);
}

#[tokio::test]
async fn buffer_dispatch_covers_every_element() {
    let renderer = renderer(RecordingBackend::new());
    let values = LazyBuffer::zeroed::<f32>("values", 130, BufferUsage::STORAGE);
    let mut operation = Operation::unit(
        ComputeShader::new("scale", ComputeFunction::new("scale"))
            .buffer(values)
            .dispatch(DispatchSize::buffer_slot(0, Some(16)))
            .threads_per_group((1, 1, 1)),
    );

    renderer.run(&mut operation).await.unwrap();
    assert_eq!(dispatches(renderer.backend()), [Extent3d::new(16, 9, 1)]);
}

#[tokio::test]
async fn empty_buffers_skip_their_dispatch() {
    let renderer = renderer(RecordingBackend::new());
    let values = LazyBuffer::from_slice::<f32>("values", &[], BufferUsage::STORAGE);
    let mut operation = Operation::unit(ComputeShader::new("scale", ComputeFunction::new("scale")).buffer(values).dispatch(DispatchSize::buffer_slot(0, None))) + fixed("after");

    renderer.run(&mut operation).await.unwrap();
    assert_eq!(renderer.backend().pass_labels(), ["after"]);
}

#[tokio::test]
async fn compute_render_and_blit_share_one_command_buffer() {
    let renderer = renderer(RecordingBackend::new());
    let field = shared_texture("field", 32, 32);
    let canvas = SharedTexture::new(TextureSource::New(TextureDescriptor::new_2d(
        "canvas",
        32,
        32,
        PixelFormat::Bgra8Unorm,
        TextureUsage::RENDER_TARGET | TextureUsage::COPY_SRC,
    )));
    let snapshot = LazyTexture::like("snapshot", LazyTexture::shared(&canvas));

    let mut operation = Operation::sequence([
        Operation::unit(ComputeShader::new("seed", ComputeFunction::new("seed")).texture(LazyTexture::shared(&field))),
        Operation::unit(
            RenderShader::new("present", RenderFunction::new("fullscreen_vs", "present_fs"))
                .target(RenderTarget::cleared(LazyTexture::shared(&canvas), ClearColor::BLACK))
                .fragment_texture(LazyTexture::shared(&field))
                .fragment_sampler(LazySampler::linear("bilinear")),
        ),
        Operation::unit(BlitShader::new("snapshot").copy_texture(LazyTexture::shared(&canvas), snapshot)),
    ]);

    renderer.run(&mut operation).await.unwrap();

    let commands = renderer.backend().commands();
    assert_eq!(renderer.backend().submission_count(), 1);
    assert!(commands.iter().any(|command| matches!(command, Command::BeginRender { format: PixelFormat::Bgra8Unorm, .. })));
    assert!(commands.iter().any(|command| matches!(command, Command::SetSampler { stage: Stage::Fragment, slot: 0, .. })));
    assert!(commands.iter().any(|command| matches!(command, Command::CopyTexture { .. })));
    assert!(matches!(commands.last(), Some(Command::Commit { label, presented: None }) if label == "scenario"));
    assert_eq!(renderer.backend().creation_count("canvas"), 1);
    assert!(renderer
        .backend()
        .creations()
        .iter()
        .any(|creation| matches!(creation, Creation::Texture { label, format: PixelFormat::Bgra8Unorm, .. } if label == "snapshot")));
}

#[tokio::test]
async fn unknown_entry_points_are_configuration_errors() {
    let renderer = renderer(RecordingBackend::new().with_entry_points(["fill"]));
    let mut operation = fixed("ok") + Operation::unit(ComputeShader::new("broken", ComputeFunction::new("missing")).dispatch(DispatchSize::fixed((8, 8))));

    let err = renderer.run(&mut operation).await.unwrap_err();
    assert!(matches!(err, Error::Configuration { ref object, .. } if object == "missing"), "{err}");
    assert!(!err.is_retryable());
    assert_eq!(renderer.backend().submission_count(), 0);
}

#[tokio::test]
async fn exhausted_memory_is_retryable() {
    let renderer = renderer(RecordingBackend::new().with_memory_limit(1024));
    let image = LazyTexture::new_2d("huge", 512, 512, PixelFormat::Rgba8Unorm, TextureUsage::READ_WRITE);
    let mut operation = Operation::unit(ComputeShader::new("fill", ComputeFunction::new("fill")).texture(image));

    let err = renderer.run(&mut operation).await.unwrap_err();
    assert!(matches!(err, Error::ResourceExhausted { ref object, .. } if object == "huge"), "{err}");
    assert!(err.is_retryable());
}

fn host_buffer(label: &str, params: &Uniform<[f32; 4]>) -> SharedBuffer<RecordingBackend> {
    SharedBuffer::new(BufferSource::Host {
        label: label.into(),
        bytes: params.host_bytes().clone(),
        element_count: 1,
        usage: BufferUsage::UNIFORM,
    })
}

fn pushed_bytes(backend: &RecordingBackend, slot: u32) -> Vec<Vec<u8>> {
    backend
        .commands()
        .into_iter()
        .filter_map(|command| match command {
            Command::SetBytes { slot: pushed, bytes, .. } if pushed == slot => Some(bytes),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn host_bytes_replaced_between_runs_are_never_stale() {
    let renderer = renderer(RecordingBackend::new());
    let params = Uniform::new([1.0f32, 2.0, 3.0, 4.0]);
    let tint = Uniform::new([0.5f32; 4]);
    let shared = host_buffer("params", &params);
    let mut operation = Operation::unit(
        ComputeShader::new("shade", ComputeFunction::new("shade"))
            .buffer(LazyBuffer::shared(&shared))
            .buffer(tint.constant("tint"))
            .dispatch(DispatchSize::fixed((4, 4))),
    );

    renderer.run(&mut operation).await.unwrap();
    let handle = shared.resolve(renderer.backend()).unwrap();
    assert_eq!(renderer.backend().buffer_contents(&handle.buffer), bytemuck::bytes_of(&[1.0f32, 2.0, 3.0, 4.0]));

    params.host_bytes().replace(bytemuck::bytes_of(&[9.0f32, 8.0, 7.0, 6.0]));
    tint.host_bytes().replace(bytemuck::bytes_of(&[0.25f32; 4]));
    renderer.run(&mut operation).await.unwrap();

    assert_eq!(renderer.backend().buffer_contents(&handle.buffer), bytemuck::bytes_of(&[9.0f32, 8.0, 7.0, 6.0]));
    assert_eq!(pushed_bytes(renderer.backend(), 1), [bytemuck::bytes_of(&[0.5f32; 4]).to_vec(), bytemuck::bytes_of(&[0.25f32; 4]).to_vec()]);
    assert_eq!(renderer.backend().creation_count("params"), 1);
    assert_eq!(renderer.backend().submission_count(), 2);
}

#[tokio::test]
async fn host_bytes_longer_than_their_buffer_fail_the_submission() {
    let renderer = renderer(RecordingBackend::new());
    let params = Uniform::new([1.0f32, 2.0, 3.0, 4.0]);
    let shared = host_buffer("params", &params);
    let mut operation = Operation::unit(ComputeShader::new("shade", ComputeFunction::new("shade")).buffer(LazyBuffer::shared(&shared)).dispatch(DispatchSize::fixed((4, 4))));

    renderer.run(&mut operation).await.unwrap();
    let handle = shared.resolve(renderer.backend()).unwrap();

    // Shorter bytes overwrite the prefix only
    params.host_bytes().replace(bytemuck::bytes_of(&[5.0f32, 6.0]));
    renderer.run(&mut operation).await.unwrap();
    assert_eq!(renderer.backend().buffer_contents(&handle.buffer), bytemuck::bytes_of(&[5.0f32, 6.0, 3.0, 4.0]));

    params.host_bytes().replace(&[0xff; 64]);
    renderer.backend().clear_log();
    let err = renderer.run(&mut operation).await.unwrap_err();
    assert!(matches!(err, Error::Configuration { ref object, .. } if object == "params"), "{err}");
    assert!(!err.is_retryable());
    assert!(renderer.backend().pass_labels().is_empty());
    assert_eq!(renderer.backend().submission_count(), 2);
    assert_eq!(renderer.backend().buffer_contents(&handle.buffer), bytemuck::bytes_of(&[5.0f32, 6.0, 3.0, 4.0]));
}

#[tokio::test]
async fn loaded_image_flows_through_a_set_into_an_export() {
    let path = std::env::temp_dir().join(format!("shaderweave-scenario-{}.png", std::process::id()));
    image::RgbaImage::from_pixel(20, 10, image::Rgba([200, 100, 50, 255])).save(&path).unwrap();

    let renderer = renderer(RecordingBackend::new());
    let photo = SharedTexture::new(TextureSource::Path {
        label: "photo".into(),
        path: path.clone(),
        usage: TextureUsage::SHADER_READ,
    });
    let graded = shared_texture("graded", 20, 10);
    let exported = Arc::new(std::sync::Mutex::new(Vec::new()));

    let grade = Operation::unit(
        ComputeShader::new("grade", ComputeFunction::new("grade"))
            .texture(LazyTexture::shared(&photo))
            .texture(LazyTexture::shared(&graded)),
    ) + Operation::encode_with("fence", |_backend: &RecordingBackend, _encoder| Ok(()));
    let export = {
        let exported = exported.clone();
        Step::export("export graded", &graded, move |backend: &RecordingBackend, handle| {
            exported.lock().unwrap().push((backend.submission_count(), handle.size()));
            Ok(())
        })
    };
    let mut set = OperationSet::new().then(grade).then(export);

    renderer.run_set(&mut set).await.unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(dispatches(renderer.backend()), [Extent3d::new(3, 2, 1)]);
    assert_eq!(*exported.lock().unwrap(), [(1, Extent3d::new_2d(20, 10))]);
    let photo = photo.resolve(renderer.backend()).unwrap();
    assert_eq!(renderer.backend().texture_contents(&photo.texture), [200u8, 100, 50, 255].repeat(200));
}
