//! shaderweave headless demo
//!
//! Builds a small operation tree on the wgpu backend and runs it for a number of frames:
//!
//! 1. `seed` writes an animated wave pattern into a storage texture
//! 2. `box_blur` smooths it into a second texture
//! 3. `present` draws the smoothed texture into an sRGB canvas with a full-screen triangle
//! 4. `snapshot` copies the canvas aside
//!
//! The last frame runs as an operation set whose final step writes the snapshot to an image file.
//!
//! # Usage
//! ```bash
//! shaderweave-demo --width 512 --height 512 --frames 30 --output waves.png
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use shaderweave::resource::{SharedTexture, TextureSource};
use shaderweave::{
    BlitShader, ClearColor, ComputeFunction, ComputeShader, FunctionConstants, LazySampler, LazyTexture, Operation, OperationSet, PixelFormat, RenderFunction, RenderShader, RenderTarget,
    Renderer, RendererConfig, ShaderLibrary, TextureUsage, Uniform, WgpuBackend, WgpuBackendInit,
};
use tracing_subscriber::EnvFilter;

const SEED_WGSL: &str = r#"
override wave_scale: f32 = 12.0;

struct Params {
    time: f32,
    _padding0: f32,
    _padding1: f32,
    _padding2: f32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(1) @binding(0) var field: texture_storage_2d<rgba8unorm, write>;

@compute @workgroup_size(GROUP_SIZE, GROUP_SIZE, 1)
fn seed(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(field);
    if (id.x >= size.x || id.y >= size.y) {
        return;
    }
    let uv = vec2<f32>(id.xy) / vec2<f32>(size);
    let wave = 0.5 + 0.5 * sin(wave_scale * (uv.x + uv.y) + params.time);
    textureStore(field, id.xy, vec4<f32>(uv.x, wave, uv.y, 1.0));
}
"#;

const BLUR_WGSL: &str = r#"
@group(1) @binding(0) var field: texture_2d<f32>;
@group(1) @binding(1) var smoothed: texture_storage_2d<rgba8unorm, write>;

@compute @workgroup_size(GROUP_SIZE, GROUP_SIZE, 1)
fn box_blur(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = vec2<i32>(textureDimensions(field));
    let p = vec2<i32>(id.xy);
    if (p.x >= size.x || p.y >= size.y) {
        return;
    }
    var sum = vec4<f32>(0.0);
    for (var dy = -1; dy <= 1; dy++) {
        for (var dx = -1; dx <= 1; dx++) {
            let q = clamp(p + vec2<i32>(dx, dy), vec2<i32>(0), size - vec2<i32>(1));
            sum += textureLoad(field, q, 0);
        }
    }
    textureStore(smoothed, p, sum / 9.0);
}
"#;

const PRESENT_WGSL: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn fullscreen_vs(@builtin(vertex_index) index: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var vertex_out: VertexOutput;
    vertex_out.position = vec4<f32>(uv * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0), 0.0, 1.0);
    vertex_out.uv = uv;
    return vertex_out;
}

@group(1) @binding(16) var smoothed_image: texture_2d<f32>;
@group(2) @binding(16) var smoothed_sampler: sampler;

@fragment
fn present_fs(vertex_out: VertexOutput) -> @location(0) vec4<f32> {
    return textureSample(smoothed_image, smoothed_sampler, vertex_out.uv);
}
"#;

/// Command-line arguments for the demo
#[derive(Parser)]
#[command(version, about = "Runs a shaderweave operation tree headless and saves the last frame")]
struct Args {
    /// Width of every texture in pixels
    #[arg(long, default_value_t = 512)]
    width: u32,

    /// Height of every texture in pixels
    #[arg(long, default_value_t = 512)]
    height: u32,

    /// Output image path; the extension selects the file format
    #[arg(long, short, default_value = "shaderweave.png")]
    output: PathBuf,

    /// Number of frames to simulate, the last one is saved
    #[arg(long, short, default_value_t = 30)]
    frames: u32,

    /// Work-group edge length of the compute shaders
    #[arg(long, default_value_t = 8)]
    group_size: u32,

    /// Frequency of the seeded wave pattern
    #[arg(long, default_value_t = 18.0)]
    wave_scale: f64,
}

/// Uniform block of the `seed` shader
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    time: f32,
    _padding: [f32; 3],
}

fn shared_texture(label: &str, width: u32, height: u32, format: PixelFormat, usage: TextureUsage) -> SharedTexture<WgpuBackend> {
    SharedTexture::new(TextureSource::New(shaderweave::backend::TextureDescriptor::new_2d(label, width, height, format, usage)))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    if args.group_size == 0 {
        return Err("--group-size must be at least 1".into());
    }

    // Every compute entry point is compiled for the requested work-group size
    let group_size = args.group_size.to_string();
    let library = ShaderLibrary::new()
        .with_wgsl("seed", &SEED_WGSL.replace("GROUP_SIZE", &group_size))?
        .with_wgsl("blur", &BLUR_WGSL.replace("GROUP_SIZE", &group_size))?
        .with_wgsl("present", PRESENT_WGSL)?;

    let backend = WgpuBackend::new_headless(WgpuBackendInit::default().with_library(library)).await?;
    tracing::info!(adapter = %shaderweave::Backend::name(&backend), "backend ready");

    let renderer = Renderer::new(
        Arc::new(backend),
        RendererConfig::default()
            .with_label("demo")
            .with_threads_per_group((args.group_size, args.group_size, 1)),
    );

    let (width, height) = (args.width, args.height);
    let field = shared_texture("field", width, height, PixelFormat::Rgba8Unorm, TextureUsage::READ_WRITE);
    let smoothed = shared_texture("smoothed", width, height, PixelFormat::Rgba8Unorm, TextureUsage::READ_WRITE);
    let snapshot = shared_texture("snapshot", width, height, PixelFormat::Rgba8UnormSrgb, TextureUsage::COPY_SRC | TextureUsage::COPY_DST);
    let canvas = shared_texture("canvas", width, height, PixelFormat::Rgba8UnormSrgb, TextureUsage::RENDER_TARGET | TextureUsage::COPY_SRC);
    let params = Uniform::new(Params { time: 0.0, _padding: [0.0; 3] });

    let seed = ComputeShader::new("seed", ComputeFunction::new("seed").constants(FunctionConstants::new().with("wave_scale", args.wave_scale)))
        .texture(LazyTexture::shared(&field))
        .buffer(params.constant("params"));
    let blur = ComputeShader::new("box_blur", ComputeFunction::new("box_blur"))
        .texture(LazyTexture::shared(&field))
        .texture(LazyTexture::shared(&smoothed));
    let present = RenderShader::new("present", RenderFunction::new("fullscreen_vs", "present_fs"))
        .target(RenderTarget::cleared(LazyTexture::shared(&canvas), ClearColor::BLACK))
        .fragment_texture(LazyTexture::shared(&smoothed))
        .fragment_sampler(LazySampler::linear("smoothed sampler"));
    let copy = BlitShader::new("snapshot").copy_texture(LazyTexture::shared(&canvas), LazyTexture::shared(&snapshot));

    let mut operation = Operation::unit(seed) + Operation::unit(blur) + Operation::unit(present) + Operation::unit(copy);

    let frames = args.frames.max(1);
    for frame in 0..frames - 1 {
        params.update(|params| params.time = frame as f32 * 0.1);
        renderer.run(&mut operation).await?;
        tracing::debug!(frame, "frame complete");
    }

    params.update(|params| params.time = (frames - 1) as f32 * 0.1);
    let mut last_frame = OperationSet::new().then(operation).then(shaderweave_readback::write_step(&snapshot, &args.output));
    renderer.run_set(&mut last_frame).await?;
    tracing::info!(frames, path = %args.output.display(), width, height, "saved snapshot");
    Ok(())
}
