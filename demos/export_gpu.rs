//! Example: Record GPU-rendered frames to a file
//!
//! Usage: cargo run --example export_gpu <output.mov> [frames]
//!
//! Creates a headless wgpu device, clears a `RenderTarget` to a cycling
//! color every frame and records it with `VideoExporter`. Readbacks stay
//! in flight while the next frame renders.

use std::env;
use std::sync::Arc;
use std::time::Instant;

use immersive_media::telemetry::init_logging_default;
use immersive_media::{CaptureFormat, ExportSettings, RenderTarget, VideoExporter};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const FPS: f64 = 60.0;

async fn create_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await?;

    tracing::info!("Using GPU: {}", adapter.get_info().name);

    adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Export Demo Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        )
        .await
        .ok()
}

/// Clear the target to a color that cycles with the frame number
fn render(target: &RenderTarget, frame: u32) {
    let t = (frame % 120) as f64 / 120.0;
    let mut encoder = target
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Export Demo Encoder"),
        });
    {
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Export Demo Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target.view(),
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: t,
                        g: 1.0 - t,
                        b: 0.5,
                        a: 1.0,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }
    target.queue().submit(std::iter::once(encoder.finish()));
}

fn main() {
    let _log_guard = init_logging_default().ok().flatten();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <output.mov> [frames]", args[0]);
        std::process::exit(1);
    }
    let frames: u32 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(300);

    let Some((device, queue)) = pollster::block_on(create_device()) else {
        eprintln!("No GPU adapter available");
        std::process::exit(1);
    };

    let target = RenderTarget::new(Arc::new(device), Arc::new(queue), WIDTH, HEIGHT, CaptureFormat::Bgra8);
    let mut exporter: VideoExporter<RenderTarget> = VideoExporter::new(target, ExportSettings::default());
    if !exporter.open(WIDTH, HEIGHT, FPS, &args[1]) {
        eprintln!("Failed to open output: {}", args[1]);
        std::process::exit(1);
    }
    exporter.start();

    let start = Instant::now();
    for frame in 0..frames {
        exporter.bind();
        render(exporter.target(), frame);
        exporter.unbind();
    }

    if let Err(e) = std::fs::create_dir_all("export_frames") {
        eprintln!("Failed to create export_frames: {}", e);
    } else {
        exporter.save_current_frame("export_frames/last.png");
    }
    exporter.close();

    let stats = exporter.stats();
    println!(
        "Rendered {} frames, encoded {} in {:.2?} ({} failed readbacks, {} slow encodes)",
        frames,
        stats.frames_encoded,
        start.elapsed(),
        stats.readbacks_failed,
        stats.slow_encodes
    );
}
