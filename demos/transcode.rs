//! Example: Re-encode a video through the capture/export pipeline
//!
//! Usage: cargo run --example transcode <input> <output.mov> [codec]
//!
//! Steps through the input with `VideoSeeker`, draws each frame into a CPU
//! capture target and records it with `VideoExporter`. Output defaults to
//! ProRes 4444 (`prores_ks`); pass e.g. `libx264` to change the codec.

use std::env;
use std::time::Instant;

use immersive_media::telemetry::init_logging_default;
use immersive_media::{CaptureFormat, ExportSettings, MemoryTarget, PixelBuffer, VideoExporter, VideoSeeker};

fn main() {
    let _log_guard = init_logging_default().ok().flatten();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <input> <output.mov> [codec]", args[0]);
        std::process::exit(1);
    }

    let mut seeker: VideoSeeker = VideoSeeker::default();
    if !seeker.load(&args[1], 8) {
        eprintln!("Failed to open video: {}", args[1]);
        std::process::exit(1);
    }
    let (width, height, fps) = (seeker.width(), seeker.height(), seeker.frame_rate());
    println!("Input: {}x{} @ {:.2}fps, {} frames", width, height, fps, seeker.frame_count());

    let mut settings = ExportSettings::default();
    if let Some(codec) = args.get(3) {
        settings.codec = codec.clone();
        settings.profile = None;
        settings.pixel_format = "yuv420p".to_string();
    }

    let target = MemoryTarget::new(width, height, CaptureFormat::Rgba8);
    let mut exporter: VideoExporter<MemoryTarget> = VideoExporter::new(target, settings);
    if !exporter.open(width, height, fps, &args[2]) {
        eprintln!("Failed to open output: {}", args[2]);
        std::process::exit(1);
    }
    exporter.start();

    let start = Instant::now();
    let mut frame = PixelBuffer::new();
    loop {
        seeker.update(&mut frame);
        if seeker.is_finished() {
            break;
        }
        if !seeker.is_frame_new() {
            continue;
        }

        exporter.bind();
        exporter.target_mut().draw(frame.data());
        exporter.unbind();

        let recorded = exporter.recorded_frame_count();
        if recorded > 0 && recorded % 100 == 0 {
            println!("{} frames ({:.1} fps)", recorded, recorded as f64 / start.elapsed().as_secs_f64());
        }
    }

    exporter.close();
    let stats = exporter.stats();
    println!(
        "Wrote {} frames, {} packets in {:.2?} ({} failed readbacks, {} encode errors, {} slow encodes, max {:.1}ms)",
        stats.frames_encoded,
        stats.packets_written,
        start.elapsed(),
        stats.readbacks_failed,
        stats.encode_errors,
        stats.slow_encodes,
        stats.max_encode_ms
    );
}
