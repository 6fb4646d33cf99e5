//! Example: Decode a video file and print frame information
//!
//! Usage: cargo run --example decode_video <video_file> [frames]
//!
//! Opens a video file, decodes the first frames on the calling thread and
//! prints the pts and a pixel sample of each one.

use std::env;
use std::path::Path;
use std::time::Instant;

use immersive_media::telemetry::init_logging_default;
use immersive_media::{DecodeSession, Decoded, DecoderParams, FrameConverter, VideoSource};

fn main() {
    let _log_guard = init_logging_default().ok().flatten();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <video_file> [frames]", args[0]);
        std::process::exit(1);
    }

    let video_path = Path::new(&args[1]);
    let max_frames: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);

    let mut session = match DecodeSession::open(video_path, &DecoderParams::default()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open video: {}", e);
            std::process::exit(1);
        }
    };

    let info = session.info().clone();
    println!("\n=== Video Information ===");
    println!("Resolution: {}x{}", info.width, info.height);
    println!("Frame rate: {:.2} fps", info.frame_rate);
    println!("Duration: {:.2} seconds", info.duration);
    println!("Estimated frames: {}", info.frame_count());
    println!("Codec: {}", info.codec_name);
    println!();

    let mut converter = match session.converter() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to create converter: {}", e);
            std::process::exit(1);
        }
    };
    let mut frame = session.allocate_frame();
    let mut rgba = vec![0u8; info.rgba_size()];

    println!("=== Decoding first {} frames ===", max_frames);
    let start = Instant::now();
    let mut decoded_count = 0;

    while decoded_count < max_frames {
        match session.decode_next(&mut frame) {
            Ok(Decoded::Frame { pts }) => {
                if let Err(e) = converter.convert(&frame, &mut rgba) {
                    eprintln!("Convert error: {}", e);
                    break;
                }
                let center = ((info.height / 2 * info.width + info.width / 2) * 4) as usize;
                println!(
                    "Frame {}: pts {} ({:.3}s), center pixel RGBA({}, {}, {}, {})",
                    decoded_count,
                    pts,
                    info.time_base.ticks_to_seconds(pts),
                    rgba[center],
                    rgba[center + 1],
                    rgba[center + 2],
                    rgba[center + 3]
                );
                decoded_count += 1;
            }
            Ok(Decoded::Pending) => {}
            Ok(Decoded::EndOfStream) => {
                println!("End of video reached");
                break;
            }
            Err(e) => eprintln!("Decode error: {}", e),
        }
    }

    let elapsed = start.elapsed();
    println!("\n=== Summary ===");
    println!("Decoded {} frames in {:.2?}", decoded_count, elapsed);
    if decoded_count > 0 {
        println!("Average: {:.2?} per frame", elapsed / decoded_count as u32);
    }
}
