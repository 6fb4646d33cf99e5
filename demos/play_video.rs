//! Example: Play a video file headless
//!
//! Usage: cargo run --example play_video <video_file> [seconds] [speed]
//!
//! Drives `VideoPlayer` from a 60Hz loop the way a render loop would, with
//! frames landing in a CPU buffer instead of a texture. Seeks to the middle
//! halfway through and prints playback stats once per second.

use std::env;
use std::thread;
use std::time::{Duration, Instant};

use immersive_media::telemetry::init_logging_default;
use immersive_media::{MediaSettings, PixelBuffer, VideoPlayer};

const TICK: Duration = Duration::from_micros(16_667);

fn main() {
    let _log_guard = init_logging_default().ok().flatten();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <video_file> [seconds] [speed]", args[0]);
        std::process::exit(1);
    }
    let run_for = Duration::from_secs_f64(args.get(2).and_then(|s| s.parse().ok()).unwrap_or(5.0));
    let speed: f64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(1.0);

    let settings = MediaSettings::load();
    let mut player: VideoPlayer = VideoPlayer::new(settings.player);
    if !player.load(&args[1]) {
        eprintln!("Failed to open video: {}", args[1]);
        std::process::exit(1);
    }

    println!(
        "Video: {}x{} @ {:.2}fps, duration: {:.2}s, {} frames",
        player.width(),
        player.height(),
        player.frame_rate(),
        player.duration(),
        player.frame_count()
    );

    let mut screen = PixelBuffer::new();
    player.set_speed(speed);
    player.play();

    let start = Instant::now();
    let mut last_report = start;
    let mut seeked = false;

    while start.elapsed() < run_for {
        let tick_start = Instant::now();
        player.update(&mut screen);

        if !seeked && start.elapsed() >= run_for / 2 {
            println!("Seeking to the middle");
            player.seek_position(0.5);
            seeked = true;
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            let stats = player.stats();
            println!(
                "t={:.2}s frame={:?} {:?} | decoded {} presented {} skipped {} ({:.1}%) queue {}/{} lag {:.1}ms",
                player.current_time(),
                player.current_frame(),
                player.status(),
                stats.frames_decoded,
                stats.frames_presented,
                stats.frames_skipped,
                stats.skip_ratio() * 100.0,
                stats.queue_depth,
                stats.queue_capacity,
                stats.presentation_lag * 1000.0
            );
            last_report = Instant::now();
        }

        if let Some(rest) = TICK.checked_sub(tick_start.elapsed()) {
            thread::sleep(rest);
        }
    }

    println!("Uploaded {} frames of {}x{}", screen.upload_count(), screen.width(), screen.height());
    player.close();
}
