use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use libslicecache::geometry::Extent2D;
use libslicecache::testlib::{RecordingView, SyntheticRepresentation};
use libslicecache::{CachedSliceRenderer, RendererConfig, TaskPool, ViewItem};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Use std::env for argument parsing
    let mut args = std::env::args().skip(1);
    let slices = match args.next() {
        Some(val) => match val.parse::<u32>() {
            Ok(num) => num,
            Err(_) => {
                eprintln!("slices must be a valid u32");
                print_usage_and_exit();
            }
        },
        None => {
            eprintln!("Missing required argument: slices");
            print_usage_and_exit();
        }
    };

    let mut delay_ms = 5u64;
    let mut width = RendererConfig::default().window_width;
    let mut threads = 4usize;
    while let Some(arg) = args.next() {
        let value = match args.next().map(|val| val.parse::<u64>()) {
            Some(Ok(val)) => val,
            _ => {
                eprintln!("Expected a number after {}", arg);
                print_usage_and_exit();
            }
        };
        match arg.as_str() {
            "--delay-ms" => delay_ms = value,
            "--width" => width = value as usize,
            "--threads" => threads = value as usize,
            _ => {
                eprintln!("Unknown argument: {}", arg);
                print_usage_and_exit();
            }
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        if let Err(e) = ctrlc::set_handler(move || running.store(false, Ordering::SeqCst)) {
            eprintln!("Could not install Ctrl-C handler: {}", e);
        }
    }

    let pool = match TaskPool::builder().worker_threads(2).max_concurrent(threads).build() {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Could not start task pool: {}", e);
            process::exit(1);
        }
    };
    let rt = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Could not create tokio runtime: {}", e);
            process::exit(1);
        }
    };

    let config = RendererConfig::builder().window_width(width).build();
    let mut renderer = CachedSliceRenderer::new(pool.scheduler().clone(), config);
    let view = RecordingView::new(0.0, 1.0);
    if let Err(e) = renderer.set_view(view.clone()) {
        eprintln!("Could not attach view: {}", e);
        process::exit(1);
    }

    let channel = SyntheticRepresentation::slow_channel(1, Duration::from_millis(delay_ms));
    let segmentation = SyntheticRepresentation::segmentation(
        2,
        Extent2D::new([20.0, 20.0], [60.0, 60.0]),
        (0.0, slices as f64 / 2.0),
    );
    renderer.add_representation(ViewItem::channel(1), channel.clone());
    renderer.add_representation(ViewItem::segmentation(2), segmentation);

    println!("Scrolling through {} slices ({} ms per slice render)...", slices, delay_ms);
    let start = Instant::now();
    let frame_budget = Duration::from_millis(16);
    let mut shown = 0u32;
    for slice in 0..slices {
        if !running.load(Ordering::SeqCst) {
            println!("\nInterrupted.");
            break;
        }
        let position = slice as f64;
        view.set_slice(position);
        renderer.set_position(position);

        // Give the cache one frame to deliver the current slice.
        let deadline = Instant::now() + frame_budget;
        rt.block_on(async {
            while view.attached_positions() != [position] {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match tokio::time::timeout(remaining, renderer.next_completion()).await {
                    Ok(true) => continue,
                    _ => break,
                }
            }
        });
        renderer.process_completions();
        if view.attached_positions() == [position] {
            shown += 1;
        }

        let percent = (slice + 1) * 100 / slices.max(1);
        print!("\rProgress: {:3}% (slice {}/{}, window {})", percent, slice + 1, slices, renderer.window_width());
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }
    let elapsed = start.elapsed();

    let stats = renderer.stats();
    println!("\nDone in {:.3} seconds.", elapsed.as_secs_f64());
    println!("Slices shown within a frame: {}/{}", shown, slices);
    println!("Channel slices rendered: {}", channel.render_count());
    println!("Cache misses: {}", stats.cache_misses);
    println!("Refills: {}", stats.refills);
    println!("Tasks submitted: {} (aborted {})", stats.tasks_submitted, stats.tasks_aborted);
    println!("Stale completions: {}", stats.stale_completions);
    println!("Final window width: {}", renderer.window_width());
    println!("Memory used: {} bytes", renderer.estimated_memory_used());
    println!("Buffer: {}", renderer.buffer_info());
}

fn print_usage_and_exit() -> ! {
    eprintln!("Usage: demo <slices> [--delay-ms <ms>] [--width <half width>] [--threads <tasks>]");
    process::exit(1);
}
