mod capture_loop;
mod display;
mod keys;
mod mailbox;
mod receiver;
mod saver;
mod source;
#[cfg(test)]
mod test_support;

use capture_loop::CaptureLoop;
use display::WindowDisplay;
use frame_snap_common::config::Config;
use mailbox::FrameMailbox;
use receiver::FrameReceiver;
use saver::PhotoSaver;
use source::KafkaSource;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load_or_default(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    // Photos land under the working directory unless configured otherwise.
    let photo_dir = if config.capture.photo_dir.is_absolute() {
        config.capture.photo_dir.clone()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&config.capture.photo_dir))
            .unwrap_or_else(|_| config.capture.photo_dir.clone())
    };

    info!(
        brokers = config.bus.brokers,
        topic = config.bus.topic,
        photo_dir = photo_dir.display().to_string(),
        spin_timeout_ms = config.capture.spin_timeout_ms,
        "starting image capture node"
    );

    let dispatch = tracing::dispatcher::get_default(|d| d.clone());

    // The signal listener lives on a small runtime; the capture loop itself
    // stays on the main thread, which the window requires.
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start signal runtime");
            std::process::exit(1);
        }
    };
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    runtime.spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                flag.store(true, Ordering::SeqCst);
            }
            Err(e) => warn!(error = %e, "failed to listen for interrupt"),
        }
    });

    let saver = match PhotoSaver::create(
        photo_dir,
        config.capture.jpeg_quality,
        dispatch.clone(),
    ) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to prepare photo directory");
            std::process::exit(1);
        }
    };

    let source = match KafkaSource::connect(&config.bus) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to subscribe to image topic");
            std::process::exit(1);
        }
    };

    let display = match WindowDisplay::open(&config.capture.window_title) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to open display window");
            std::process::exit(1);
        }
    };

    let receiver = FrameReceiver::new(FrameMailbox::new(), dispatch.clone());
    let mut capture = CaptureLoop::new(
        source,
        display,
        receiver,
        saver,
        shutdown,
        config.capture.spin_timeout(),
        dispatch,
    );

    let summary = capture.run();
    info!(photos_saved = summary.photos_saved, "image capture node exiting");

    drop(capture);
    runtime.shutdown_background();
}
