//! Run the streaming server.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use camcast_common::config::AppConfig;
use camcast_server::console::spawn_console;
use camcast_server::signals::spawn_signal_listener;
use camcast_server::{Collaborators, StreamServer};

pub async fn run(config: AppConfig, console: bool) -> anyhow::Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let collaborators = Collaborators::from_config(&config);
    let server = StreamServer::bind(&config, collaborators, shutdown.clone())?;

    println!("camcast serving on {}", server.local_addr());
    println!(
        "  Frames: {}x{} gray ({} bytes)",
        config.capture.width,
        config.capture.height,
        server.state().frame_size_bytes()
    );
    println!("  Rate: {} Hz", config.capture.frame_rate_hz);
    println!("  Recordings: {}", config.recording.output_dir.display());
    if console {
        spawn_console(server.state())?;
        println!("  Console: t = face detection, p = pause, r = record, q = quit");
    }
    println!("Press Ctrl+C to stop...");
    println!();

    let signals = spawn_signal_listener(shutdown);
    let report = server.run().await?;
    signals.abort();

    println!();
    println!("Server stopped");
    println!("  Frames captured: {}", report.capture.frames_published);
    println!(
        "  Sessions served: {} ({} frames sent)",
        report.sessions.sessions, report.sessions.frames_sent
    );
    println!(
        "  Frames recorded: {} in {} file(s)",
        report.recording.frames_appended, report.recording.sinks_opened
    );
    Ok(())
}
