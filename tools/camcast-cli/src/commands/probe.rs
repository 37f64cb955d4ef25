//! Read frames from a running server.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use image::GrayImage;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(
    host: String,
    port: u16,
    command: Option<i64>,
    frames: u32,
    save: Option<PathBuf>,
    width: u32,
    height: u32,
) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let mut stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("Failed to connect to {addr}"))?;
    println!("Connected to {addr}");

    if let Some(code) = command {
        stream.write_all(format!("{code}\n").as_bytes()).await?;
        println!("Sent command {code}");
    }

    let frame_bytes = width as usize * height as usize;
    let mut frame = vec![0u8; frame_bytes];
    let started = Instant::now();

    for index in 0..frames.max(1) {
        tokio::time::timeout(READ_TIMEOUT, stream.read_exact(&mut frame))
            .await
            .context("Timed out waiting for a frame")?
            .with_context(|| format!("Server closed the stream after {index} frame(s)"))?;
        println!(
            "  frame {:>4}: {} bytes, mean brightness {:.1}",
            index + 1,
            frame.len(),
            mean_brightness(&frame)
        );
    }

    let elapsed = started.elapsed().as_secs_f64();
    if elapsed > 0.0 && frames > 1 {
        println!("Received {frames} frames at {:.1} fps", frames as f64 / elapsed);
    }

    if let Some(path) = save {
        let image = GrayImage::from_raw(width, height, frame)
            .context("Frame size does not match --width/--height")?;
        image
            .save(&path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        println!("Saved last frame to {}", path.display());
    }

    Ok(())
}

fn mean_brightness(frame: &[u8]) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    frame.iter().map(|&b| b as u64).sum::<u64>() as f64 / frame.len() as f64
}
