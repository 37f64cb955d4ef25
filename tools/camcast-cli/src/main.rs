//! camcast CLI: serve camera frames over TCP and inspect a running server.
//!
//! Usage:
//!   camcast serve [OPTIONS]    Run the streaming server
//!   camcast probe [OPTIONS]    Connect to a server and read frames
//!   camcast check              Check GStreamer, fonts, and configuration
//!   camcast config [--save]    Print the effective configuration

use std::path::PathBuf;

use camcast_common::config::{AppConfig, DetectorKind, SourceKind};
use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "camcast",
    about = "Camera frame streaming server with remote control and recording",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/camcast/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Camera,
    TestPattern,
}

impl From<SourceArg> for SourceKind {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Camera => SourceKind::Camera,
            SourceArg::TestPattern => SourceKind::TestPattern,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DetectorArg {
    None,
    BrightBlob,
}

impl From<DetectorArg> for DetectorKind {
    fn from(arg: DetectorArg) -> Self {
        match arg {
            DetectorArg::None => DetectorKind::None,
            DetectorArg::BrightBlob => DetectorKind::BrightBlob,
        }
    }
}

/// Overrides applied on top of the config file.
#[derive(clap::Args)]
struct ServeArgs {
    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Initial frame rate
    #[arg(long)]
    fps: Option<f64>,

    /// Seconds to keep recording after a face is detected
    #[arg(long)]
    record_secs: Option<u64>,

    /// Frame source
    #[arg(long, value_enum)]
    source: Option<SourceArg>,

    /// Camera device
    #[arg(long)]
    device: Option<String>,

    /// Face detector
    #[arg(long, value_enum)]
    detector: Option<DetectorArg>,

    /// Directory for recordings
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// TrueType font for the overlay
    #[arg(long)]
    font: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,

    /// Read t/p/r/q commands from stdin
    #[arg(long)]
    console: bool,
}

impl ServeArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(bind) = &self.bind {
            config.server.bind_addr = bind.clone();
        }
        if let Some(fps) = self.fps {
            config.capture.frame_rate_hz = fps;
        }
        if let Some(secs) = self.record_secs {
            config.recording.duration_secs = secs;
        }
        if let Some(source) = self.source {
            config.capture.source = source.into();
        }
        if let Some(device) = &self.device {
            config.capture.device = device.clone();
        }
        if let Some(detector) = self.detector {
            config.capture.detector = detector.into();
        }
        if let Some(output) = &self.output {
            config.recording.output_dir = output.clone();
        }
        if let Some(font) = &self.font {
            config.overlay.font_path = Some(font.clone());
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the streaming server until Ctrl+C, SIGTERM, or `q` on the console
    Serve(ServeArgs),

    /// Connect to a server, optionally send a command, and read frames
    Probe {
        /// Server host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[arg(short, long, default_value = "4099")]
        port: u16,

        /// Control code to send first (100 face, 200 pause, 300 record, other = fps)
        #[arg(short, long)]
        command: Option<i64>,

        /// Frames to read
        #[arg(short, long, default_value = "1")]
        frames: u32,

        /// Save the last frame as an image
        #[arg(long)]
        save: Option<PathBuf>,

        /// Frame width the server uses
        #[arg(long, default_value = "640")]
        width: u32,

        /// Frame height the server uses
        #[arg(long, default_value = "480")]
        height: u32,
    },

    /// Check GStreamer elements, overlay fonts, and configuration
    Check,

    /// Print the effective configuration as JSON
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,

        #[command(flatten)]
        overrides: ServeArgs,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => Ok(AppConfig::load_from(path)?),
        None => Ok(AppConfig::load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    if let Commands::Serve(args) | Commands::Config { overrides: args, .. } = &cli.command {
        args.apply(&mut config);
    }
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    camcast_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Serve(args) => commands::serve::run(config, args.console).await,
        Commands::Probe {
            host,
            port,
            command,
            frames,
            save,
            width,
            height,
        } => commands::probe::run(host, port, command, frames, save, width, height).await,
        Commands::Check => commands::check::run(&config),
        Commands::Config { save, .. } => commands::config::run(&config, save),
    }
}
