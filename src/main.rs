use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use scrollwave::audio::Waveshape;
use scrollwave::config::{Config, PaletteSpec};
use scrollwave::display::{self, DisplayMode};
use scrollwave::renderer::Backend;
use scrollwave::PalettePreset;

#[derive(Parser, Debug)]
#[command(name = "scrollwave")]
#[command(author, version, about = "Scrolling audio waveform renderer")]
struct Args {
    /// Display mode: terminal or snapshot
    #[arg(short, long)]
    mode: Option<DisplayMode>,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a commented default config and exit
    #[arg(long)]
    init_config: bool,

    /// Rendering backend used in snapshot mode
    #[arg(short, long)]
    backend: Option<Backend>,

    /// Samples per pixel column
    #[arg(short, long)]
    scale: Option<f64>,

    /// Log-compress amplitudes
    #[arg(short, long)]
    log: bool,

    /// Palette preset: spectrum, fire, ocean, forest, purple, monochrome
    #[arg(short, long)]
    palette: Option<PalettePreset>,

    /// Test signal shape
    #[arg(long)]
    shape: Option<Waveshape>,

    /// Test signal frequency in Hz
    #[arg(short, long)]
    frequency: Option<f32>,

    /// Snapshot output file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Seconds of signal rendered into a snapshot
    #[arg(long)]
    seconds: Option<f32>,
}

/// CLI flags override values from the config file.
fn merge_args(config: &mut Config, args: &Args) {
    if let Some(mode) = args.mode {
        config.display.mode = mode;
    }
    if let Some(backend) = args.backend {
        config.display.backend = backend;
    }
    if let Some(ref output) = args.output {
        config.display.snapshot_path = output.clone();
    }
    if let Some(seconds) = args.seconds {
        config.display.snapshot_seconds = seconds;
    }

    if let Some(scale) = args.scale {
        config.waveform.scale = scale;
    }
    if args.log {
        config.waveform.log = true;
    }
    if let Some(preset) = args.palette {
        config.waveform.palette = PaletteSpec::Preset(preset);
    }

    if let Some(shape) = args.shape {
        config.source.shape = shape;
    }
    if let Some(frequency) = args.frequency {
        config.source.frequency = frequency;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; info lines would scribble over the terminal UI
    let default_directive = match args.mode {
        Some(DisplayMode::Snapshot) => "scrollwave=info",
        _ => "scrollwave=warn",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_directive.parse()?),
        )
        .init();

    if args.init_config {
        let path = Config::init_default_config()?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    // Load or create config
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_from_default_path().unwrap_or_default(),
    };
    merge_args(&mut config, &args);
    config
        .waveform
        .validate()
        .context("Invalid waveform options")?;

    info!("Starting scrollwave in {:?} mode", config.display.mode);

    match config.display.mode {
        DisplayMode::Terminal => {
            display::terminal::run(config).await?;
        }
        DisplayMode::Snapshot => {
            display::snapshot::run(config).await?;
        }
    }

    Ok(())
}
