//! Headless rendering of a generated signal to a PNG file.

use anyhow::{Context, Result};
use std::path::Path;
use tiny_skia::Pixmap;
use tracing::info;

use crate::audio::SignalGenerator;
use crate::config::{Config, Options, SourceConfig};
use crate::renderer::{Backend, RasterRenderer, Renderer};
use crate::waveform::Waveform;

pub async fn run(config: Config) -> Result<()> {
    let path = &config.display.snapshot_path;
    let seconds = config.display.snapshot_seconds;

    let pixmap = match config.display.backend {
        Backend::Raster => render_raster(&config.waveform, &config.source, seconds)?,
        Backend::Gpu => render_gpu(&config.waveform, &config.source, seconds).await?,
    };

    save(&pixmap, path)?;
    info!("Wrote {}x{} snapshot to {}", pixmap.width(), pixmap.height(), path.display());
    Ok(())
}

fn save(pixmap: &Pixmap, path: &Path) -> Result<()> {
    pixmap
        .save_png(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Push `seconds` of signal block by block, redrawing after each block the
/// way a live caller would.
fn feed<R: Renderer>(waveform: &mut Waveform<R>, source: &SourceConfig, seconds: f32) -> Result<()> {
    let mut generator = SignalGenerator::new(
        source.shape,
        source.frequency,
        source.amplitude,
        source.sample_rate,
    );
    let block_size = source.block_size.max(1);
    let mut remaining = (seconds.max(0.0) as f64 * source.sample_rate as f64) as usize;

    while remaining > 0 {
        let len = block_size.min(remaining);
        waveform.push(&generator.next_block(len));
        waveform.redraw_now()?;
        remaining -= len;
    }

    if waveform.frames_drawn() == 0 {
        waveform.request_redraw();
        waveform.redraw_now()?;
    }
    Ok(())
}

pub fn render_raster(options: &Options, source: &SourceConfig, seconds: f32) -> Result<Pixmap> {
    let renderer = RasterRenderer::with_viewport(options.viewport)?;
    let mut waveform = Waveform::new(options.clone(), renderer)?;
    feed(&mut waveform, source, seconds)?;
    Ok(waveform.renderer().pixmap().clone())
}

#[cfg(feature = "gpu")]
async fn render_gpu(options: &Options, source: &SourceConfig, seconds: f32) -> Result<Pixmap> {
    use crate::renderer::{GpuContext, GpuRenderer};

    let context = GpuContext::headless().await?;
    let renderer = GpuRenderer::new(context, wgpu::TextureFormat::Rgba8Unorm, options.viewport)?;
    let mut waveform = Waveform::new(options.clone(), renderer)?;
    feed(&mut waveform, source, seconds)?;

    let (width, height, pixels) = waveform.renderer().read_pixels()?;
    let size = tiny_skia::IntSize::from_wh(width, height).context("GPU target is empty")?;
    Pixmap::from_vec(pixels, size).context("GPU readback does not match the target size")
}

#[cfg(not(feature = "gpu"))]
async fn render_gpu(_options: &Options, _source: &SourceConfig, _seconds: f32) -> Result<Pixmap> {
    anyhow::bail!("scrollwave was built without the `gpu` feature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Viewport;

    fn options() -> Options {
        Options {
            buffer_size: 8000,
            scale: 8.0,
            viewport: Viewport::new(0, 0, 64, 32),
            background: Some("#000000".to_string()),
            ..Options::default()
        }
    }

    fn is_lit(pixmap: &Pixmap, x: u32, y: u32) -> bool {
        let p = pixmap.pixel(x, y).unwrap();
        p.red() > 0 || p.green() > 0 || p.blue() > 0
    }

    #[test]
    fn raster_snapshot_shows_waveform() {
        let source = SourceConfig {
            frequency: 50.0,
            amplitude: 1.0,
            sample_rate: 8000,
            block_size: 100,
            ..SourceConfig::default()
        };
        let pixmap = render_raster(&options(), &source, 0.5).unwrap();
        assert_eq!((pixmap.width(), pixmap.height()), (64, 32));

        // A full-scale sine reaches both edges of the band.
        let lit = |rows: std::ops::Range<u32>| {
            rows.flat_map(|y| (0..64).map(move |x| (x, y)))
                .any(|(x, y)| is_lit(&pixmap, x, y))
        };
        assert!(lit(0..4));
        assert!(lit(28..32));
    }

    #[test]
    fn zero_seconds_still_draws_baseline() {
        let pixmap = render_raster(&options(), &SourceConfig::default(), 0.0).unwrap();
        assert!(is_lit(&pixmap, 10, 16));
        assert!(!is_lit(&pixmap, 10, 4));
    }

    #[test]
    fn snapshot_is_written_as_png() {
        let pixmap = render_raster(&options(), &SourceConfig::default(), 0.1).unwrap();
        let path = std::env::temp_dir().join(format!("scrollwave-test-{}.png", std::process::id()));
        save(&pixmap, &path).unwrap();
        let loaded = Pixmap::load_png(&path).unwrap();
        assert_eq!(loaded.width(), 64);
        let _ = std::fs::remove_file(&path);
    }
}
