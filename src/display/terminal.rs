use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::buffer::Buffer;
use ratatui::prelude::*;
use std::io::{self, stdout};
use std::time::Duration;
use tiny_skia::Pixmap;
use tracing::info;

use crate::audio::SignalSource;
use crate::color::PalettePreset;
use crate::config::{Config, OptionsPatch, PaletteSpec, Viewport};
use crate::driver::{self, WaveformHandle};
use crate::renderer::RasterRenderer;
use crate::waveform::Waveform;

const MIN_SCALE: f64 = 0.25;
const MAX_SCALE: f64 = 4096.0;

pub async fn run(config: Config) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = run_app(&mut terminal, config).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

/// Pixel viewport for a terminal of `columns x rows` cells: one status row,
/// two pixel rows per remaining cell.
fn viewport_for(columns: u16, rows: u16) -> Viewport {
    Viewport::new(
        0,
        0,
        columns.max(1) as u32,
        rows.saturating_sub(1).max(1) as u32 * 2,
    )
}

/// Snapshot of what the status line shows
struct Status {
    scale: f64,
    log: bool,
    palette: String,
    seconds: f64,
}

async fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, config: Config) -> Result<()> {
    let size = terminal.size()?;
    let mut options = config.waveform.clone();
    options.viewport = viewport_for(size.width, size.height);

    let renderer = RasterRenderer::with_viewport(options.viewport)?;
    let waveform = Waveform::new(options, renderer)?;
    let (handle, driver_task) = driver::spawn(waveform);
    let source = SignalSource::spawn(&config.source, handle.clone());
    let sample_rate = config.source.sample_rate.max(1) as f64;

    let target_fps = Duration::from_secs_f64(1.0 / config.display.fps.max(1) as f64);

    loop {
        let (pixmap, status) = handle
            .with(move |w| {
                let options = w.options();
                let palette = match &options.palette {
                    PaletteSpec::Preset(preset) => preset.name().to_string(),
                    PaletteSpec::Colors(colors) => format!("{} colors", colors.len()),
                };
                let status = Status {
                    scale: options.scale,
                    log: options.log,
                    palette,
                    seconds: w.length() as f64 / sample_rate,
                };
                (w.renderer().pixmap().clone(), status)
            })
            .await?;

        terminal.draw(|frame| {
            let area = frame.area();

            let block = ratatui::widgets::Block::default()
                .style(Style::default().bg(Color::Reset));
            frame.render_widget(block, area);

            let waveform_area = Rect::new(
                area.x,
                area.y + 1,
                area.width,
                area.height.saturating_sub(1),
            );
            blit(&pixmap, frame.buffer_mut(), waveform_area);
            render_status(frame, area, &status);
        })?;

        // Handle input
        if event::poll(target_fps)? {
            match event::read()? {
                Event::Key(key) => match key {
                    KeyEvent {
                        code: KeyCode::Char('q'),
                        ..
                    }
                    | KeyEvent {
                        code: KeyCode::Char('c'),
                        modifiers: KeyModifiers::CONTROL,
                        ..
                    } => {
                        break;
                    }
                    KeyEvent {
                        code: KeyCode::Char('l'),
                        ..
                    } => {
                        let patch = OptionsPatch {
                            log: Some(!status.log),
                            ..OptionsPatch::default()
                        };
                        handle.update(patch).await?;
                    }
                    KeyEvent {
                        code: KeyCode::Char('+') | KeyCode::Char('='),
                        ..
                    } => {
                        zoom(&handle, status.scale / 2.0).await?;
                    }
                    KeyEvent {
                        code: KeyCode::Char('-'),
                        ..
                    } => {
                        zoom(&handle, status.scale * 2.0).await?;
                    }
                    KeyEvent {
                        code: KeyCode::Char('c'),
                        modifiers: KeyModifiers::NONE,
                        ..
                    } => {
                        let next = status
                            .palette
                            .parse::<PalettePreset>()
                            .map(|preset| preset.next())
                            .unwrap_or_default();
                        let patch = OptionsPatch {
                            palette: Some(PaletteSpec::Preset(next)),
                            ..OptionsPatch::default()
                        };
                        handle.update(patch).await?;
                    }
                    _ => {}
                },
                Event::Resize(columns, rows) => {
                    let patch = OptionsPatch {
                        viewport: Some(viewport_for(columns, rows)),
                        ..OptionsPatch::default()
                    };
                    handle.update(patch).await?;
                }
                _ => {}
            }
        }
    }

    source.stop();
    drop(source);
    drop(handle);
    let waveform = driver_task.await?;
    info!("Drew {} frames", waveform.frames_drawn());

    Ok(())
}

async fn zoom(handle: &WaveformHandle<RasterRenderer>, scale: f64) -> Result<()> {
    let patch = OptionsPatch {
        scale: Some(scale.clamp(MIN_SCALE, MAX_SCALE)),
        ..OptionsPatch::default()
    };
    handle.update(patch).await?;
    Ok(())
}

/// Draw the pixmap with upper half blocks: foreground is the even pixel
/// row, background the odd one. Transparent pixels keep the terminal
/// background.
fn blit(pixmap: &Pixmap, buf: &mut Buffer, area: Rect) {
    let cell_color = |x: u32, y: u32| match pixmap.pixel(x, y) {
        // Premultiplied channels are the pixel composited over black.
        Some(p) if p.alpha() > 0 => Color::Rgb(p.red(), p.green(), p.blue()),
        _ => Color::Reset,
    };

    for row in 0..area.height {
        for column in 0..area.width {
            let x = column as u32;
            let y = row as u32 * 2;
            if let Some(cell) = buf.cell_mut((area.x + column, area.y + row)) {
                cell.set_char('▀');
                cell.set_fg(cell_color(x, y));
                cell.set_bg(cell_color(x, y + 1));
            }
        }
    }
}

fn render_status(frame: &mut Frame, area: Rect, status: &Status) {
    // Status line at top
    let text = format!(
        " scale {:.2} | [l]og {} | [c]olor {} | {:.1}s | [+/-] zoom | [q]uit ",
        status.scale,
        if status.log { "on" } else { "off" },
        status.palette,
        status.seconds,
    );

    for (i, ch) in text.chars().enumerate() {
        if i < area.width as usize {
            let cell = frame.buffer_mut().cell_mut((area.x + i as u16, area.y));
            if let Some(cell) = cell {
                cell.set_char(ch);
                cell.set_fg(Color::DarkGray);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_uses_two_pixels_per_row_below_status() {
        assert_eq!(viewport_for(80, 25), Viewport::new(0, 0, 80, 48));
        assert_eq!(viewport_for(0, 1), Viewport::new(0, 0, 1, 2));
    }

    #[test]
    fn blit_maps_pixel_pairs_to_half_blocks() {
        let mut pixmap = Pixmap::new(2, 4).unwrap();
        pixmap.fill(tiny_skia::Color::from_rgba8(0, 0, 255, 255));
        let red = tiny_skia::Color::from_rgba8(255, 0, 0, 255)
            .premultiply()
            .to_color_u8();
        pixmap.pixels_mut()[0] = red;
        pixmap.pixels_mut()[2 * 3 + 1] = tiny_skia::PremultipliedColorU8::TRANSPARENT;

        let area = Rect::new(0, 0, 2, 2);
        let mut buf = Buffer::empty(area);
        blit(&pixmap, &mut buf, area);

        assert_eq!(buf[(0, 0)].symbol(), "▀");
        assert_eq!(buf[(0, 0)].fg, Color::Rgb(255, 0, 0));
        assert_eq!(buf[(0, 0)].bg, Color::Rgb(0, 0, 255));
        assert_eq!(buf[(1, 1)].fg, Color::Rgb(0, 0, 255));
        assert_eq!(buf[(1, 1)].bg, Color::Reset);
    }
}
