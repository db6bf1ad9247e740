//! CPU path renderer on a tiny-skia pixmap.
//!
//! Fine zoom strokes a polyline through the column tops; coarse zoom fills
//! the silhouette between tops (left to right) and bottoms (right to left).
//! Column `i` is centered at `x + i + 0.5` and the outline is extended to
//! both column edges, so a tail frame joins the scrolled image seamlessly.

use palette::Srgba;
use tiny_skia::{
    Color, FillRule, Paint, Path, PathBuilder, Pixmap, PremultipliedColorU8, Rect, Stroke,
    Transform,
};
use tracing::debug;

use super::{Renderer, Style};
use crate::color::to_rgba8;
use crate::config::Viewport;
use crate::error::{Error, Result};
use crate::storage::ReducedFrame;

pub struct RasterRenderer {
    pixmap: Pixmap,
    viewport: Viewport,
    disposed: bool,
}

impl RasterRenderer {
    /// Draw into a caller-supplied pixmap. The pixmap grows if the
    /// viewport does not fit.
    pub fn new(pixmap: Pixmap, viewport: Viewport) -> Result<Self> {
        let mut renderer = Self {
            pixmap,
            viewport,
            disposed: false,
        };
        renderer.resize(viewport)?;
        Ok(renderer)
    }

    /// Allocate a pixmap exactly large enough for `viewport`.
    pub fn with_viewport(viewport: Viewport) -> Result<Self> {
        viewport.validate()?;
        let pixmap = Pixmap::new(viewport.right(), viewport.bottom())
            .ok_or_else(|| Error::BackendUnavailable("could not allocate pixmap".to_string()))?;
        Self::new(pixmap, viewport)
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Move the viewport contents horizontally by `dx` pixels.
    ///
    /// Columns uncovered by the move keep their old contents; the caller
    /// repaints them.
    fn shift(&mut self, dx: i32) {
        let Viewport {
            left,
            top,
            width,
            height,
        } = self.viewport;
        let distance = dx.unsigned_abs().min(width) as usize;
        if distance == 0 {
            return;
        }

        let stride = self.pixmap.width() as usize;
        let pixels = self.pixmap.pixels_mut();
        for y in top..top + height {
            let row_start = y as usize * stride + left as usize;
            let row = &mut pixels[row_start..row_start + width as usize];
            if dx < 0 {
                row.copy_within(distance.., 0);
            } else {
                row.copy_within(..row.len() - distance, distance);
            }
        }
    }

    /// Fill columns `[x0, x1)` of the viewport with the background.
    fn clear_columns(&mut self, x0: u32, x1: u32, background: Option<Srgba>) {
        let fill = match background {
            Some(color) => {
                let [r, g, b, a] = to_rgba8(color);
                Color::from_rgba8(r, g, b, a).premultiply().to_color_u8()
            }
            None => PremultipliedColorU8::TRANSPARENT,
        };

        let Viewport { top, height, .. } = self.viewport;
        let stride = self.pixmap.width() as usize;
        let pixels = self.pixmap.pixels_mut();
        for y in top..top + height {
            let row_start = y as usize * stride;
            pixels[row_start + x0 as usize..row_start + x1 as usize].fill(fill);
        }
    }

    fn fill_baseline(&mut self, x0: u32, x1: u32, color: Srgba) {
        let Viewport { top, height, .. } = self.viewport;
        let mid = height as f32 * 0.5;
        let Some(rect) = Rect::from_xywh(x0 as f32, top as f32 + mid, (x1 - x0) as f32, 0.5) else {
            return;
        };
        self.pixmap
            .fill_rect(rect, &paint(color), Transform::identity(), None);
    }
}

fn paint(color: Srgba) -> Paint<'static> {
    let [r, g, b, a] = to_rgba8(color);
    let mut paint = Paint::default();
    paint.set_color_rgba8(r, g, b, a);
    paint.anti_alias = true;
    paint
}

/// Outline through `values` with columns starting at `x0`.
fn trace(pb: &mut PathBuilder, values: &[f32], x0: f32, y: impl Fn(f32) -> f32, reverse: bool) {
    let n = values.len();
    let mut points = Vec::with_capacity(n + 2);
    points.push((x0, values[0]));
    points.extend(values.iter().enumerate().map(|(i, &v)| (x0 + i as f32 + 0.5, v)));
    points.push((x0 + n as f32, values[n - 1]));
    if reverse {
        points.reverse();
    }

    for (x, v) in points {
        if pb.is_empty() {
            pb.move_to(x, y(v));
        } else {
            pb.line_to(x, y(v));
        }
    }
}

fn waveform_path(frame: &ReducedFrame, x0: f32, top: f32, height: f32, strokes: bool) -> Option<Path> {
    let mid = height * 0.5;
    let y = |amp: f32| top + mid - amp.clamp(-1.0, 1.0) * mid;

    let mut pb = PathBuilder::new();
    trace(&mut pb, &frame.tops, x0, y, false);
    if !strokes {
        trace(&mut pb, &frame.bottoms, x0, y, true);
        pb.close();
    }
    pb.finish()
}

impl Renderer for RasterRenderer {
    fn draw(&mut self, frame: &ReducedFrame, style: &Style) -> Result<()> {
        if self.disposed {
            return Err(Error::BackendUnavailable(
                "raster renderer has been disposed".to_string(),
            ));
        }

        let Viewport {
            left,
            top,
            width,
            height,
        } = self.viewport;
        let right = left + width;
        let columns = (frame.len() as u32).min(width);

        let repaint_from = match frame.tail {
            Some(tail) => {
                let tail = (tail as u32).min(width);
                debug!("Shifting raster by {} columns", tail);
                self.shift(-(tail as i32));
                right - tail
            }
            None => left,
        };

        self.clear_columns(repaint_from, right, style.palette.background());
        self.fill_baseline(repaint_from, right, style.palette.baseline());

        if columns == 0 {
            return Ok(());
        }

        let visible = &frame_suffix(frame, columns as usize);
        let x0 = (right - columns) as f32;
        let strokes = style.strokes();
        let Some(path) = waveform_path(visible, x0, top as f32, height as f32, strokes) else {
            return Ok(());
        };

        let paint = paint(style.palette.foreground());
        if strokes {
            let stroke = Stroke {
                width: 1.0,
                ..Stroke::default()
            };
            self.pixmap
                .stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        } else {
            self.pixmap
                .fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        }

        Ok(())
    }

    fn resize(&mut self, viewport: Viewport) -> Result<()> {
        viewport.validate()?;
        if viewport.right() > self.pixmap.width() || viewport.bottom() > self.pixmap.height() {
            let width = viewport.right().max(self.pixmap.width());
            let height = viewport.bottom().max(self.pixmap.height());
            self.pixmap = Pixmap::new(width, height).ok_or_else(|| {
                Error::BackendUnavailable(format!("could not allocate {}x{} pixmap", width, height))
            })?;
        }
        self.viewport = viewport;
        Ok(())
    }

    fn dispose(&mut self) {
        self.disposed = true;
    }

    fn supports_shift(&self) -> bool {
        true
    }
}

/// The newest `columns` columns of a frame, right-aligned in the viewport.
fn frame_suffix(frame: &ReducedFrame, columns: usize) -> ReducedFrame {
    let skip = frame.len() - columns;
    ReducedFrame {
        tops: frame.tops[skip..].to_vec(),
        bottoms: frame.bottoms[skip..].to_vec(),
        averages: frame.averages[skip..].to_vec(),
        start: frame.start + skip as f64 * frame.scale,
        scale: frame.scale,
        tail: frame.tail,
    }
}
