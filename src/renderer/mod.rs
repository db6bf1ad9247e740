//! Rendering backends for reduced waveform frames.
//!
//! Both backends draw into a surface owned by the caller: the raster
//! renderer into a tiny-skia `Pixmap`, the GPU renderer into a texture on a
//! caller-supplied wgpu device. The controller only talks to them through
//! [`Renderer`], and the backend is chosen when the controller is built.

pub mod raster;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use raster::RasterRenderer;

#[cfg(feature = "gpu")]
pub use gpu::{GpuContext, GpuRenderer};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::color::Palette;
use crate::config::{Options, Viewport};
use crate::error::Result;
use crate::storage::ReducedFrame;

/// Below this many samples per column the waveform is stroked, not filled.
pub const STROKE_SCALE_LIMIT: f64 = 2.0;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ValueEnum, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Raster,
    Gpu,
}

/// Drawing state derived from [`Options`], rebuilt on every update.
#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    pub palette: Palette,
    pub scale: f64,
}

impl Style {
    pub fn from_options(options: &Options) -> Result<Self> {
        Ok(Self {
            palette: options.build_palette()?,
            scale: options.scale,
        })
    }

    /// Fine zoom draws the literal signal as a line.
    pub fn strokes(&self) -> bool {
        self.scale < STROKE_SCALE_LIMIT
    }
}

/// A backend that turns reduced frames into pixels.
pub trait Renderer {
    /// Draw a frame. Frames with `tail` set only carry the newest columns.
    fn draw(&mut self, frame: &ReducedFrame, style: &Style) -> Result<()>;

    fn resize(&mut self, viewport: Viewport) -> Result<()>;

    /// Release backend resources. Later draws fail.
    fn dispose(&mut self);

    /// Whether `draw` can scroll the previous image for tail frames.
    fn supports_shift(&self) -> bool {
        false
    }
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn draw(&mut self, frame: &ReducedFrame, style: &Style) -> Result<()> {
        (**self).draw(frame, style)
    }

    fn resize(&mut self, viewport: Viewport) -> Result<()> {
        (**self).resize(viewport)
    }

    fn dispose(&mut self) {
        (**self).dispose()
    }

    fn supports_shift(&self) -> bool {
        (**self).supports_shift()
    }
}
