//! Real-time scrolling audio waveform.
//!
//! Samples are appended to a bounded [`RingStorage`]; every redraw reduces
//! the visible window to one `(top, bottom, average)` triple per pixel
//! column and hands the [`ReducedFrame`] to a [`Renderer`]. The
//! [`Waveform`] controller ties the two together and coalesces redraws,
//! and [`driver`] runs it on a tokio task.

pub mod audio;
pub mod color;
pub mod config;
pub mod display;
pub mod driver;
pub mod error;
pub mod renderer;
pub mod storage;
pub mod waveform;

pub use color::{Palette, PalettePreset};
pub use config::{Options, OptionsPatch, PaletteSpec, Viewport};
pub use error::{Error, Result};
pub use renderer::{RasterRenderer, Renderer, Style};
pub use storage::{Anchor, ColumnStats, LogScale, Query, ReducedFrame, RingStorage, SharedStorage};
pub use waveform::{RedrawState, RedrawTicket, Waveform, WaveformObserver};

#[cfg(feature = "gpu")]
pub use renderer::{GpuContext, GpuRenderer};

/// Build a waveform drawing into `renderer`.
pub fn create<R: Renderer>(options: Options, renderer: R) -> Result<Waveform<R>> {
    Waveform::new(options, renderer)
}
