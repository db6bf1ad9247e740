use anyhow::Result as AnyResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::audio::{Waveshape, DEFAULT_SAMPLE_RATE};
use crate::color::{parse_color, Palette, PalettePreset};
use crate::display::DisplayMode;
use crate::error::{Error, Result};
use crate::renderer::Backend;
use crate::storage::{Anchor, LogScale, Query};

/// Output rectangle in pixels. `width` is the number of reduced columns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Viewport {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }

    /// Reject empty rectangles and ones whose far edge does not fit a `u32`.
    pub fn validate(&self) -> Result<()> {
        let overflows = self.left.checked_add(self.width).is_none()
            || self.top.checked_add(self.height).is_none();
        if self.width == 0 || self.height == 0 || overflows {
            return Err(Error::InvalidViewport {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0, 0, 512, 128)
    }
}

/// Either a named preset or an explicit list of `#rrggbb` stops.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PaletteSpec {
    Preset(PalettePreset),
    Colors(Vec<String>),
}

impl Default for PaletteSpec {
    fn default() -> Self {
        PaletteSpec::Preset(PalettePreset::default())
    }
}

/// Waveform configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Options {
    /// Ring capacity in samples. Only read at construction.
    pub buffer_size: usize,
    /// Samples per output column.
    pub scale: f64,
    /// Left edge of the view; `None` tracks the live tail.
    pub offset: Option<i64>,
    pub log: bool,
    pub min_db: f64,
    pub max_db: f64,
    pub palette: PaletteSpec,
    pub active: Option<String>,
    pub background: Option<String>,
    pub levels: usize,
    pub viewport: Viewport,
    /// Interpolate between samples when `scale < 1`.
    pub interpolate: bool,
    /// Let the raster renderer scroll the previous image instead of repainting.
    pub shift: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_SAMPLE_RATE as usize * 5,
            scale: 2.0,
            offset: None,
            log: false,
            min_db: -100.0,
            max_db: 0.0,
            palette: PaletteSpec::default(),
            active: None,
            background: None,
            levels: 16,
            viewport: Viewport::default(),
            interpolate: false,
            shift: true,
        }
    }
}

/// Partial update merged by `Waveform::update`.
///
/// `offset: Some(None)` switches back to tail tracking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsPatch {
    pub scale: Option<f64>,
    pub offset: Option<Option<i64>>,
    pub log: Option<bool>,
    pub min_db: Option<f64>,
    pub max_db: Option<f64>,
    pub palette: Option<PaletteSpec>,
    pub active: Option<Option<String>>,
    pub background: Option<Option<String>>,
    pub levels: Option<usize>,
    pub viewport: Option<Viewport>,
    pub interpolate: Option<bool>,
    pub shift: Option<bool>,
}

impl Options {
    /// Reject anything the storage or renderers would refuse later.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::InvalidCapacity);
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(Error::InvalidScale(self.scale));
        }
        self.viewport.validate()?;
        LogScale::new(self.min_db, self.max_db)?;
        self.build_palette()?;
        Ok(())
    }

    pub fn log_scale(&self) -> Result<Option<LogScale>> {
        if self.log {
            LogScale::new(self.min_db, self.max_db).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn build_palette(&self) -> Result<Palette> {
        let palette = match &self.palette {
            PaletteSpec::Preset(preset) => Palette::from_preset(*preset, self.levels)?,
            PaletteSpec::Colors(colors) => Palette::from_hex(colors, self.levels)?,
        };
        let active = self.active.as_deref().map(parse_color).transpose()?;
        let background = self.background.as_deref().map(parse_color).transpose()?;
        Ok(palette.with_active(active).with_background(background))
    }

    /// Query covering the whole viewport at the configured position.
    pub fn query(&self) -> Result<Query> {
        Ok(Query::new(
            self.scale,
            Anchor::from_offset(self.offset),
            self.viewport.width as usize,
        )
        .with_log(self.log_scale()?)
        .with_interpolation(self.interpolate))
    }

    /// Apply a patch, leaving `self` untouched when the result is invalid.
    pub fn merge(&mut self, patch: &OptionsPatch) -> Result<()> {
        let mut next = self.clone();
        if let Some(scale) = patch.scale {
            next.scale = scale;
        }
        if let Some(offset) = patch.offset {
            next.offset = offset;
        }
        if let Some(log) = patch.log {
            next.log = log;
        }
        if let Some(min_db) = patch.min_db {
            next.min_db = min_db;
        }
        if let Some(max_db) = patch.max_db {
            next.max_db = max_db;
        }
        if let Some(palette) = &patch.palette {
            next.palette = palette.clone();
        }
        if let Some(active) = &patch.active {
            next.active = active.clone();
        }
        if let Some(background) = &patch.background {
            next.background = background.clone();
        }
        if let Some(levels) = patch.levels {
            next.levels = levels;
        }
        if let Some(viewport) = patch.viewport {
            next.viewport = viewport;
        }
        if let Some(interpolate) = patch.interpolate {
            next.interpolate = interpolate;
        }
        if let Some(shift) = patch.shift {
            next.shift = shift;
        }

        next.validate()?;
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub mode: DisplayMode,
    pub backend: Backend,
    pub fps: u32,
    /// PNG written in snapshot mode.
    pub snapshot_path: PathBuf,
    /// Seconds of signal pushed before a snapshot is taken.
    pub snapshot_seconds: f32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Terminal,
            backend: Backend::Raster,
            fps: 60,
            snapshot_path: PathBuf::from("scrollwave.png"),
            snapshot_seconds: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub shape: Waveshape,
    pub frequency: f32,
    pub amplitude: f32,
    pub sample_rate: u32,
    /// Samples generated per push.
    pub block_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            shape: Waveshape::Sine,
            frequency: 220.0,
            amplitude: 0.8,
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: 512,
        }
    }
}

/// Demo application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub waveform: Options,
    pub display: DisplayConfig,
    pub source: SourceConfig,
}

impl Config {
    pub fn load(path: &Path) -> AnyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.waveform.validate()?;
        Ok(config)
    }

    /// Get the default XDG config path (~/.config/scrollwave/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("scrollwave").join("config.toml"))
    }

    /// Load config from the default XDG path if it exists.
    /// Returns None if the file is missing or fails to parse.
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            return None;
        }

        match Self::load(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!(
                    "Failed to parse config at {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                None
            }
        }
    }

    /// Write the commented template to the default path and return it.
    pub fn init_default_config() -> AnyResult<PathBuf> {
        let path = Self::default_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, Self::generate_config_template())?;

        Ok(path)
    }

    pub fn generate_config_template() -> String {
        r##"# Scrollwave Configuration

[waveform]
# Ring capacity in samples (5 seconds at 44.1 kHz)
buffer_size = 220500
# Samples per pixel column; below 2 the waveform is stroked, above it is filled
scale = 2.0
# Left edge of the view as a sample index (negative counts back from the
# newest sample). Omit to follow the live tail.
# offset = -44100
# Log-compress amplitudes across the decibel range below
log = false
min_db = -100.0
max_db = 0.0
# Preset name (spectrum, fire, ocean, forest, purple, monochrome)
# or a list of hex colors from quiet to loud
palette = "spectrum"
# palette = ["#1b1b3a", "#693668", "#a74482", "#f84aa7", "#ff3562"]
# Center line color (defaults to the palette midpoint)
# active = "#ffffff"
# background = "#101018"
# Number of intensity buckets in the GPU colormap
levels = 16
# Interpolate between samples when zoomed past 1:1
interpolate = false
# Scroll the previous image instead of repainting (raster backend)
shift = true

[waveform.viewport]
left = 0
top = 0
width = 512
height = 128

[display]
# "terminal" or "snapshot"
mode = "terminal"
# "raster" or "gpu"
backend = "raster"
fps = 60
snapshot_path = "scrollwave.png"
snapshot_seconds = 2.0

[source]
# "sine", "saw" or "square"
shape = "sine"
frequency = 220.0
amplitude = 0.8
sample_rate = 44100
block_size = 512
"##
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = Options::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.buffer_size, 44100 * 5);
        assert_eq!(options.levels, 16);
        assert_eq!(options.offset, None);
    }

    #[test]
    fn template_parses_into_defaults() {
        let config: Config = toml::from_str(&Config::generate_config_template()).unwrap();
        assert_eq!(config.waveform, Options::default());
        assert_eq!(config.display.fps, 60);
        assert_eq!(config.source.block_size, 512);
    }

    #[test]
    fn palette_accepts_preset_or_colors() {
        let preset: Options = toml::from_str("palette = \"ocean\"").unwrap();
        assert_eq!(preset.palette, PaletteSpec::Preset(PalettePreset::Ocean));

        let colors: Options = toml::from_str("palette = [\"#000000\", \"#ffffff\"]").unwrap();
        assert_eq!(
            colors.palette,
            PaletteSpec::Colors(vec!["#000000".into(), "#ffffff".into()])
        );
    }

    #[test]
    fn merge_applies_valid_patch() {
        let mut options = Options::default();
        options
            .merge(&OptionsPatch {
                scale: Some(8.0),
                offset: Some(Some(-100)),
                log: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(options.scale, 8.0);
        assert_eq!(options.offset, Some(-100));
        assert!(options.log_scale().unwrap().is_some());

        options
            .merge(&OptionsPatch {
                offset: Some(None),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(options.offset, None);
    }

    #[test]
    fn merge_rejects_invalid_patch_without_side_effects() {
        let mut options = Options::default();
        let before = options.clone();

        let bad_scale = OptionsPatch {
            scale: Some(0.0),
            log: Some(true),
            ..Default::default()
        };
        assert_eq!(options.merge(&bad_scale), Err(Error::InvalidScale(0.0)));

        let bad_range = OptionsPatch {
            min_db: Some(0.0),
            max_db: Some(-20.0),
            ..Default::default()
        };
        assert!(matches!(
            options.merge(&bad_range),
            Err(Error::InvalidDecibelRange { .. })
        ));

        let bad_palette = OptionsPatch {
            palette: Some(PaletteSpec::Colors(vec![])),
            ..Default::default()
        };
        assert!(matches!(
            options.merge(&bad_palette),
            Err(Error::InvalidPalette(_))
        ));

        let bad_viewport = OptionsPatch {
            viewport: Some(Viewport::new(0, 0, 0, 100)),
            ..Default::default()
        };
        assert!(matches!(
            options.merge(&bad_viewport),
            Err(Error::InvalidViewport { .. })
        ));

        assert_eq!(options, before);
    }

    #[test]
    fn viewport_edges_must_fit_pixel_range() {
        assert!(Viewport::new(u32::MAX - 16, 0, 16, 8).validate().is_ok());
        assert_eq!(
            Viewport::new(u32::MAX - 4, 0, 16, 8).validate(),
            Err(Error::InvalidViewport {
                width: 16,
                height: 8
            })
        );
        assert!(Viewport::new(0, u32::MAX, 16, 1).validate().is_err());

        let options = Options {
            viewport: Viewport::new(u32::MAX - 4, 0, 16, 8),
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(Error::InvalidViewport { .. })));
    }

    #[test]
    fn query_follows_viewport_and_offset() {
        let options = Options {
            offset: Some(-50),
            viewport: Viewport::new(10, 10, 300, 80),
            ..Default::default()
        };
        let query = options.query().unwrap();
        assert_eq!(query.count, 300);
        assert_eq!(query.anchor, Anchor::Offset(-50));
        assert_eq!(query.log, None);
    }
}
