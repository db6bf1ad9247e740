use palette::{Hsl, IntoColor, Mix, Srgb, Srgba, WithAlpha};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Opacity of the center baseline relative to its base color.
pub const BASELINE_ALPHA: f32 = 0.4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PalettePreset {
    #[default]
    Spectrum,
    Fire,
    Ocean,
    Forest,
    Purple,
    Monochrome,
}

impl FromStr for PalettePreset {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spectrum" => Ok(Self::Spectrum),
            "fire" => Ok(Self::Fire),
            "ocean" => Ok(Self::Ocean),
            "forest" => Ok(Self::Forest),
            "purple" => Ok(Self::Purple),
            "mono" | "monochrome" => Ok(Self::Monochrome),
            _ => Err(format!("Unknown palette preset: {}", s)),
        }
    }
}

impl PalettePreset {
    /// Color for a position along the palette (0.0 = quiet, 1.0 = loud).
    pub fn color(&self, position: f32) -> Srgba {
        let t = position.clamp(0.0, 1.0);
        let (h, s, l) = match self {
            // Deep violet through blue and green up to hot red
            PalettePreset::Spectrum => (270.0 - t * 270.0, 0.9, 0.25 + t * 0.35),
            PalettePreset::Fire => (t * 60.0, 0.95, 0.15 + t * 0.5),
            PalettePreset::Ocean => (240.0 - t * 60.0, 0.8, 0.2 + t * 0.45),
            PalettePreset::Forest => (140.0 - t * 60.0, 0.75, 0.15 + t * 0.45),
            PalettePreset::Purple => (270.0 + t * 60.0, 0.8, 0.2 + t * 0.45),
            PalettePreset::Monochrome => (0.0, 0.0, 0.1 + t * 0.85),
        };

        let rgb: Srgb = Hsl::new(h, s, l).into_color();
        rgb.with_alpha(1.0)
    }

    /// Expand the preset into `levels` evenly spaced stops.
    pub fn stops(&self, levels: usize) -> Vec<Srgba> {
        let span = levels.saturating_sub(1).max(1) as f32;
        (0..levels).map(|i| self.color(i as f32 / span)).collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            PalettePreset::Spectrum => "spectrum",
            PalettePreset::Fire => "fire",
            PalettePreset::Ocean => "ocean",
            PalettePreset::Forest => "forest",
            PalettePreset::Purple => "purple",
            PalettePreset::Monochrome => "monochrome",
        }
    }

    pub fn all() -> &'static [PalettePreset] {
        &[
            PalettePreset::Spectrum,
            PalettePreset::Fire,
            PalettePreset::Ocean,
            PalettePreset::Forest,
            PalettePreset::Purple,
            PalettePreset::Monochrome,
        ]
    }

    pub fn next(&self) -> Self {
        let all = Self::all();
        let current = all.iter().position(|c| c == self).unwrap_or(0);
        all[(current + 1) % all.len()]
    }
}

/// Parse a `#rrggbb` or `#rgb` color.
pub fn parse_color(value: &str) -> Result<Srgba> {
    let hex = value.trim();
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    let rgb = Srgb::<u8>::from_str(hex)
        .map_err(|e| Error::InvalidPalette(format!("'{}': {}", value, e)))?;
    Ok(rgb.into_format::<f32>().with_alpha(1.0))
}

/// Quantize to 8-bit straight (non-premultiplied) RGBA.
pub fn to_rgba8(color: Srgba) -> [u8; 4] {
    let quantize = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    [
        quantize(color.red),
        quantize(color.green),
        quantize(color.blue),
        quantize(color.alpha),
    ]
}

/// Ordered color stops plus the derived colors renderers draw with.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    stops: Vec<Srgba>,
    active: Option<Srgba>,
    background: Option<Srgba>,
    levels: usize,
}

impl Palette {
    pub fn new(stops: Vec<Srgba>, levels: usize) -> Result<Self> {
        if stops.is_empty() {
            return Err(Error::InvalidPalette("palette has no colors".to_string()));
        }
        if levels == 0 {
            return Err(Error::InvalidLevels(levels));
        }

        Ok(Self {
            stops,
            active: None,
            background: None,
            levels,
        })
    }

    pub fn from_preset(preset: PalettePreset, levels: usize) -> Result<Self> {
        Self::new(preset.stops(levels.max(2)), levels)
    }

    pub fn from_hex<S: AsRef<str>>(colors: &[S], levels: usize) -> Result<Self> {
        let stops = colors
            .iter()
            .map(|c| parse_color(c.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(stops, levels)
    }

    pub fn with_active(mut self, active: Option<Srgba>) -> Self {
        self.active = active;
        self
    }

    pub fn with_background(mut self, background: Option<Srgba>) -> Self {
        self.background = background;
        self
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn stops(&self) -> &[Srgba] {
        &self.stops
    }

    pub fn background(&self) -> Option<Srgba> {
        self.background
    }

    /// Interpolated color at `t` in `[0, 1]` along the stops.
    pub fn color_at(&self, t: f32) -> Srgba {
        let last = self.stops.len() - 1;
        if last == 0 {
            return self.stops[0];
        }

        let scaled = t.clamp(0.0, 1.0) * last as f32;
        let index = (scaled.floor() as usize).min(last - 1);
        let fraction = scaled - index as f32;
        self.stops[index].mix(self.stops[index + 1], fraction)
    }

    /// Color used to fill or stroke the waveform body.
    pub fn foreground(&self) -> Srgba {
        self.color_at(1.0)
    }

    /// Center line color: the active highlight, or the palette midpoint.
    pub fn baseline(&self) -> Srgba {
        let base = self.active.unwrap_or_else(|| self.color_at(0.5));
        let mut color = base;
        color.alpha = base.alpha * BASELINE_ALPHA;
        color
    }

    /// One color per intensity bucket, sampled at bucket centers.
    pub fn colormap(&self) -> Vec<Srgba> {
        (0..self.levels)
            .map(|i| self.color_at((i as f32 + 0.5) / self.levels as f32))
            .collect()
    }

    /// `colormap()` flattened to RGBA8 texels.
    pub fn colormap_rgba8(&self) -> Vec<u8> {
        self.colormap().into_iter().flat_map(to_rgba8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Srgba, b: Srgba) -> bool {
        (a.red - b.red).abs() < 1e-4
            && (a.green - b.green).abs() < 1e-4
            && (a.blue - b.blue).abs() < 1e-4
            && (a.alpha - b.alpha).abs() < 1e-4
    }

    #[test]
    fn parses_hex_with_and_without_hash() {
        assert_eq!(to_rgba8(parse_color("#ff8000").unwrap()), [255, 128, 0, 255]);
        assert_eq!(to_rgba8(parse_color("00ff00").unwrap()), [0, 255, 0, 255]);
    }

    #[test]
    fn malformed_colors_are_configuration_errors() {
        assert!(matches!(parse_color("#zzzzzz"), Err(Error::InvalidPalette(_))));
        assert!(matches!(
            Palette::from_hex(&["#000000", "blue-ish"], 16),
            Err(Error::InvalidPalette(_))
        ));
        assert!(matches!(
            Palette::from_hex::<&str>(&[], 16),
            Err(Error::InvalidPalette(_))
        ));
        assert_eq!(
            Palette::from_hex(&["#000000"], 0).unwrap_err(),
            Error::InvalidLevels(0)
        );
    }

    #[test]
    fn color_at_interpolates_between_stops() {
        let palette = Palette::from_hex(&["#000000", "#ffffff"], 16).unwrap();
        assert_eq!(to_rgba8(palette.color_at(0.0)), [0, 0, 0, 255]);
        assert_eq!(to_rgba8(palette.color_at(1.0)), [255, 255, 255, 255]);
        assert_eq!(to_rgba8(palette.color_at(0.5)), [128, 128, 128, 255]);
        assert_eq!(palette.color_at(7.0), palette.color_at(1.0));
    }

    #[test]
    fn single_stop_palette_is_flat() {
        let palette = Palette::from_hex(&["#336699"], 4).unwrap();
        assert!(palette.colormap().iter().all(|&c| c == palette.foreground()));
    }

    #[test]
    fn colormap_samples_bucket_centers() {
        let palette = Palette::from_hex(&["#000000", "#ffffff"], 4).unwrap();
        let map = palette.colormap();
        assert_eq!(map.len(), 4);
        assert!(close(map[0], palette.color_at(0.125)));
        assert!(close(map[3], palette.color_at(0.875)));
        assert_eq!(palette.colormap_rgba8().len(), 16);
    }

    #[test]
    fn baseline_prefers_active_color() {
        let active = parse_color("#ff0000").unwrap();
        let palette = Palette::from_hex(&["#000000", "#ffffff"], 16)
            .unwrap()
            .with_active(Some(active));
        let baseline = palette.baseline();
        assert_eq!(baseline.red, 1.0);
        assert!((baseline.alpha - BASELINE_ALPHA).abs() < 1e-6);

        let plain = Palette::from_hex(&["#000000", "#ffffff"], 16).unwrap();
        assert!(close(
            plain.baseline(),
            plain.color_at(0.5).with_alpha(BASELINE_ALPHA)
        ));
    }

    #[test]
    fn presets_cycle_and_expand() {
        let mut preset = PalettePreset::default();
        for _ in 0..PalettePreset::all().len() {
            preset = preset.next();
        }
        assert_eq!(preset, PalettePreset::Spectrum);
        assert_eq!("mono".parse::<PalettePreset>(), Ok(PalettePreset::Monochrome));

        let palette = Palette::from_preset(PalettePreset::Fire, 16).unwrap();
        assert_eq!(palette.stops().len(), 16);
        assert_eq!(palette.colormap().len(), 16);
    }
}
