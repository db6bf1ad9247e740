//! Per-column reduction of raw samples into peak/trough/mean triples.
//!
//! Every statistic is computed by a single linear pass over the window, so
//! the cost of a query is proportional to the samples it covers, never to
//! the amount of history held by the storage.

use crate::error::{Error, Result};

/// Summary of one output pixel column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColumnStats {
    pub top: f32,
    pub bottom: f32,
    pub average: f32,
}

impl ColumnStats {
    /// Sentinel used for columns that fall outside the retained data.
    pub const ZERO: Self = Self {
        top: 0.0,
        bottom: 0.0,
        average: 0.0,
    };

    /// A column backed by exactly one sample value.
    #[inline]
    pub fn point(value: f32) -> Self {
        Self {
            top: value,
            bottom: value,
            average: value,
        }
    }

    /// Reduce a window that may be split across the ring's wrap point.
    ///
    /// Non-finite samples are skipped. Returns `None` when the window holds
    /// no finite sample.
    pub fn from_segments(first: &[f32], second: &[f32]) -> Option<Self> {
        let mut count = 0usize;
        let mut top = f32::MIN;
        let mut bottom = f32::MAX;
        let mut sum = 0.0f64;
        for &sample in first.iter().chain(second) {
            if !sample.is_finite() {
                continue;
            }
            count += 1;
            top = top.max(sample);
            bottom = bottom.min(sample);
            sum += sample as f64;
        }

        if count == 0 {
            return None;
        }

        let average = ((sum / count as f64) as f32).clamp(bottom, top);
        Some(Self {
            top,
            bottom,
            average,
        })
    }

    /// Apply log compression to all three statistics.
    #[inline]
    pub fn compress(self, scale: &LogScale) -> Self {
        Self {
            top: scale.apply(self.top),
            bottom: scale.apply(self.bottom),
            average: scale.apply(self.average),
        }
    }
}

/// Decibel-range driven amplitude compression.
///
/// Maps `a` to `sign(a) * log10(1 + (10^D - 1) * |a|) / D`, where `D` is the
/// number of decades spanned by the configured dB range. Small amplitudes
/// are lifted towards visibility while `0` and `±1` stay fixed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogScale {
    decades: f64,
    gain: f64,
}

impl LogScale {
    pub fn new(min_db: f64, max_db: f64) -> Result<Self> {
        if !(min_db.is_finite() && max_db.is_finite()) || min_db >= max_db {
            return Err(Error::InvalidDecibelRange {
                min: min_db,
                max: max_db,
            });
        }

        let decades = (max_db - min_db) / 20.0;
        Ok(Self {
            decades,
            gain: 10f64.powf(decades) - 1.0,
        })
    }

    pub fn decades(&self) -> f64 {
        self.decades
    }

    pub fn apply(&self, amplitude: f32) -> f32 {
        if amplitude == 0.0 || amplitude.is_nan() {
            return 0.0;
        }

        let magnitude = amplitude.abs() as f64;
        if magnitude >= 1.0 {
            return amplitude.signum();
        }

        let compressed = (1.0 + self.gain * magnitude).log10() / self.decades;
        (compressed.min(1.0) as f32).copysign(amplitude)
    }
}

/// Result of a storage query: one `(top, bottom, average)` triple per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReducedFrame {
    pub tops: Vec<f32>,
    pub bottoms: Vec<f32>,
    pub averages: Vec<f32>,
    /// Logical sample position of column 0.
    pub start: f64,
    /// Samples per column used to build this frame.
    pub scale: f64,
    /// Set when the frame only carries the newest trailing columns.
    pub tail: Option<usize>,
}

impl ReducedFrame {
    pub fn with_capacity(count: usize, start: f64, scale: f64) -> Self {
        Self {
            tops: Vec::with_capacity(count),
            bottoms: Vec::with_capacity(count),
            averages: Vec::with_capacity(count),
            start,
            scale,
            tail: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tops.is_empty()
    }

    pub fn push(&mut self, column: ColumnStats) {
        self.tops.push(column.top);
        self.bottoms.push(column.bottom);
        self.averages.push(column.average);
    }

    pub fn column(&self, index: usize) -> Option<ColumnStats> {
        Some(ColumnStats {
            top: *self.tops.get(index)?,
            bottom: *self.bottoms.get(index)?,
            average: *self.averages.get(index)?,
        })
    }

    pub fn columns(&self) -> impl Iterator<Item = ColumnStats> + '_ {
        self.tops
            .iter()
            .zip(&self.bottoms)
            .zip(&self.averages)
            .map(|((&top, &bottom), &average)| ColumnStats {
                top,
                bottom,
                average,
            })
    }
}
