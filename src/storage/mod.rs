//! Bounded sample history with scale-dependent range queries.

mod reduce;

pub use reduce::{ColumnStats, LogScale, ReducedFrame};

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};

/// Where the left edge of a query window sits in the logical stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anchor {
    /// The window ends at the current write cursor.
    Tail,
    /// `>= 0` is an absolute logical index, `< 0` counts back from the cursor.
    Offset(i64),
    /// Absolute, possibly fractional, logical position.
    Exact(f64),
}

impl Anchor {
    pub fn from_offset(offset: Option<i64>) -> Self {
        match offset {
            Some(offset) => Anchor::Offset(offset),
            None => Anchor::Tail,
        }
    }
}

/// Parameters of a range query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Query {
    pub scale: f64,
    pub anchor: Anchor,
    pub count: usize,
    /// Log compression, applied after reduction when present.
    pub log: Option<LogScale>,
    /// Blend neighbouring samples when one sample spans several columns.
    pub interpolate: bool,
}

impl Query {
    pub fn new(scale: f64, anchor: Anchor, count: usize) -> Self {
        Self {
            scale,
            anchor,
            count,
            log: None,
            interpolate: false,
        }
    }

    pub fn with_log(mut self, log: Option<LogScale>) -> Self {
        self.log = log;
        self
    }

    pub fn with_interpolation(mut self, interpolate: bool) -> Self {
        self.interpolate = interpolate;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(Error::InvalidScale(self.scale));
        }
        if self.count == 0 {
            return Err(Error::InvalidCount(self.count));
        }
        Ok(())
    }
}

/// Append-only circular sample buffer.
///
/// `length` is the logical write cursor: it counts every sample ever
/// appended and never decreases. Only the newest `capacity` samples are
/// retained; older indices read as the zero sentinel.
#[derive(Clone)]
pub struct RingStorage {
    slots: Vec<f32>,
    length: u64,
}

impl RingStorage {
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity);
        }

        Ok(Self {
            slots: vec![0.0; capacity],
            length: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn length(&self) -> u64 {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Oldest logical index still retained.
    #[inline]
    pub fn horizon(&self) -> u64 {
        self.length.saturating_sub(self.capacity() as u64)
    }

    /// Append samples and return the new logical length.
    ///
    /// Batches longer than the capacity only copy their newest `capacity`
    /// samples; the rest would be evicted immediately anyway.
    pub fn append(&mut self, samples: &[f32]) -> u64 {
        let capacity = self.capacity();
        let skipped = samples.len().saturating_sub(capacity);
        let retained = &samples[skipped..];

        let cursor = self.length + skipped as u64;
        let slot = (cursor % capacity as u64) as usize;
        let first = retained.len().min(capacity - slot);
        self.slots[slot..slot + first].copy_from_slice(&retained[..first]);
        self.slots[..retained.len() - first].copy_from_slice(&retained[first..]);

        self.length += samples.len() as u64;
        self.length
    }

    /// Drop all samples and reset the cursor.
    pub fn clear(&mut self) {
        self.slots.fill(0.0);
        self.length = 0;
    }

    /// Read a single retained sample.
    pub fn get(&self, index: i64) -> Option<f32> {
        if index < 0 {
            return None;
        }
        let index = index as u64;
        if index < self.horizon() || index >= self.length {
            return None;
        }
        Some(self.slots[(index % self.capacity() as u64) as usize])
    }

    /// Borrow the retained part of `[lo, hi)` as at most two slices.
    fn segments(&self, lo: i64, hi: i64) -> (&[f32], &[f32]) {
        let lo = lo.max(self.horizon() as i64);
        let hi = hi.min(self.length as i64);
        if lo >= hi {
            return (&[], &[]);
        }

        let capacity = self.capacity();
        let start = (lo as u64 % capacity as u64) as usize;
        let len = (hi - lo) as usize;
        if start + len <= capacity {
            (&self.slots[start..start + len], &[])
        } else {
            let head = capacity - start;
            (&self.slots[start..], &self.slots[..len - head])
        }
    }

    /// Resolve an anchor to the logical position of column 0.
    pub fn resolve(&self, anchor: Anchor, scale: f64, count: usize) -> f64 {
        match anchor {
            Anchor::Tail => self.length as f64 - count as f64 * scale,
            Anchor::Offset(offset) if offset < 0 => self.length as f64 + offset as f64,
            Anchor::Offset(offset) => offset as f64,
            Anchor::Exact(position) => position,
        }
    }

    /// Reduce `count` columns of `scale` samples each.
    ///
    /// Requests reaching before index 0 or the eviction horizon are padded
    /// with [`ColumnStats::ZERO`] instead of failing.
    pub fn query(&self, query: &Query) -> Result<ReducedFrame> {
        query.validate()?;

        let start = self.resolve(query.anchor, query.scale, query.count);
        let mut frame = ReducedFrame::with_capacity(query.count, start, query.scale);

        for x in 0..query.count {
            let column = if query.scale >= 1.0 {
                self.window_column(start, x, query.scale)
            } else {
                self.point_column(start, x, query.scale, query.interpolate)
            };

            frame.push(match &query.log {
                Some(log) => column.compress(log),
                None => column,
            });
        }

        Ok(frame)
    }

    fn window_column(&self, start: f64, x: usize, scale: f64) -> ColumnStats {
        let lo = (start + x as f64 * scale).floor() as i64;
        let hi = (start + (x + 1) as f64 * scale).floor() as i64;
        let (first, second) = self.segments(lo, hi);
        ColumnStats::from_segments(first, second).unwrap_or(ColumnStats::ZERO)
    }

    fn point_column(&self, start: f64, x: usize, scale: f64, interpolate: bool) -> ColumnStats {
        let position = start + x as f64 * scale;
        let index = position.floor();
        let Some(value) = self.get(index as i64).filter(|v| v.is_finite()) else {
            return ColumnStats::ZERO;
        };

        if !interpolate {
            return ColumnStats::point(value);
        }

        let fraction = (position - index) as f32;
        let next = self
            .get(index as i64 + 1)
            .filter(|v| v.is_finite())
            .unwrap_or(value);
        ColumnStats::point(value + (next - value) * fraction)
    }
}

impl std::fmt::Debug for RingStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingStorage")
            .field("capacity", &self.capacity())
            .field("length", &self.length)
            .field("horizon", &self.horizon())
            .finish()
    }
}

/// Storage handle shared between the controller and a query worker.
///
/// Appends take the write lock and queries the read lock, so a worker
/// thread never observes a half-written batch.
#[derive(Debug, Clone)]
pub struct SharedStorage {
    inner: Arc<RwLock<RingStorage>>,
}

impl SharedStorage {
    pub fn new(storage: RingStorage) -> Self {
        Self {
            inner: Arc::new(RwLock::new(storage)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, RingStorage> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, RingStorage> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn append(&self, samples: &[f32]) -> u64 {
        self.write().append(samples)
    }

    pub fn length(&self) -> u64 {
        self.read().length()
    }

    pub fn query(&self, query: &Query) -> Result<ReducedFrame> {
        self.read().query(query)
    }
}
