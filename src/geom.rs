//! Geometric primitives on the time-position plane.
//!
//! Time is the horizontal axis, position the vertical one. All comparisons
//! are tolerant to floating point error via [ABS_TOL], and hash-based lookup
//! of points goes through [PointMap], which quantizes coordinates so that
//! tolerant equality and bucket lookup agree.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// Absolute tolerance for all floating point comparisons.
pub const ABS_TOL: f64 = 1e-4;

/// Returns true if two values are equal up to [ABS_TOL].
pub fn almost_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= ABS_TOL
}

/// A point on the time-position diagram.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    /// The time of the point in s.
    pub time: f64,
    /// The position of the point in m.
    pub position: f64,
}

impl Point {
    /// Creates a new point.
    pub const fn new(time: f64, position: f64) -> Self {
        Self { time, position }
    }

    /// Returns true if both coordinates are equal up to [ABS_TOL].
    pub fn almost_eq(self, other: Self) -> bool {
        almost_eq(self.time, other.time) && almost_eq(self.position, other.position)
    }

    /// Computes the slope of the line through this point and `other`.
    ///
    /// Fails if the two points share a time, as the slope would be vertical.
    pub fn slope_to(self, other: Self) -> Result<f64> {
        if almost_eq(self.time, other.time) {
            return Err(Error::DegenerateSlope(self, other));
        }
        Ok((self.position - other.position) / (self.time - other.time))
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(t={}, x={})", self.time, self.position)
    }
}

/// A map keyed by points under tolerant equality.
///
/// Coordinates are quantized onto an [ABS_TOL]-sized grid with `floor`, so two
/// points within tolerance land in the same or an adjacent cell; lookups probe
/// the 3x3 cell neighbourhood and compare against the stored point. Callers
/// must check [PointMap::get] before [PointMap::insert], as insertion does not
/// coalesce near-duplicates itself.
#[derive(Clone, Debug, Default)]
pub struct PointMap<T> {
    cells: HashMap<(i64, i64), (Point, T)>,
}

/// Quantizes a point onto the tolerance grid.
fn cell_of(point: Point) -> (i64, i64) {
    (
        (point.time / ABS_TOL).floor() as i64,
        (point.position / ABS_TOL).floor() as i64,
    )
}

impl<T> PointMap<T> {
    pub fn new() -> Self {
        Self {
            cells: HashMap::new(),
        }
    }

    /// Looks up the value stored under a point within tolerance of `point`.
    pub fn get(&self, point: Point) -> Option<&T> {
        let (ct, cx) = cell_of(point);
        for dt in -1..=1 {
            for dx in -1..=1 {
                if let Some((stored, value)) = self.cells.get(&(ct + dt, cx + dx)) {
                    if stored.almost_eq(point) {
                        return Some(value);
                    }
                }
            }
        }
        None
    }

    /// Inserts a value keyed by `point`.
    pub fn insert(&mut self, point: Point, value: T) {
        self.cells.insert(cell_of(point), (point, value));
    }

    /// Removes and returns the value stored under a point within tolerance.
    pub fn remove(&mut self, point: Point) -> Option<T> {
        let (ct, cx) = cell_of(point);
        for dt in -1..=1 {
            for dx in -1..=1 {
                let cell = (ct + dt, cx + dx);
                if let Some((stored, _)) = self.cells.get(&cell) {
                    if stored.almost_eq(point) {
                        return self.cells.remove(&cell).map(|(_, value)| value);
                    }
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}
