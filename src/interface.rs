//! Interfaces: moving boundaries between two traffic states.

use crate::diagram::State;
use crate::error::{Error, Result};
use crate::geom::{almost_eq, Point, ABS_TOL};

/// Identifies which side of an interface a state lies on.
///
/// `Above` is the greater-position side of the interface on the
/// time-position plane, `Below` the lesser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Side {
    Above,
    Below,
}

/// How an interface came to exist.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
enum Kind {
    /// Created internally by event resolution.
    Computed,
    /// Registered by a perturbation.
    Boundary {
        /// Index of the owning perturbation in the run's registration order.
        source: Option<usize>,
        /// The extent as registered, before any cutoffs.
        original: (Point, Point),
    },
}

/// A linear boundary between two states on the time-position plane, defined
/// by a point, a slope, and a time extent.
///
/// The `above`/`below` states are the states directly above and below the
/// interface in the usual diagram orientation; both are unknown until
/// resolved. The extent only ever shrinks, via [Interface::cutoff].
///
/// Not applicable to vertical interfaces.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Interface {
    /// A point on the interface line, kept within the extent.
    apex: Point,
    /// The velocity of the interface in m/s.
    slope: f64,
    /// The lower time bound of the extent.
    lower: Point,
    /// The upper time bound of the extent; infinite time if unbounded.
    upper: Point,
    /// The state above the interface, once resolved.
    above: Option<State>,
    /// The state below the interface, once resolved.
    below: Option<State>,
    kind: Kind,
}

impl Interface {
    /// Creates a computed interface starting at `apex` with both states
    /// already resolved, unbounded in forward time.
    pub fn computed(apex: Point, slope: f64, above: State, below: State) -> Self {
        Self {
            apex,
            slope,
            lower: apex,
            upper: Point::new(f64::INFINITY, f64::INFINITY),
            above: Some(above),
            below: Some(below),
            kind: Kind::Computed,
        }
    }

    /// Creates a boundary interface spanning `start` to `end`, with both
    /// states unknown.
    ///
    /// Fails if the two points share a time.
    pub fn boundary(start: Point, end: Point) -> Result<Self> {
        let slope = start.slope_to(end)?;
        Ok(Self {
            apex: start,
            slope,
            lower: start,
            upper: end,
            above: None,
            below: None,
            kind: Kind::Boundary {
                source: None,
                original: (start, end),
            },
        })
    }

    /// Returns true if this interface was registered by a perturbation.
    pub fn is_boundary(&self) -> bool {
        matches!(self.kind, Kind::Boundary { .. })
    }

    /// The owning perturbation's registration index, for boundary interfaces.
    pub fn source(&self) -> Option<usize> {
        match self.kind {
            Kind::Boundary { source, .. } => source,
            Kind::Computed => None,
        }
    }

    pub(crate) fn set_source(&mut self, index: usize) {
        if let Kind::Boundary { source, .. } = &mut self.kind {
            *source = Some(index);
        }
    }

    /// The extent as registered, before any cutoffs. Boundary interfaces only.
    pub fn original_bounds(&self) -> Option<(Point, Point)> {
        match self.kind {
            Kind::Boundary { original, .. } => Some(original),
            Kind::Computed => None,
        }
    }

    /// The velocity of the interface in m/s.
    pub fn slope(&self) -> f64 {
        self.slope
    }

    /// The current (lower, upper) time bounds of the extent.
    pub fn bounds(&self) -> (Point, Point) {
        (self.lower, self.upper)
    }

    /// The state on the given side, if resolved.
    pub fn state(&self, side: Side) -> Option<State> {
        match side {
            Side::Above => self.above,
            Side::Below => self.below,
        }
    }

    /// Returns true once both states are resolved.
    pub fn has_states(&self) -> bool {
        self.above.is_some() && self.below.is_some()
    }

    /// Resolves the state on the given side.
    ///
    /// A side may be assigned more than once, but only with a state equal to
    /// the prior value; a conflicting assignment is an invariant violation.
    pub fn set_state(&mut self, side: Side, state: State) -> Result<()> {
        let slot = match side {
            Side::Above => &mut self.above,
            Side::Below => &mut self.below,
        };
        match slot {
            Some(existing) if !existing.almost_eq(&state) => Err(Error::Invariant {
                what: format!(
                    "conflicting {side:?} state: {existing:?} already set, got {state:?}"
                ),
                at: self.apex,
            }),
            _ => {
                *slot = Some(state);
                Ok(())
            }
        }
    }

    /// The position of the interface line at `time`, ignoring the extent.
    fn position_on_line(&self, time: f64) -> f64 {
        self.apex.position + self.slope * (time - self.apex.time)
    }

    /// The position of the interface at `time`, if the interface is defined
    /// there (time within the extent).
    pub fn position_at(&self, time: f64) -> Option<f64> {
        if time < self.lower.time || time > self.upper.time {
            return None;
        }
        Some(self.position_on_line(time))
    }

    /// Returns true if `point` matches either endpoint of the extent.
    pub fn has_endpoint(&self, point: Point) -> bool {
        self.lower.almost_eq(point) || self.upper.almost_eq(point)
    }

    /// The point where this interface crosses `other`, if the crossing lies
    /// within both extents. Parallel interfaces never cross.
    pub fn intersection(&self, other: &Interface) -> Option<Point> {
        if almost_eq(self.slope, other.slope) {
            return None;
        }
        // Point-slope intersection of the two lines.
        let time = (other.apex.position - other.slope * other.apex.time - self.apex.position
            + self.slope * self.apex.time)
            / (self.slope - other.slope);
        let position = self.position_at(time)?;
        other.position_at(time)?;
        Some(Point::new(time, position))
    }

    /// Checks whether a cutoff would be accepted, without applying it.
    ///
    /// Points already at an endpoint are ignored, as [Interface::cutoff]
    /// treats them as no-ops.
    pub fn admits_cutoff(&self, lower: Option<Point>, upper: Option<Point>) -> Result<()> {
        let lower = lower.filter(|p| !self.has_endpoint(*p));
        let upper = upper.filter(|p| !self.has_endpoint(*p));
        for point in lower.iter().chain(upper.iter()) {
            if !almost_eq(self.position_on_line(point.time), point.position) {
                return Err(Error::Cutoff {
                    at: *point,
                    reason: "point does not fall along the interface line",
                });
            }
            if point.time < self.lower.time - ABS_TOL || point.time > self.upper.time + ABS_TOL {
                return Err(Error::Cutoff {
                    at: *point,
                    reason: "point is outside the interface extent",
                });
            }
        }
        if let (Some(lo), Some(hi)) = (lower, upper) {
            if lo.time >= hi.time {
                return Err(Error::Cutoff {
                    at: lo,
                    reason: "lower and upper cutoffs are not time-ordered",
                });
            }
        }
        Ok(())
    }

    /// Restricts the extent at its lower and/or upper end.
    ///
    /// The points must fall along the interface line and within the current
    /// extent. A point matching an existing endpoint is silently dropped, and
    /// the extent only ever shrinks.
    pub fn cutoff(&mut self, lower: Option<Point>, upper: Option<Point>) -> Result<()> {
        self.admits_cutoff(lower, upper)?;
        let lower = lower.filter(|p| !self.has_endpoint(*p));
        let upper = upper.filter(|p| !self.has_endpoint(*p));
        if lower.is_none() && upper.is_none() {
            return Ok(());
        }
        // Keep the apex within the extent.
        self.apex = lower.or(upper).unwrap_or(self.apex);
        if let Some(lo) = lower {
            if lo.time > self.lower.time {
                self.lower = lo;
            }
        }
        if let Some(hi) = upper {
            if hi.time < self.upper.time {
                self.upper = hi;
            }
        }
        Ok(())
    }

    /// Clones this interface as its own continuation past `point`, keeping
    /// the slope, states and provenance but starting the extent at `point`.
    pub(crate) fn continuation_from(&self, point: Point) -> Interface {
        Interface {
            apex: point,
            slope: self.slope,
            lower: point,
            upper: self.upper,
            above: self.above,
            below: self.below,
            kind: self.kind.clone(),
        }
    }
}
