//! Crate error type.

use crate::geom::Point;
use thiserror::Error;

/// Errors surfaced by the flow model, geometry and simulation engine.
///
/// Stale events and abandoned cutoffs are deliberately *not* represented
/// here: skipping a superseded event is the normal control flow of the
/// solver, and a rejected extent restriction is logged and treated as
/// "no new interface" by the offending event.
#[derive(Debug, Error)]
pub enum Error {
    /// A construction-time parameter violated its constraints.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A caller broke a registration contract (wrong kind of interface or
    /// event through an entry point).
    #[error("contract violation: {0}")]
    Contract(&'static str),

    /// The solver reached a state that should be impossible. Aborts the run.
    #[error("invariant broken at {at}: {what}")]
    Invariant { what: String, at: Point },

    /// A requested extent restriction could not be applied.
    #[error("cutoff rejected at {at}: {reason}")]
    Cutoff { at: Point, reason: &'static str },

    /// A density outside `[0, jam_density]` was passed to the flow model.
    #[error("density {0} is outside the fundamental diagram")]
    InvalidDensity(f64),

    /// A flow outside `[0, capacity]` was passed to the flow model.
    #[error("flow {0} is outside the fundamental diagram")]
    InvalidFlow(f64),

    /// Two points sharing a time admit no finite slope.
    #[error("no finite slope between {0} and {1}")]
    DegenerateSlope(Point, Point),

    /// Two states sharing a density admit no interface slope.
    #[error("states with equal density {0} admit no interface slope")]
    DegenerateStates(f64),
}

pub type Result<T> = std::result::Result<T, Error>;
