//! The fundamental diagram (flow model) and traffic states.

use crate::error::{Error, Result};
use crate::geom::almost_eq;

/// A section of the fundamental diagram with constant density and flow.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct State {
    /// The density of the state in veh/m.
    pub density: f64,
    /// The flow of the state in veh/s.
    pub flow: f64,
}

impl State {
    /// Creates a new state.
    pub const fn new(density: f64, flow: f64) -> Self {
        Self { density, flow }
    }

    /// Returns true if density and flow both match up to tolerance.
    pub fn almost_eq(&self, other: &State) -> bool {
        almost_eq(self.density, other.density) && almost_eq(self.flow, other.flow)
    }

    /// The speed of vehicles in this state in m/s.
    pub fn speed(&self) -> f64 {
        if self.density == 0.0 {
            f64::INFINITY
        } else {
            self.flow / self.density
        }
    }

    /// The Rankine-Hugoniot slope of an interface separating this state from
    /// `other` on the time-position plane, in m/s.
    ///
    /// Fails if the states share a density.
    pub fn interface_slope(&self, other: &State) -> Result<f64> {
        if almost_eq(self.density, other.density) {
            return Err(Error::DegenerateStates(self.density));
        }
        Ok((self.flow - other.flow) / (self.density - other.density))
    }
}

/// A triangular fundamental diagram: flow rises at the freeflow speed up to
/// the capacity density, then falls at the backward wave speed down to zero
/// at the jam density.
///
/// Immutable once constructed; all parameter constraints are checked by
/// [FundamentalDiagram::new].
#[derive(Clone, Debug)]
pub struct FundamentalDiagram {
    /// The freeflow speed in m/s.
    freeflow_speed: f64,
    /// The jam density in veh/m.
    jam_density: f64,
    /// The backward wave speed in m/s (positive magnitude).
    wave_speed: f64,
    /// The uniform background density in veh/m.
    initial_density: f64,
    /// The density at which flow peaks, in veh/m.
    capacity_density: f64,
    /// The maximum flow in veh/s.
    capacity: f64,
}

impl FundamentalDiagram {
    /// Creates a fundamental diagram from its physical parameters.
    ///
    /// Requires `freeflow_speed`, `jam_density` and `wave_speed` positive,
    /// `freeflow_speed > wave_speed`, and an initial density within
    /// `[0, jam_density]`.
    pub fn new(
        freeflow_speed: f64,
        jam_density: f64,
        wave_speed: f64,
        initial_density: f64,
    ) -> Result<Self> {
        if !(freeflow_speed > 0.0 && jam_density > 0.0 && wave_speed > 0.0) {
            return Err(Error::Config(format!(
                "speeds and jam density must be positive (vf={freeflow_speed}, kj={jam_density}, w={wave_speed})"
            )));
        }
        if freeflow_speed <= wave_speed {
            return Err(Error::Config(format!(
                "freeflow speed {freeflow_speed} must exceed wave speed {wave_speed}"
            )));
        }
        if !(0.0..=jam_density).contains(&initial_density) {
            return Err(Error::Config(format!(
                "initial density {initial_density} outside [0, {jam_density}]"
            )));
        }

        // Intersection of the freeflow and congested branches.
        let capacity_density = wave_speed * jam_density / (wave_speed + freeflow_speed);
        let capacity = capacity_density * freeflow_speed;

        Ok(Self {
            freeflow_speed,
            jam_density,
            wave_speed,
            initial_density,
            capacity_density,
            capacity,
        })
    }

    /// The freeflow speed in m/s.
    pub fn freeflow_speed(&self) -> f64 {
        self.freeflow_speed
    }

    /// The jam density in veh/m.
    pub fn jam_density(&self) -> f64 {
        self.jam_density
    }

    /// The backward wave speed in m/s.
    pub fn wave_speed(&self) -> f64 {
        self.wave_speed
    }

    /// The density at which flow peaks, in veh/m.
    pub fn capacity_density(&self) -> f64 {
        self.capacity_density
    }

    /// The maximum flow in veh/s.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Returns true if `density` lies on the diagram.
    pub fn is_valid_density(&self, density: f64) -> bool {
        density >= -crate::geom::ABS_TOL && density <= self.jam_density + crate::geom::ABS_TOL
    }

    /// The state at a given density.
    pub fn state_at_density(&self, density: f64) -> Result<State> {
        if !self.is_valid_density(density) {
            return Err(Error::InvalidDensity(density));
        }
        let flow = if density <= self.capacity_density {
            self.freeflow_speed * density
        } else {
            self.capacity - self.wave_speed * (density - self.capacity_density)
        };
        Ok(State::new(density, flow))
    }

    /// The state at a given flow.
    ///
    /// Every flow below capacity maps to two densities; `rightmost` selects
    /// the congested (high-density) branch, otherwise the freeflow branch.
    pub fn state_at_flow(&self, flow: f64, rightmost: bool) -> Result<State> {
        if flow < -crate::geom::ABS_TOL || flow > self.capacity + crate::geom::ABS_TOL {
            return Err(Error::InvalidFlow(flow));
        }
        if almost_eq(flow, self.capacity) {
            return Ok(self.max_state());
        }
        let density = if rightmost {
            self.capacity_density + (self.capacity - flow) / self.wave_speed
        } else {
            flow / self.freeflow_speed
        };
        Ok(State::new(density, flow))
    }

    /// The uniform background state.
    pub fn initial_state(&self) -> State {
        // Initial density was validated at construction.
        let flow = if self.initial_density <= self.capacity_density {
            self.freeflow_speed * self.initial_density
        } else {
            self.capacity - self.wave_speed * (self.initial_density - self.capacity_density)
        };
        State::new(self.initial_density, flow)
    }

    /// The state at maximum flow.
    pub fn max_state(&self) -> State {
        State::new(self.capacity_density, self.capacity)
    }

    /// The fully congested state.
    pub fn jam_state(&self) -> State {
        State::new(self.jam_density, 0.0)
    }

    /// The empty-road state.
    pub fn empty_state(&self) -> State {
        State::new(0.0, 0.0)
    }

    /// The interface slope between the states at two densities.
    pub fn interface_slope(&self, d1: f64, d2: f64) -> Result<f64> {
        let s1 = self.state_at_density(d1)?;
        let s2 = self.state_at_density(d2)?;
        s1.interface_slope(&s2)
    }

    /// Returns true if a state lies strictly on the congested branch.
    ///
    /// The capacity point itself is not queued.
    pub fn is_queued(&self, state: &State) -> bool {
        state.density > self.capacity_density && !almost_eq(state.density, self.capacity_density)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn diagram() -> FundamentalDiagram {
        FundamentalDiagram::new(3.0, 5.0, 1.0, 0.9).unwrap()
    }

    #[test]
    fn derived_capacity() {
        let fd = diagram();
        assert_approx_eq!(fd.capacity_density(), 1.25);
        assert_approx_eq!(fd.capacity(), 3.75);
        assert_approx_eq!(fd.initial_state().flow, 2.7);
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(FundamentalDiagram::new(0.0, 5.0, 1.0, 0.9).is_err());
        assert!(FundamentalDiagram::new(3.0, -1.0, 1.0, 0.9).is_err());
        assert!(FundamentalDiagram::new(1.0, 5.0, 3.0, 0.9).is_err());
        assert!(FundamentalDiagram::new(3.0, 5.0, 1.0, 5.1).is_err());
        assert!(FundamentalDiagram::new(3.0, 5.0, 1.0, -0.1).is_err());
    }

    #[test]
    fn both_branches_of_state_at_flow() {
        let fd = diagram();
        let queued = fd.state_at_flow(1.3, true).unwrap();
        assert_approx_eq!(queued.density, 3.7);
        let free = fd.state_at_flow(1.3, false).unwrap();
        assert_approx_eq!(free.density, 1.3 / 3.0);
        // At capacity, both branches collapse to the capacity point.
        let top = fd.state_at_flow(3.75, true).unwrap();
        assert_approx_eq!(top.density, 1.25);
        assert!(fd.state_at_flow(4.0, true).is_err());
        assert!(fd.state_at_flow(-0.5, false).is_err());
    }

    #[test]
    fn state_at_density_branches() {
        let fd = diagram();
        assert_approx_eq!(fd.state_at_density(0.9).unwrap().flow, 2.7);
        assert_approx_eq!(fd.state_at_density(3.7).unwrap().flow, 1.3);
        assert_approx_eq!(fd.state_at_density(5.0).unwrap().flow, 0.0);
        assert!(fd.state_at_density(5.2).is_err());
    }

    #[test]
    fn queued_excludes_capacity_point() {
        let fd = diagram();
        assert!(fd.is_queued(&fd.state_at_density(3.7).unwrap()));
        assert!(!fd.is_queued(&fd.max_state()));
        assert!(!fd.is_queued(&fd.initial_state()));
        assert!(fd.is_queued(&fd.jam_state()));
    }

    #[test]
    fn rankine_hugoniot_slope() {
        let fd = diagram();
        // Queue shock between the background state and the queued state at
        // flow 1.3: (1.3 - 2.7) / (3.7 - 0.9) = -0.5.
        assert_approx_eq!(fd.interface_slope(3.7, 0.9).unwrap(), -0.5);
        assert!(fd.interface_slope(0.9, 0.9).is_err());
    }
}
