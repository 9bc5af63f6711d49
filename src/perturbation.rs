//! Perturbations: sources of boundary interfaces and capacity events.

use crate::engine::ShockwaveEngine;
use crate::error::{Error, Result};
use crate::event::CapacityEvent;
use crate::geom::Point;
use crate::interface::Interface;

/// Something that disturbs the corridor: registers its boundary interfaces
/// and capacity events when a run begins.
///
/// `initialize` is called once per run, so it must register from its own
/// configuration rather than accumulated state; the engine discards all
/// registrations between runs.
pub trait Perturbation {
    fn initialize(&mut self, engine: &mut ShockwaveEngine) -> Result<()>;
}

/// Registers one boundary interface with a capacity restriction over its
/// whole extent: restricted at the start point, released at the end point.
fn register_span(
    engine: &mut ShockwaveEngine,
    start: Point,
    end: Point,
    capacity: f64,
) -> Result<()> {
    let interface = Interface::boundary(start, end)?;
    let id = engine.register_boundary_interface(interface)?;
    engine.register_capacity_event(CapacityEvent::new(start, id, None, Some(capacity))?)?;
    engine.register_capacity_event(CapacityEvent::new(end, id, Some(capacity), None)?)?;
    Ok(())
}

fn require_horizon(engine: &ShockwaveEngine) -> Result<f64> {
    engine
        .simulation_horizon()
        .ok_or(Error::Contract("perturbations initialize inside a run"))
}

/// A stationary capacity restriction over a time window, such as an incident
/// blocking part of the road.
#[derive(Clone, Debug)]
pub struct TimedBottleneck {
    position: f64,
    time_start: f64,
    time_end: f64,
    capacity: f64,
}

impl TimedBottleneck {
    pub fn new(position: f64, time_start: f64, time_end: f64, capacity: f64) -> Result<Self> {
        if !capacity.is_finite() || capacity < 0.0 {
            return Err(Error::Config(format!(
                "bottleneck capacity must be non-negative, got {capacity}"
            )));
        }
        if !(time_end > time_start) {
            return Err(Error::Config(format!(
                "bottleneck window must have positive duration, got [{time_start}, {time_end}]"
            )));
        }
        Ok(Self {
            position,
            time_start,
            time_end,
            capacity,
        })
    }
}

impl Perturbation for TimedBottleneck {
    fn initialize(&mut self, engine: &mut ShockwaveEngine) -> Result<()> {
        let horizon = require_horizon(engine)?;
        // A bottleneck not fully inside the simulated window is ignored.
        if self.time_start < 0.0 || self.time_end > horizon {
            return Ok(());
        }
        register_span(
            engine,
            Point::new(self.time_start, self.position),
            Point::new(self.time_end, self.position),
            self.capacity,
        )
    }
}

/// A moving capacity restriction between two points of the plane, such as a
/// slow vehicle travelling along the corridor.
#[derive(Clone, Debug)]
pub struct LineBottleneck {
    start: Point,
    end: Point,
    capacity: f64,
}

impl LineBottleneck {
    pub fn new(start: Point, end: Point, capacity: f64) -> Result<Self> {
        if !capacity.is_finite() || capacity < 0.0 {
            return Err(Error::Config(format!(
                "bottleneck capacity must be non-negative, got {capacity}"
            )));
        }
        if !(end.time > start.time) {
            return Err(Error::Config(format!(
                "bottleneck must move forward in time, got {start} to {end}"
            )));
        }
        if start.time < 0.0 {
            return Err(Error::Config(format!(
                "bottleneck cannot start before the simulation, got {start}"
            )));
        }
        Ok(Self {
            start,
            end,
            capacity,
        })
    }
}

impl Perturbation for LineBottleneck {
    fn initialize(&mut self, engine: &mut ShockwaveEngine) -> Result<()> {
        require_horizon(engine)?;
        register_span(engine, self.start, self.end, self.capacity)
    }
}

/// A fixed-position signal cycling through phases, fully blocking the road
/// during its blocking phases.
#[derive(Clone, Debug)]
pub struct TrafficLight {
    position: f64,
    cycles: Vec<f64>,
    blocking: Vec<bool>,
    initial_phase: usize,
}

impl TrafficLight {
    pub fn new(
        position: f64,
        cycles: Vec<f64>,
        blocking: Vec<bool>,
        initial_phase: usize,
    ) -> Result<Self> {
        if cycles.is_empty() || cycles.len() != blocking.len() {
            return Err(Error::Config(format!(
                "traffic light needs matching phase durations and flags, got {} and {}",
                cycles.len(),
                blocking.len()
            )));
        }
        if cycles.iter().any(|d| !d.is_finite() || *d <= 0.0) {
            return Err(Error::Config(
                "traffic light phase durations must be positive".into(),
            ));
        }
        if initial_phase >= cycles.len() {
            return Err(Error::Config(format!(
                "initial phase {initial_phase} is out of range"
            )));
        }
        Ok(Self {
            position,
            cycles,
            blocking,
            initial_phase,
        })
    }
}

impl Perturbation for TrafficLight {
    fn initialize(&mut self, engine: &mut ShockwaveEngine) -> Result<()> {
        let horizon = require_horizon(engine)?;
        let mut time = 0.0;
        let mut phase = self.initial_phase;
        while time <= horizon {
            let duration = self.cycles[phase];
            if self.blocking[phase] {
                register_span(
                    engine,
                    Point::new(time, self.position),
                    Point::new(time + duration, self.position),
                    0.0,
                )?;
            }
            time += duration;
            phase = (phase + 1) % self.cycles.len();
        }
        Ok(())
    }
}
