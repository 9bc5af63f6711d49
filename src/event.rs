//! Events driving the simulation forward.

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::geom::Point;
use crate::InterfaceId;

/// A scheduled capacity change on a boundary interface.
///
/// `prior` and `posterior` are the flow limits either side of the event; a
/// `None` means "whatever the surrounding traffic supplies" before the event,
/// or "unrestricted" after it.
#[derive(Clone, Debug)]
pub struct CapacityEvent {
    pub point: Point,
    pub interface: InterfaceId,
    pub prior: Option<f64>,
    pub posterior: Option<f64>,
}

impl CapacityEvent {
    pub fn new(
        point: Point,
        interface: InterfaceId,
        prior: Option<f64>,
        posterior: Option<f64>,
    ) -> Result<Self> {
        for capacity in [prior, posterior].into_iter().flatten() {
            if !capacity.is_finite() || capacity < 0.0 {
                return Err(Error::InvalidFlow(capacity));
            }
        }
        Ok(Self {
            point,
            interface,
            prior,
            posterior,
        })
    }
}

/// Two or more computed interfaces meeting at a point.
#[derive(Clone, Debug)]
pub struct CrossingEvent {
    pub point: Point,
    pub interfaces: SmallVec<[InterfaceId; 4]>,
}

impl CrossingEvent {
    pub fn new(point: Point, interfaces: &[InterfaceId]) -> Self {
        Self {
            point,
            interfaces: SmallVec::from_slice(interfaces),
        }
    }
}

/// A computed interface running into a boundary interface.
#[derive(Clone, Debug)]
pub struct TruncationEvent {
    pub point: Point,
    /// The boundary interface being struck.
    pub interface: InterfaceId,
    /// The computed interfaces striking it.
    pub crossing: SmallVec<[InterfaceId; 4]>,
}

/// Anything that can sit on the event queue.
#[derive(Clone, Debug)]
pub enum Event {
    Capacity(CapacityEvent),
    Crossing(CrossingEvent),
    Truncation(TruncationEvent),
}

impl Event {
    /// The point in the time-position plane where the event occurs.
    pub fn point(&self) -> Point {
        match self {
            Event::Capacity(ev) => ev.point,
            Event::Crossing(ev) => ev.point,
            Event::Truncation(ev) => ev.point,
        }
    }

    /// Dispatch priority among events in the same time batch; lower first.
    ///
    /// Crossings resolve before capacity changes so the states around a
    /// boundary are settled when the boundary acts. A truncation whose
    /// boundary already has resolved states ranks with crossings.
    pub(crate) fn priority(&self, boundary_resolved: bool) -> u8 {
        match self {
            Event::Crossing(_) => 0,
            Event::Truncation(_) => {
                if boundary_resolved {
                    0
                } else {
                    1
                }
            }
            Event::Capacity(_) => 2,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn capacity_event_validates_flows() {
        let mut arena: SlotMap<InterfaceId, ()> = SlotMap::with_key();
        let id = arena.insert(());
        let point = Point::new(25.2, 35.0);
        assert!(CapacityEvent::new(point, id, None, Some(1.3)).is_ok());
        assert!(CapacityEvent::new(point, id, Some(0.0), None).is_ok());
        assert!(CapacityEvent::new(point, id, None, Some(-0.1)).is_err());
        assert!(CapacityEvent::new(point, id, Some(f64::NAN), None).is_err());
    }
}
