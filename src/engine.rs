//! The event-driven solver.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use itertools::{Itertools, MinMaxResult};
use log::{debug, warn};
use slotmap::SlotMap;
use smallvec::{smallvec, SmallVec};

use crate::diagram::{FundamentalDiagram, State};
use crate::error::{Error, Result};
use crate::event::{CapacityEvent, CrossingEvent, Event, TruncationEvent};
use crate::geom::{almost_eq, Point, PointMap, ABS_TOL};
use crate::interface::{Interface, Side};
use crate::perturbation::Perturbation;
use crate::{EventId, InterfaceId};

/// A queued event, ordered by time then insertion order.
#[derive(Clone, Copy, Debug)]
struct QueueEntry {
    time: f64,
    seq: u64,
    id: EventId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.total_cmp(&other.time).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

#[derive(Clone, Debug)]
struct EventRecord {
    event: Event,
    /// Set when a later event supersedes this one before it is dispatched.
    disabled: bool,
}

/// Solves a single corridor under the given flow model, producing the set of
/// interfaces that partition the time-position plane into traffic states.
pub struct ShockwaveEngine {
    diagram: FundamentalDiagram,
    horizon: Option<f64>,
    interfaces: SlotMap<InterfaceId, Interface>,
    events: SlotMap<EventId, EventRecord>,
    queue: BinaryHeap<Reverse<QueueEntry>>,
    /// Pending crossing events by location, for merging coincident crossings.
    crossing_index: PointMap<EventId>,
    /// Pending truncation events by location.
    truncation_index: PointMap<EventId>,
    /// Set if two boundary interfaces were found to intersect.
    boundary_clash: Option<Point>,
    /// The perturbation currently registering, during initialization.
    active_source: Option<usize>,
    seq: u64,
}

impl ShockwaveEngine {
    pub fn new(diagram: FundamentalDiagram) -> Self {
        Self {
            diagram,
            horizon: None,
            interfaces: SlotMap::with_key(),
            events: SlotMap::with_key(),
            queue: BinaryHeap::new(),
            crossing_index: PointMap::new(),
            truncation_index: PointMap::new(),
            boundary_clash: None,
            active_source: None,
            seq: 0,
        }
    }

    /// The flow model in use.
    pub fn diagram(&self) -> &FundamentalDiagram {
        &self.diagram
    }

    /// The end time of the current run, once [ShockwaveEngine::run] begins.
    pub fn simulation_horizon(&self) -> Option<f64> {
        self.horizon
    }

    /// All interfaces produced so far, boundary and computed.
    pub fn live_interfaces(&self) -> impl Iterator<Item = (InterfaceId, &Interface)> {
        self.interfaces.iter()
    }

    /// The distinct traffic states appearing anywhere on the plane, starting
    /// with the undisturbed initial state.
    pub fn unique_states(&self) -> Vec<State> {
        let mut states = vec![self.diagram.initial_state()];
        for iface in self.interfaces.values() {
            let (Some(above), Some(below)) = (iface.state(Side::Above), iface.state(Side::Below))
            else {
                continue;
            };
            for state in [above, below] {
                if !states.iter().any(|s| s.almost_eq(&state)) {
                    states.push(state);
                }
            }
        }
        states
    }

    /// Runs the simulation up to `horizon` seconds. May be called again to
    /// re-run from scratch.
    pub fn run(
        &mut self,
        horizon: f64,
        perturbations: &mut [Box<dyn Perturbation>],
    ) -> Result<()> {
        self.reset(horizon)?;
        for (index, perturbation) in perturbations.iter_mut().enumerate() {
            self.active_source = Some(index);
            perturbation.initialize(self)?;
        }
        self.active_source = None;
        if let Some(at) = self.boundary_clash {
            return Err(Error::Invariant {
                what: "two boundary interfaces intersect".into(),
                at,
            });
        }
        while let Some(batch) = self.next_batch() {
            for id in batch {
                self.dispatch(id)?;
            }
        }
        Ok(())
    }

    /// Registers a boundary interface for the current perturbation.
    pub fn register_boundary_interface(&mut self, mut interface: Interface) -> Result<InterfaceId> {
        if !interface.is_boundary() {
            return Err(Error::Contract(
                "only boundary interfaces may be registered directly",
            ));
        }
        if let Some(index) = self.active_source {
            interface.set_source(index);
        }
        Ok(self.add_interface(interface))
    }

    /// Schedules a capacity event against a registered boundary interface.
    pub fn register_capacity_event(&mut self, event: CapacityEvent) -> Result<EventId> {
        match self.interfaces.get(event.interface) {
            Some(iface) if iface.is_boundary() => {}
            _ => {
                return Err(Error::Contract(
                    "capacity event must reference a registered boundary interface",
                ))
            }
        }
        let time = event.point.time;
        let id = self.events.insert(EventRecord {
            event: Event::Capacity(event),
            disabled: false,
        });
        self.enqueue(id, time);
        Ok(id)
    }

    fn reset(&mut self, horizon: f64) -> Result<()> {
        if !horizon.is_finite() || horizon <= 0.0 {
            return Err(Error::Config(format!(
                "simulation horizon must be positive, got {horizon}"
            )));
        }
        self.horizon = Some(horizon);
        self.interfaces.clear();
        self.events.clear();
        self.queue.clear();
        self.crossing_index.clear();
        self.truncation_index.clear();
        self.boundary_clash = None;
        self.active_source = None;
        self.seq = 0;
        Ok(())
    }

    fn enqueue(&mut self, id: EventId, time: f64) {
        self.seq += 1;
        self.queue.push(Reverse(QueueEntry {
            time,
            seq: self.seq,
            id,
        }));
    }

    /// Inserts an interface and records events for every existing interface
    /// it crosses, except at points that are already an endpoint of either
    /// extent.
    fn add_interface(&mut self, interface: Interface) -> InterfaceId {
        let hits: Vec<(InterfaceId, Point, bool)> = self
            .interfaces
            .iter()
            .filter_map(|(other_id, other)| {
                let point = interface.intersection(other)?;
                if interface.has_endpoint(point) || other.has_endpoint(point) {
                    return None;
                }
                Some((other_id, point, other.is_boundary()))
            })
            .collect();
        let new_is_boundary = interface.is_boundary();
        let id = self.interfaces.insert(interface);
        for (other_id, point, other_is_boundary) in hits {
            match (new_is_boundary, other_is_boundary) {
                (true, true) => {
                    self.boundary_clash.get_or_insert(point);
                }
                (false, false) => self.record_crossing(point, &[id, other_id]),
                (true, false) => self.record_truncation(point, id, other_id),
                (false, true) => self.record_truncation(point, other_id, id),
            }
        }
        id
    }

    /// Merges into a pending crossing at the same location, or schedules a
    /// new one.
    fn record_crossing(&mut self, point: Point, participants: &[InterfaceId]) {
        if let Some(&event_id) = self.crossing_index.get(point) {
            if let Event::Crossing(ev) = &mut self.events[event_id].event {
                for &id in participants {
                    if !ev.interfaces.contains(&id) {
                        ev.interfaces.push(id);
                    }
                }
                return;
            }
        }
        let id = self.events.insert(EventRecord {
            event: Event::Crossing(CrossingEvent::new(point, participants)),
            disabled: false,
        });
        self.crossing_index.insert(point, id);
        self.enqueue(id, point.time);
    }

    /// Merges into a pending truncation at the same location, or schedules a
    /// new one. On a collision the first boundary struck keeps the event.
    fn record_truncation(&mut self, point: Point, boundary: InterfaceId, crossing: InterfaceId) {
        if let Some(&event_id) = self.truncation_index.get(point) {
            if let Event::Truncation(ev) = &mut self.events[event_id].event {
                if !ev.crossing.contains(&crossing) {
                    ev.crossing.push(crossing);
                }
                return;
            }
        }
        let id = self.events.insert(EventRecord {
            event: Event::Truncation(TruncationEvent {
                point,
                interface: boundary,
                crossing: smallvec![crossing],
            }),
            disabled: false,
        });
        self.truncation_index.insert(point, id);
        self.enqueue(id, point.time);
    }

    /// Pops every event in the next tolerance-wide time batch, ordered by
    /// event class, then ascending position, then insertion order.
    fn next_batch(&mut self) -> Option<Vec<EventId>> {
        let Reverse(first) = self.queue.pop()?;
        let mut entries = vec![first];
        loop {
            match self.queue.peek() {
                Some(Reverse(next)) if almost_eq(next.time, first.time) => {}
                _ => break,
            }
            if let Some(Reverse(next)) = self.queue.pop() {
                entries.push(next);
            }
        }
        entries.sort_by(|a, b| {
            let (pa, xa) = self.batch_key(a);
            let (pb, xb) = self.batch_key(b);
            pa.cmp(&pb).then(xa.total_cmp(&xb)).then(a.seq.cmp(&b.seq))
        });
        Some(entries.into_iter().map(|entry| entry.id).collect())
    }

    fn batch_key(&self, entry: &QueueEntry) -> (u8, f64) {
        let record = &self.events[entry.id];
        let resolved = match &record.event {
            Event::Truncation(ev) => self
                .interfaces
                .get(ev.interface)
                .map(|iface| iface.has_states())
                .unwrap_or(false),
            _ => false,
        };
        (record.event.priority(resolved), record.event.point().position)
    }

    fn dispatch(&mut self, id: EventId) -> Result<()> {
        let record = &self.events[id];
        if record.disabled {
            return Ok(());
        }
        let event = record.event.clone();
        match event {
            Event::Capacity(ev) => {
                self.handle_capacity(&ev)?;
            }
            Event::Crossing(ev) => {
                if self.crossing_index.remove(ev.point).is_none() {
                    debug!("skipping superseded crossing at {}", ev.point);
                    return Ok(());
                }
                self.handle_crossing(ev.point, &ev.interfaces, false)?;
            }
            Event::Truncation(ev) => self.handle_truncation(&ev)?,
        }
        Ok(())
    }

    /// The prevailing state on the given side of a point, read from the
    /// nearest resolved interface just after the point's time. Ties between
    /// coincident interfaces go to the one that diverges toward the point.
    fn resolve_state(&self, point: Point, side: Side) -> State {
        let probe_time = point.time + ABS_TOL;
        let mut best: Option<(f64, f64, State)> = None;
        for iface in self.interfaces.values() {
            let (Some(above), Some(below)) = (iface.state(Side::Above), iface.state(Side::Below))
            else {
                continue;
            };
            let Some(position) = iface.position_at(probe_time) else {
                continue;
            };
            let dist = match side {
                Side::Below => point.position - position,
                Side::Above => position - point.position,
            };
            if dist < 0.0 {
                continue;
            }
            let candidate = match side {
                Side::Below => above,
                Side::Above => below,
            };
            let better = match &best {
                None => true,
                Some((best_dist, best_slope, _)) => {
                    if almost_eq(dist, *best_dist) {
                        match side {
                            Side::Below => iface.slope() > *best_slope,
                            Side::Above => iface.slope() < *best_slope,
                        }
                    } else {
                        dist < *best_dist
                    }
                }
            };
            if better {
                best = Some((dist, iface.slope(), candidate));
            }
        }
        best.map(|(_, _, state)| state)
            .unwrap_or_else(|| self.diagram.initial_state())
    }

    /// Applies a capacity change on a boundary interface, spawning up to two
    /// interfaces carrying the new regime away from the boundary. Returns
    /// whether any interface was created.
    fn handle_capacity(&mut self, ev: &CapacityEvent) -> Result<bool> {
        let point = ev.point;
        let Some(boundary) = self.interfaces.get(ev.interface) else {
            return Ok(false);
        };
        if boundary.position_at(point.time).is_none() {
            debug!("capacity event at {point} is stale");
            return Ok(false);
        }
        let b_slope = boundary.slope();
        let forward = !point.almost_eq(boundary.bounds().1);
        let below = self.resolve_state(point, Side::Below);
        let above = self.resolve_state(point, Side::Above);
        if let Some(prior) = ev.prior {
            if !almost_eq(prior, below.flow) {
                debug!(
                    "capacity event at {point} expects prior flow {prior}, found {}",
                    below.flow
                );
                return Ok(false);
            }
        }
        let prior = ev.prior.unwrap_or(below.flow);
        let mut posterior = ev.posterior.unwrap_or_else(|| self.diagram.capacity());
        if !self.diagram.is_queued(&below) {
            // An opening restriction cannot raise the flow above what the
            // unqueued traffic already supplies.
            posterior = posterior.min(below.flow);
        }
        if posterior >= prior - ABS_TOL && (!self.diagram.is_queued(&below) || above.almost_eq(&below)) {
            // No restriction takes hold. At most a transition interface
            // between the states already meeting here.
            if above.almost_eq(&below) || almost_eq(above.density, below.density) {
                return Ok(false);
            }
            let slope = above.interface_slope(&below)?;
            self.add_interface(Interface::computed(point, slope, above, below));
            return Ok(true);
        }
        let main = self.diagram.state_at_flow(posterior, true)?;
        let byproduct = self.diagram.state_at_flow(posterior, false)?;
        let a = self.resolve_jump(point, ev.interface, b_slope, forward, main, below, Side::Below)?;
        let b = self.resolve_jump(point, ev.interface, b_slope, forward, byproduct, above, Side::Above)?;
        Ok(a || b)
    }

    /// Resolves the jump between a state imposed by the flow model and the
    /// prevailing local state on one side of a boundary, creating the
    /// carrying interface and settling the boundary's state on that side.
    fn resolve_jump(
        &mut self,
        point: Point,
        boundary: InterfaceId,
        b_slope: f64,
        forward: bool,
        fresh: State,
        local: State,
        side: Side,
    ) -> Result<bool> {
        if fresh.almost_eq(&local) {
            self.interfaces[boundary].set_state(side, local)?;
            return Ok(false);
        }
        let slope = fresh.interface_slope(&local)?;
        if almost_eq(slope, b_slope) {
            return Err(Error::Invariant {
                what: "new interface would duplicate its boundary".into(),
                at: point,
            });
        }
        // The fresh flow-model state faces the boundary.
        let (above, below) = if slope < b_slope {
            (fresh, local)
        } else {
            (local, fresh)
        };
        self.add_interface(Interface::computed(point, slope, above, below));
        let target = if slope < b_slope { Side::Below } else { Side::Above };
        let value = if forward { fresh } else { local };
        self.interfaces[boundary].set_state(target, value)?;
        Ok(true)
    }

    /// Terminates the interfaces meeting at a point and spawns the interface
    /// between the outermost surviving states, if they differ. Returns
    /// whether a new interface was created.
    fn handle_crossing(
        &mut self,
        point: Point,
        participants: &[InterfaceId],
        forced: bool,
    ) -> Result<bool> {
        if !forced && self.crossing_index.get(point).is_some() {
            return Err(Error::Invariant {
                what: "crossing dispatched while still indexed".into(),
                at: point,
            });
        }
        let mut live: SmallVec<[InterfaceId; 4]> = SmallVec::new();
        for &id in participants {
            if live.contains(&id) {
                continue;
            }
            let Some(iface) = self.interfaces.get(id) else {
                continue;
            };
            if iface.position_at(point.time).is_none() {
                continue;
            }
            if !forced && iface.is_boundary() {
                return Err(Error::Invariant {
                    what: "boundary interface in a crossing".into(),
                    at: point,
                });
            }
            live.push(id);
        }
        if live.len() <= 1 {
            return Ok(false);
        }
        let minmax = live
            .iter()
            .copied()
            .minmax_by(|a, b| self.interfaces[*a].slope().total_cmp(&self.interfaces[*b].slope()));
        let MinMaxResult::MinMax(min_id, max_id) = minmax else {
            return Ok(false);
        };
        let unresolved = |at| Error::Invariant {
            what: "unresolved interface in a crossing".into(),
            at,
        };
        let above = self.interfaces[min_id]
            .state(Side::Above)
            .ok_or_else(|| unresolved(point))?;
        let below = self.interfaces[max_id]
            .state(Side::Below)
            .ok_or_else(|| unresolved(point))?;
        // Validate every cutoff before applying any, so a rejection leaves
        // the plane untouched.
        for &id in &live {
            if let Err(err) = self.interfaces[id].admits_cutoff(None, Some(point)) {
                warn!("crossing at {point} abandoned: {err}");
                return Ok(false);
            }
        }
        for &id in &live {
            self.interfaces[id].cutoff(None, Some(point))?;
        }
        if above.almost_eq(&below) {
            return Ok(false);
        }
        let slope = above.interface_slope(&below)?;
        self.add_interface(Interface::computed(point, slope, above, below));
        Ok(true)
    }

    /// Handles a computed interface striking a boundary interface. An
    /// unresolved boundary is activated as if by a default capacity event; a
    /// resolved one is split at the point and the crossing re-resolved
    /// against its continuation.
    fn handle_truncation(&mut self, ev: &TruncationEvent) -> Result<()> {
        let point = ev.point;
        if self.truncation_index.remove(point).is_none() {
            return Err(Error::Invariant {
                what: "truncation has no index entry".into(),
                at: point,
            });
        }
        let defined = self
            .interfaces
            .get(ev.interface)
            .and_then(|iface| iface.position_at(point.time));
        if defined.is_none() {
            debug!("truncation at {point} is stale");
            return Ok(());
        }
        let mut live: SmallVec<[InterfaceId; 4]> = SmallVec::new();
        for &id in &ev.crossing {
            if live.contains(&id) || id == ev.interface {
                continue;
            }
            match self.interfaces.get(id) {
                Some(iface) if iface.position_at(point.time).is_some() => live.push(id),
                _ => {}
            }
        }
        for &id in &live {
            if let Err(err) = self.interfaces[id].cutoff(None, Some(point)) {
                warn!("truncation at {point} could not cut an arriving interface: {err}");
            }
        }
        if !self.interfaces[ev.interface].has_states() {
            // The boundary was never activated; treat the strike as a
            // default capacity event at this point.
            let activation = CapacityEvent {
                point,
                interface: ev.interface,
                prior: None,
                posterior: None,
            };
            self.handle_capacity(&activation)?;
            return Ok(());
        }
        // Split the boundary so its upstream half keeps its resolved states
        // while the continuation competes in a fresh crossing.
        let continuation = self.interfaces[ev.interface].continuation_from(point);
        self.interfaces[ev.interface].cutoff(None, Some(point))?;
        let clone_id = self.add_interface(continuation);
        let mut participants: SmallVec<[InterfaceId; 4]> = smallvec![clone_id];
        participants.extend(live.iter().copied());
        let created = self.handle_crossing(point, &participants, true)?;
        if created {
            for &id in live.iter().chain([&ev.interface]) {
                if let Err(err) = self.interfaces[id].cutoff(Some(point), None) {
                    warn!("truncation at {point} could not trim a leftover extent: {err}");
                }
            }
            // A crossing scheduled at the same location is now redundant.
            if let Some(twin) = self.crossing_index.remove(point) {
                self.events[twin].disabled = true;
            }
        }
        Ok(())
    }
}
