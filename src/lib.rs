pub use diagram::{FundamentalDiagram, State};
pub use engine::ShockwaveEngine;
pub use error::{Error, Result};
pub use event::{CapacityEvent, CrossingEvent, Event, TruncationEvent};
pub use geom::{almost_eq, Point, PointMap, ABS_TOL};
pub use interface::{Interface, Side};
pub use perturbation::{LineBottleneck, Perturbation, TimedBottleneck, TrafficLight};
use slotmap::new_key_type;
pub use slotmap::{Key, KeyData};

mod diagram;
mod engine;
mod error;
mod event;
mod geom;
mod interface;
mod perturbation;

new_key_type! {
    /// Unique ID of an [Interface].
    pub struct InterfaceId;
    /// Unique ID of a queued [Event].
    pub struct EventId;
}
