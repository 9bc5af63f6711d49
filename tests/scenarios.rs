use assert_approx_eq::assert_approx_eq;
use shockwave_sim::{
    Error, FundamentalDiagram, LineBottleneck, Perturbation, Point, ShockwaveEngine, Side, State,
    TimedBottleneck, TrafficLight,
};

fn diagram() -> FundamentalDiagram {
    FundamentalDiagram::new(3.0, 5.0, 1.0, 0.9).unwrap()
}

fn contains_state(engine: &ShockwaveEngine, density: f64, flow: f64) -> bool {
    let state = State::new(density, flow);
    engine.unique_states().iter().any(|s| s.almost_eq(&state))
}

fn sorted_computed_slopes(engine: &ShockwaveEngine) -> Vec<f64> {
    let mut slopes: Vec<f64> = engine
        .live_interfaces()
        .filter(|(_, i)| !i.is_boundary())
        .map(|(_, i)| i.slope())
        .collect();
    slopes.sort_by(f64::total_cmp);
    slopes
}

fn count_boundaries(engine: &ShockwaveEngine) -> usize {
    engine.live_interfaces().filter(|(_, i)| i.is_boundary()).count()
}

/// Every computed interface must move at the shock speed implied by the
/// states either side of it, and every extent must be time-ordered.
fn assert_well_formed(engine: &ShockwaveEngine) {
    for (_, iface) in engine.live_interfaces() {
        let (lower, upper) = iface.bounds();
        assert!(lower.time <= upper.time);
        if iface.is_boundary() {
            continue;
        }
        let above = iface.state(Side::Above).unwrap();
        let below = iface.state(Side::Below).unwrap();
        let expected = above.interface_slope(&below).unwrap();
        assert_approx_eq!(iface.slope(), expected, 1e-9);
    }
}

#[test]
fn undisturbed_corridor_stays_uniform() {
    let mut engine = ShockwaveEngine::new(diagram());
    engine.run(100.0, &mut []).unwrap();
    assert_eq!(engine.live_interfaces().count(), 0);
    let states = engine.unique_states();
    assert_eq!(states.len(), 1);
    assert!(states[0].almost_eq(&engine.diagram().initial_state()));
}

#[test]
fn single_bottleneck_produces_queue_and_recovery() {
    let mut engine = ShockwaveEngine::new(diagram());
    let mut perturbations: Vec<Box<dyn Perturbation>> =
        vec![Box::new(TimedBottleneck::new(35.0, 25.2, 58.0, 1.3).unwrap())];
    engine.run(120.0, &mut perturbations).unwrap();

    assert_eq!(count_boundaries(&engine), 1);
    // Queue shock, release shock, and three freeflow waves.
    let slopes = sorted_computed_slopes(&engine);
    assert_eq!(slopes.len(), 5);
    assert_approx_eq!(slopes[0], -1.0);
    assert_approx_eq!(slopes[1], -0.5);
    assert_approx_eq!(slopes[2], 3.0);
    assert_approx_eq!(slopes[3], 3.0);
    assert_approx_eq!(slopes[4], 3.0);

    // Initial, queued, released, and capacity states.
    assert_eq!(engine.unique_states().len(), 4);
    assert!(contains_state(&engine, 3.7, 1.3));
    assert!(contains_state(&engine, 1.3 / 3.0, 1.3));
    assert!(contains_state(&engine, 1.25, 3.75));

    // The queue and release shocks annihilate where the queue clears.
    let clearing = Point::new(90.8, 2.2);
    let ended_there = engine
        .live_interfaces()
        .filter(|(_, i)| i.bounds().1.almost_eq(clearing))
        .count();
    assert_eq!(ended_there, 2);
    let (_, resultant) = engine
        .live_interfaces()
        .find(|(_, i)| i.bounds().0.almost_eq(clearing))
        .unwrap();
    assert_approx_eq!(resultant.slope(), 3.0);
    assert!(resultant
        .state(Side::Below)
        .unwrap()
        .almost_eq(&engine.diagram().initial_state()));

    assert_well_formed(&engine);
}

#[test]
fn moving_bottleneck_rides_with_the_restriction() {
    let mut engine = ShockwaveEngine::new(diagram());
    let slow_vehicle =
        LineBottleneck::new(Point::new(0.0, 0.0), Point::new(20.0, 20.0), 2.0).unwrap();
    let mut perturbations: Vec<Box<dyn Perturbation>> = vec![Box::new(slow_vehicle)];
    engine.run(100.0, &mut perturbations).unwrap();

    assert_eq!(count_boundaries(&engine), 1);
    let slopes = sorted_computed_slopes(&engine);
    assert_eq!(slopes.len(), 5);
    assert_approx_eq!(slopes[0], -1.0);
    assert_approx_eq!(slopes[1], -1.0 / 3.0);

    // The platoon behind the vehicle and the starved state ahead of it.
    assert!(contains_state(&engine, 3.0, 2.0));
    assert!(contains_state(&engine, 2.0 / 3.0, 2.0));
    assert_eq!(engine.unique_states().len(), 4);
    assert_well_formed(&engine);
}

#[test]
fn second_bottleneck_truncates_an_arriving_shock() {
    let mut engine = ShockwaveEngine::new(diagram());
    let mut perturbations: Vec<Box<dyn Perturbation>> = vec![
        Box::new(TimedBottleneck::new(35.0, 25.2, 58.0, 1.3).unwrap()),
        Box::new(TimedBottleneck::new(20.0, 40.0, 80.0, 2.0).unwrap()),
    ];
    engine.run(120.0, &mut perturbations).unwrap();

    // The downstream queue strikes the second bottleneck mid-extent, which
    // splits its boundary in two.
    assert_eq!(count_boundaries(&engine), 3);
    assert!(sorted_computed_slopes(&engine).len() >= 6);
    assert!(contains_state(&engine, 3.7, 1.3));
    assert!(contains_state(&engine, 3.0, 2.0));
    assert!(contains_state(&engine, 2.0 / 3.0, 2.0));
    assert_well_formed(&engine);
}

#[test]
fn traffic_light_alternates_jam_and_drained_states() {
    let mut engine = ShockwaveEngine::new(diagram());
    let light = TrafficLight::new(20.0, vec![10.0, 10.0], vec![true, false], 0).unwrap();
    let mut perturbations: Vec<Box<dyn Perturbation>> = vec![Box::new(light)];
    engine.run(100.0, &mut perturbations).unwrap();

    // One boundary per red phase starting at t = 0, 20, .., 100.
    assert_eq!(count_boundaries(&engine), 6);
    assert!(contains_state(&engine, 5.0, 0.0));
    assert!(contains_state(&engine, 0.0, 0.0));
    assert!(contains_state(&engine, 1.25, 3.75));
    assert_well_formed(&engine);
}

/// Every interface flattened to a comparable row: kind, slope, both extent
/// endpoints, and both states (-1 marks an unresolved side), in a canonical
/// order.
fn interface_snapshot(engine: &ShockwaveEngine) -> Vec<[f64; 10]> {
    let mut rows: Vec<[f64; 10]> = engine
        .live_interfaces()
        .map(|(_, iface)| {
            let (lower, upper) = iface.bounds();
            let fields = |state: Option<State>| state.map_or((-1.0, -1.0), |s| (s.density, s.flow));
            let (above_density, above_flow) = fields(iface.state(Side::Above));
            let (below_density, below_flow) = fields(iface.state(Side::Below));
            [
                if iface.is_boundary() { 1.0 } else { 0.0 },
                iface.slope(),
                lower.time,
                lower.position,
                upper.time,
                upper.position,
                above_density,
                above_flow,
                below_density,
                below_flow,
            ]
        })
        .collect();
    rows.sort_by(|a, b| {
        a.iter()
            .zip(b)
            .map(|(x, y)| x.total_cmp(y))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows
}

fn state_snapshot(engine: &ShockwaveEngine) -> Vec<(f64, f64)> {
    let mut states: Vec<(f64, f64)> = engine
        .unique_states()
        .iter()
        .map(|s| (s.density, s.flow))
        .collect();
    states.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    states
}

#[test]
fn reruns_are_deterministic() {
    let mut engine = ShockwaveEngine::new(diagram());
    let mut perturbations: Vec<Box<dyn Perturbation>> = vec![
        Box::new(TimedBottleneck::new(35.0, 25.2, 58.0, 1.3).unwrap()),
        Box::new(TimedBottleneck::new(20.0, 40.0, 80.0, 2.0).unwrap()),
    ];
    engine.run(120.0, &mut perturbations).unwrap();
    let first_interfaces = interface_snapshot(&engine);
    let first_states = state_snapshot(&engine);

    engine.run(120.0, &mut perturbations).unwrap();
    assert_eq!(interface_snapshot(&engine), first_interfaces);
    assert_eq!(state_snapshot(&engine), first_states);
}

#[test]
fn bottleneck_pacing_its_own_queue_shock_is_rejected() {
    let mut engine = ShockwaveEngine::new(diagram());
    // A capacity of 1.3 spawns a queue shock at slope -0.5; a restriction
    // travelling at exactly that speed would duplicate its own boundary.
    let pace_car =
        LineBottleneck::new(Point::new(25.2, 35.0), Point::new(58.0, 18.6), 1.3).unwrap();
    let mut perturbations: Vec<Box<dyn Perturbation>> = vec![Box::new(pace_car)];
    let result = engine.run(120.0, &mut perturbations);
    assert!(matches!(result, Err(Error::Invariant { .. })));
}

#[test]
fn intersecting_boundaries_abort_the_run() {
    let mut engine = ShockwaveEngine::new(diagram());
    let mut perturbations: Vec<Box<dyn Perturbation>> = vec![
        Box::new(
            LineBottleneck::new(Point::new(0.0, 0.0), Point::new(100.0, 100.0), 1.0).unwrap(),
        ),
        Box::new(
            LineBottleneck::new(Point::new(0.0, 100.0), Point::new(100.0, 0.0), 1.0).unwrap(),
        ),
    ];
    let result = engine.run(120.0, &mut perturbations);
    assert!(matches!(result, Err(Error::Invariant { .. })));
}

#[test]
fn out_of_window_bottleneck_is_ignored() {
    let mut engine = ShockwaveEngine::new(diagram());
    let mut perturbations: Vec<Box<dyn Perturbation>> =
        vec![Box::new(TimedBottleneck::new(35.0, 90.0, 130.0, 1.3).unwrap())];
    engine.run(120.0, &mut perturbations).unwrap();
    assert_eq!(engine.live_interfaces().count(), 0);
}
