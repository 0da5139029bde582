//! Tests that involve the loading of a single link between two centroids.

use assert_approx_eq::assert_approx_eq;
use traffic_assign::{
    DynamicDemand, Fractions, LinkAttributes, LinkType, LoadingConfig, Network, NetworkBuilder,
    NetworkLoading, SimulationTime, StaticDemand, TravelTimeMethod,
};

/// A link of unit length with a capacity of 10 vehicles per step and no spillback.
fn single_link(time: &SimulationTime) -> Network {
    let mut builder = NetworkBuilder::new(2, 2);
    builder.add_link(&LinkAttributes {
        from_node: 0,
        to_node: 1,
        length: 1.0,
        capacity: 10.0,
        jam_density: f64::INFINITY,
        free_speed: 1.0,
        link_type: LinkType::Ordinary,
    });
    builder.build(time).unwrap()
}

/// `vehicles` per step for the first 10 steps.
fn constant_demand(vehicles: f64) -> DynamicDemand {
    let snapshots = (0..10)
        .map(|t| StaticDemand::new([(0, 1, vehicles)], t, 2, 2).unwrap())
        .collect();
    DynamicDemand::new(snapshots).unwrap()
}

fn load(network: &Network, demand: &DynamicDemand, time: SimulationTime) -> NetworkLoading {
    let mut loading = NetworkLoading::new(network, demand, time, LoadingConfig::default());
    let steps = time.tot_time_steps();
    let turning_fractions = Fractions::new(1, steps, network.tot_turns(), 1.0);
    let connector_choice = Fractions::new(1, steps, network.tot_links(), 1.0);
    let stats = loading.load(network, demand, &turning_fractions, &connector_choice);
    assert_eq!(stats.capped_steps, 0);
    loading
}

/// Vehicles leave the link one step after entering it, at the rate they entered.
#[test]
fn free_flow() {
    let time = SimulationTime::new(0.0, 20.0, 1.0).unwrap();
    let network = single_link(&time);
    let demand = constant_demand(5.0);
    let loading = load(&network, &demand, time);

    let inflows = loading.link_inflows();
    let flows = loading.link_flows();
    for t in 0..20 {
        let expected_in = if t < 10 { 5.0 } else { 0.0 };
        let expected_out = if (1..=10).contains(&t) { 5.0 } else { 0.0 };
        assert_approx_eq!(inflows.get(t, 0), expected_in);
        assert_approx_eq!(flows.get(t, 0), expected_out);
        assert!(!loading.state().con_down(t, 0));
    }

    for method in [TravelTimeMethod::Forward, TravelTimeMethod::Backward] {
        let travel_times = loading.travel_times(&network, method);
        for t in 0..20 {
            assert_approx_eq!(travel_times.get(t, 0), 1.0);
        }
    }
}

/// Demand above capacity queues on the link, which then discharges at capacity.
#[test]
fn congestion() {
    let time = SimulationTime::new(0.0, 20.0, 1.0).unwrap();
    let network = single_link(&time);
    let demand = constant_demand(15.0);
    let loading = load(&network, &demand, time);

    let flows = loading.link_flows();
    for t in 0..20 {
        let expected = if (1..=15).contains(&t) { 10.0 } else { 0.0 };
        assert_approx_eq!(flows.get(t, 0), expected);
    }
    assert!(loading.state().con_down(1, 0));
    assert!(loading.state().con_down(14, 0));
    assert!(!loading.state().con_down(15, 0));
    assert_approx_eq!(loading.state().cvn_down().total(20, 0), 150.0);

    let travel_times = loading.travel_times(&network, TravelTimeMethod::Forward);
    assert_approx_eq!(travel_times.get(0, 0), 1.0);
    assert_approx_eq!(travel_times.get(1, 0), 1.5);
    assert_approx_eq!(travel_times.get(2, 0), 2.0);
    // The last vehicle entered at point 10 and leaves at point 16
    assert_approx_eq!(travel_times.get(10, 0), 6.0);
    assert_approx_eq!(travel_times.get(18, 0), 1.0);
}

/// Vehicles are held on the link when the horizon ends before they can leave.
#[test]
fn short_horizon() {
    let time = SimulationTime::new(0.0, 12.0, 1.0).unwrap();
    let network = single_link(&time);
    let demand = constant_demand(15.0);
    let loading = load(&network, &demand, time);

    let state = loading.state();
    assert_approx_eq!(state.cvn_up().total(12, 0), 150.0);
    assert_approx_eq!(state.cvn_down().total(12, 0), 110.0);

    let travel_times = loading.travel_times(&network, TravelTimeMethod::Forward);
    // Vehicle 105 entered at point 7 and left at point 11.5
    assert_approx_eq!(travel_times.get(7, 0), 4.5);
    for t in 8..12 {
        assert_approx_eq!(travel_times.get(t, 0), travel_times.get(7, 0));
    }
}
