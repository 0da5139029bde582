//! Tests of a diverge with fixed turning fractions.

use assert_approx_eq::assert_approx_eq;
use traffic_assign::{
    verify, DynamicDemand, Fractions, LinkAttributes, LinkType, LoadingConfig, Network,
    NetworkBuilder, NetworkLoading, SimulationTime, StaticDemand,
};

fn link(from_node: usize, to_node: usize, capacity: f64, link_type: LinkType) -> LinkAttributes {
    LinkAttributes {
        from_node,
        to_node,
        length: 1.0,
        capacity,
        jam_density: f64::INFINITY,
        free_speed: 1.0,
        link_type,
    }
}

/// Centroid 0 feeds node 2, which splits over two parallel links to node 3.
/// Node 3 drains into centroid 1.
fn diverge(time: &SimulationTime, left_capacity: f64) -> Network {
    let mut builder = NetworkBuilder::new(4, 2);
    builder.add_link(&link(0, 2, 10.0, LinkType::OriginConnector));
    builder.add_link(&link(2, 3, left_capacity, LinkType::Ordinary));
    builder.add_link(&link(2, 3, 100.0, LinkType::Ordinary));
    builder.add_link(&link(3, 1, 200.0, LinkType::DestinationConnector));
    builder.build(time).unwrap()
}

/// Loads 10 vehicles per step for 5 steps, 30% of which turn left.
fn load(network: &Network, time: SimulationTime) -> (NetworkLoading, Fractions) {
    let snapshots = (0..5)
        .map(|t| StaticDemand::new([(0, 1, 10.0)], t, 4, 2).unwrap())
        .collect();
    let demand = DynamicDemand::new(snapshots).unwrap();
    let steps = time.tot_time_steps();

    let mut turning_fractions = Fractions::new(1, steps, network.tot_turns(), 1.0);
    for (turn, to_link) in network.out_turns(0) {
        let fraction = if to_link == 1 { 0.3 } else { 0.7 };
        for t in 0..steps {
            turning_fractions.set(0, t, turn, fraction);
        }
    }
    let connector_choice = Fractions::new(1, steps, network.tot_links(), 1.0);

    let mut loading = NetworkLoading::new(network, &demand, time, LoadingConfig::default());
    loading.load(network, &demand, &turning_fractions, &connector_choice);
    (loading, turning_fractions)
}

#[test]
fn splits_by_turning_fractions() {
    let time = SimulationTime::new(0.0, 20.0, 1.0).unwrap();
    let network = diverge(&time, 100.0);
    let (loading, turning_fractions) = load(&network, time);

    let inflows = loading.link_inflows();
    for t in 1..=5 {
        assert_approx_eq!(inflows.get(t, 1), 3.0);
        assert_approx_eq!(inflows.get(t, 2), 7.0);
        assert!(!loading.state().con_down(t, 0));
    }
    let arrived: f64 = loading.link_flows().column(3).sum();
    assert_approx_eq!(arrived, 50.0);
    assert!(verify::check_loading(&network, loading.state(), &turning_fractions, 1e-6).is_empty());
}

/// A bottleneck on one branch holds back the vehicles bound for the other.
#[test]
fn blocked_branch_is_fifo() {
    let time = SimulationTime::new(0.0, 40.0, 1.0).unwrap();
    let network = diverge(&time, 2.0);
    let (loading, turning_fractions) = load(&network, time);

    let inflows = loading.link_inflows();
    assert_approx_eq!(inflows.get(1, 1), 2.0);
    assert_approx_eq!(inflows.get(1, 2), 14.0 / 3.0);
    assert!(loading.state().con_down(1, 0));

    // 15 vehicles turn left, at 2 per step
    let left: f64 = inflows.column(1).sum();
    let right: f64 = inflows.column(2).sum();
    assert_approx_eq!(left, 15.0);
    assert_approx_eq!(right, 35.0);
    assert!(verify::check_loading(&network, loading.state(), &turning_fractions, 1e-6).is_empty());
}
