//! Invariant checks on the results of a network loading.
//!
//! None of these abort a run. Every violation found is logged and returned so the
//! caller can decide what to make of it.

use crate::loading::LoadingState;
use crate::network::Network;
use crate::table::{CumulativeCounts, Fractions};
use log::warn;
use thiserror::Error;

/// A broken loading invariant.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Violation {
    #[error("{curve} count of link {link} for destination {destination} drops by {drop} at point {point}")]
    Decreasing {
        curve: &'static str,
        link: usize,
        point: usize,
        destination: usize,
        drop: f64,
    },
    #[error("node {node} loses {imbalance} vehicles of destination {destination} by point {point}")]
    Continuity {
        node: usize,
        point: usize,
        destination: usize,
        imbalance: f64,
    },
    #[error("link {link} holds {excess} vehicles more than it can store at point {point}")]
    Storage {
        link: usize,
        point: usize,
        excess: f64,
    },
    #[error("turning fractions out of link {link} for destination {destination} sum to {sum} during step {time_step}")]
    TurningFractions {
        link: usize,
        time_step: usize,
        destination: usize,
        sum: f64,
    },
}

fn report(violations: Vec<Violation>) -> Vec<Violation> {
    for violation in &violations {
        warn!("{}", violation);
    }
    violations
}

/// Checks that no cumulative count ever decreases.
pub fn monotonicity(
    cvn_up: &CumulativeCounts,
    cvn_down: &CumulativeCounts,
    tolerance: f64,
) -> Vec<Violation> {
    let mut violations = vec![];
    for (curve, counts) in [("inflow", cvn_up), ("outflow", cvn_down)] {
        for point in 1..counts.tot_points() {
            for link in 0..counts.tot_links() {
                let before = counts.get(point - 1, link);
                let after = counts.get(point, link);
                for (destination, (a, b)) in before.iter().zip(after).enumerate() {
                    if a - b > tolerance {
                        violations.push(Violation::Decreasing {
                            curve,
                            link,
                            point,
                            destination,
                            drop: a - b,
                        });
                    }
                }
            }
        }
    }
    report(violations)
}

/// Checks that every vehicle leaving the in-links of an intersection enters one of
/// its out-links, per destination.
pub fn continuity(
    network: &Network,
    cvn_up: &CumulativeCounts,
    cvn_down: &CumulativeCounts,
    tolerance: f64,
) -> Vec<Violation> {
    let mut violations = vec![];
    let tot_d = cvn_up.tot_destinations();
    for node in network.tot_centroids()..network.tot_nodes() {
        for point in 0..cvn_up.tot_points() {
            for destination in 0..tot_d {
                let arrived: f64 = network
                    .in_links(node)
                    .iter()
                    .map(|&link| cvn_down.get(point, link)[destination])
                    .sum();
                let departed: f64 = network
                    .out_links(node)
                    .iter()
                    .map(|&link| cvn_up.get(point, link)[destination])
                    .sum();
                if (arrived - departed).abs() > tolerance {
                    violations.push(Violation::Continuity {
                        node,
                        point,
                        destination,
                        imbalance: arrived - departed,
                    });
                }
            }
        }
    }
    report(violations)
}

/// Checks that no link holds more vehicles than it can store. Links leaving a
/// centroid queue vertically and are skipped.
pub fn storage(
    network: &Network,
    cvn_up: &CumulativeCounts,
    cvn_down: &CumulativeCounts,
    tolerance: f64,
) -> Vec<Violation> {
    let mut violations = vec![];
    for (link, attributes) in network.iter_links().enumerate() {
        if network.is_centroid(attributes.from_node) {
            continue;
        }
        let storage = network.storage(link);
        for point in 0..cvn_up.tot_points() {
            let on_link = cvn_up.total(point, link) - cvn_down.total(point, link);
            if on_link > storage + tolerance {
                violations.push(Violation::Storage {
                    link,
                    point,
                    excess: on_link - storage,
                });
            }
        }
    }
    report(violations)
}

/// Checks that the turning fractions out of every link sum to one whenever vehicles
/// of the destination leave it.
pub fn turning_fraction_sums(
    network: &Network,
    cvn_down: &CumulativeCounts,
    turning_fractions: &Fractions,
    tolerance: f64,
) -> Vec<Violation> {
    let mut violations = vec![];
    let tot_time_steps = cvn_down.tot_points().saturating_sub(1);
    for link in 0..network.tot_links() {
        if network.out_turns(link).next().is_none() {
            continue;
        }
        for time_step in 0..tot_time_steps {
            let before = cvn_down.get(time_step, link);
            let after = cvn_down.get(time_step + 1, link);
            for destination in 0..cvn_down.tot_destinations() {
                if after[destination] - before[destination] <= tolerance {
                    continue;
                }
                let sum: f64 = network
                    .out_turns(link)
                    .map(|(turn, _)| turning_fractions.get(destination, time_step, turn))
                    .sum();
                if (sum - 1.0).abs() > tolerance {
                    violations.push(Violation::TurningFractions {
                        link,
                        time_step,
                        destination,
                        sum,
                    });
                }
            }
        }
    }
    report(violations)
}

/// Runs every check on a loading.
pub fn check_loading(
    network: &Network,
    state: &LoadingState,
    turning_fractions: &Fractions,
    tolerance: f64,
) -> Vec<Violation> {
    let (up, down) = (state.cvn_up(), state.cvn_down());
    let mut violations = monotonicity(up, down, tolerance);
    violations.extend(continuity(network, up, down, tolerance));
    violations.extend(storage(network, up, down, tolerance));
    violations.extend(turning_fraction_sums(network, down, turning_fractions, tolerance));
    violations
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{LoadingConfig, RouteChoiceConfig};
    use crate::demand::{DynamicDemand, StaticDemand};
    use crate::loading::NetworkLoading;
    use crate::network::test::detour_network;
    use crate::route_choice::AonState;
    use crate::time::SimulationTime;

    fn empty_counts(network: &Network) -> CumulativeCounts {
        CumulativeCounts::new(11, network.tot_links(), 1)
    }

    #[test]
    fn clean_loading() {
        let time = SimulationTime::new(0.0, 10.0, 1.0).unwrap();
        let network = detour_network(&time);
        let demand = DynamicDemand::new(vec![StaticDemand::new([(0, 1, 5.0)], 0, 5, 2).unwrap()])
            .unwrap();
        let routes = AonState::new(&network, &demand, time, RouteChoiceConfig::default());
        let mut loading = NetworkLoading::new(&network, &demand, time, LoadingConfig::default());
        loading.load(
            &network,
            &demand,
            routes.turning_fractions(),
            routes.connector_choice(),
        );
        let violations = check_loading(&network, loading.state(), routes.turning_fractions(), 1e-6);
        assert_eq!(violations, vec![]);
        assert_eq!(loading.state().cvn_down().total(10, 4), 5.0);
    }

    #[test]
    fn decreasing_counts() {
        let time = SimulationTime::new(0.0, 10.0, 1.0).unwrap();
        let network = detour_network(&time);
        let mut up = empty_counts(&network);
        let down = empty_counts(&network);
        up.get_mut(2, 1)[0] = 5.0;
        for point in 3..11 {
            up.get_mut(point, 1)[0] = 4.0;
        }
        let violations = monotonicity(&up, &down, 1e-6);
        assert_eq!(
            violations,
            vec![Violation::Decreasing {
                curve: "inflow",
                link: 1,
                point: 3,
                destination: 0,
                drop: 1.0
            }]
        );
    }

    #[test]
    fn lost_vehicles() {
        let time = SimulationTime::new(0.0, 10.0, 1.0).unwrap();
        let network = detour_network(&time);
        let mut up = empty_counts(&network);
        let mut down = empty_counts(&network);
        down.get_mut(1, 0)[0] = 5.0;
        up.get_mut(1, 1)[0] = 4.0;
        let violations = continuity(&network, &up, &down, 1e-6);
        assert_eq!(
            violations,
            vec![Violation::Continuity {
                node: 2,
                point: 1,
                destination: 0,
                imbalance: 1.0
            }]
        );
    }

    #[test]
    fn overfull_link() {
        let time = SimulationTime::new(0.0, 10.0, 1.0).unwrap();
        let network = detour_network(&time);
        let mut up = empty_counts(&network);
        let down = empty_counts(&network);
        up.get_mut(4, 1)[0] = network.storage(1) + 50.0;
        // Origin connectors may queue without bound
        up.get_mut(4, 0)[0] = 1e6;
        let violations = storage(&network, &up, &down, 1e-6);
        assert_eq!(violations.len(), 1);
        assert!(matches!(
            violations[0],
            Violation::Storage {
                link: 1,
                point: 4,
                ..
            }
        ));
    }

    #[test]
    fn unrouted_flow() {
        let time = SimulationTime::new(0.0, 10.0, 1.0).unwrap();
        let network = detour_network(&time);
        let mut down = empty_counts(&network);
        for point in 3..11 {
            down.get_mut(point, 0)[0] = 5.0;
        }
        let mut fractions = Fractions::new(1, 10, network.tot_turns(), 0.0);
        let violations = turning_fraction_sums(&network, &down, &fractions, 1e-6);
        assert_eq!(
            violations,
            vec![Violation::TurningFractions {
                link: 0,
                time_step: 2,
                destination: 0,
                sum: 0.0
            }]
        );

        let (turn, _) = network.out_turns(0).next().unwrap();
        fractions.set(0, 2, turn, 1.0);
        assert!(turning_fraction_sums(&network, &down, &fractions, 1e-6).is_empty());
    }
}
