//! Label-setting shortest path searches.

use crate::csr::Csr;
use crate::network::Network;
use crate::table::LinkTable;
use crate::util::sample_series;
use ordered_float::OrderedFloat;
use pathfinding::directed::dijkstra::{dijkstra, dijkstra_all};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Computes the cost of the cheapest path from `source` to every node over a node star,
/// whose values are the node at the other end of each link.
///
/// Pass the forward star for distances from the source and the backward star for
/// distances to it. Nodes for which `blocked` is true can be reached but are not
/// expanded, unless they are the source. Unreachable nodes get an infinite cost.
pub fn shortest_distances(
    star: &Csr<usize>,
    costs: &[f64],
    source: usize,
    blocked: impl Fn(usize) -> bool,
) -> Vec<f64> {
    let (tot_nodes, _) = star.shape();
    let reached = dijkstra_all(&source, |&node| {
        let expand = node == source || !blocked(node);
        star.iter_row(node)
            .filter(move |&(link, _)| expand && costs[link].is_finite())
            .map(|(link, next)| (next, OrderedFloat(costs[link])))
            .collect::<Vec<_>>()
    });

    let mut distances = vec![f64::INFINITY; tot_nodes];
    distances[source] = 0.0;
    for (node, (_, cost)) in reached {
        distances[node] = cost.into_inner();
    }
    distances
}

/// Finds the earliest arrival time at every node when leaving `source` at `departure`,
/// with link travel times that depend on the time a link is entered.
///
/// Times are measured from the start of the horizon. Travel times past the horizon
/// are those of the last step. Centroids other than the source are not passed through.
pub fn earliest_arrival(
    network: &Network,
    costs: &LinkTable,
    step_size: f64,
    source: usize,
    departure: f64,
) -> Vec<f64> {
    let tot_time_steps = costs.tot_time_steps();
    let mut arrival = vec![f64::INFINITY; network.tot_nodes()];
    let mut settled = vec![false; network.tot_nodes()];
    let mut heap = BinaryHeap::new();
    arrival[source] = departure;
    heap.push(Reverse((OrderedFloat(departure), source)));

    while let Some(Reverse((OrderedFloat(time), node))) = heap.pop() {
        if settled[node] {
            continue;
        }
        settled[node] = true;
        if node != source && network.is_centroid(node) {
            continue;
        }
        for &link in network.out_links(node) {
            let next = network.link(link).to_node;
            let cost = sample_series(|t| costs.get(t, link), tot_time_steps, time / step_size);
            let candidate = time + cost;
            if candidate < arrival[next] {
                arrival[next] = candidate;
                heap.push(Reverse((OrderedFloat(candidate), next)));
            }
        }
    }
    arrival
}

/// Finds the cheapest sequence of links from one node to another, and its cost.
pub fn shortest_path(
    network: &Network,
    costs: &[f64],
    from: usize,
    to: usize,
) -> Option<(Vec<usize>, f64)> {
    let cheapest_link = |a: usize, b: usize| {
        network
            .out_links(a)
            .iter()
            .copied()
            .filter(|&link| network.link(link).to_node == b && costs[link].is_finite())
            .min_by_key(|&link| OrderedFloat(costs[link]))
    };
    let (nodes, cost) = dijkstra(
        &from,
        |&node| {
            let expand = node == from || !network.is_centroid(node);
            network
                .out_links(node)
                .iter()
                .filter(move |&&link| expand && costs[link].is_finite())
                .map(|&link| (network.link(link).to_node, OrderedFloat(costs[link])))
                .collect::<Vec<_>>()
        },
        |&node| node == to,
    )?;
    let links = nodes
        .windows(2)
        .map(|w| cheapest_link(w[0], w[1]))
        .collect::<Option<Vec<_>>>()?;
    Some((links, cost.into_inner()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::network::test::detour_network;
    use crate::time::SimulationTime;
    use assert_approx_eq::assert_approx_eq;

    fn free_flow_costs(network: &Network) -> Vec<f64> {
        network.iter_links().map(|l| l.free_flow_time()).collect()
    }

    #[test]
    fn distances_to_destination() {
        let time = SimulationTime::new(0.0, 10.0, 1.0).unwrap();
        let network = detour_network(&time);
        let costs = free_flow_costs(&network);
        let distances =
            shortest_distances(network.backward_star(), &costs, 1, |n| network.is_centroid(n));
        assert_approx_eq!(distances[1], 0.0);
        assert_approx_eq!(distances[3], 1.0);
        assert_approx_eq!(distances[2], 3.0);
        assert_approx_eq!(distances[4], 3.0);
        assert_approx_eq!(distances[0], 4.0);
    }

    #[test]
    fn blocked_nodes_are_not_expanded() {
        let time = SimulationTime::new(0.0, 10.0, 1.0).unwrap();
        let network = detour_network(&time);
        let costs = free_flow_costs(&network);
        let distances = shortest_distances(network.forward_star(), &costs, 2, |n| n == 3);
        assert_approx_eq!(distances[3], 2.0);
        assert!(distances[1].is_infinite());
    }

    #[test]
    fn path_with_costs() {
        let time = SimulationTime::new(0.0, 10.0, 1.0).unwrap();
        let network = detour_network(&time);
        let mut costs = free_flow_costs(&network);
        assert_eq!(shortest_path(&network, &costs, 0, 1), Some((vec![0, 1, 4], 4.0)));

        costs[1] = 10.0;
        let (links, cost) = shortest_path(&network, &costs, 0, 1).unwrap();
        assert_eq!(links, vec![0, 2, 3, 4]);
        assert_approx_eq!(cost, 5.0);
        assert!(shortest_path(&network, &costs, 1, 0).is_none());
    }

    #[test]
    fn time_dependent_arrivals() {
        let time = SimulationTime::new(0.0, 10.0, 1.0).unwrap();
        let network = detour_network(&time);
        let mut costs = LinkTable::new(10, network.tot_links(), 0.0);
        for link in 0..network.tot_links() {
            for t in 0..10 {
                costs.set(t, link, network.link(link).free_flow_time());
            }
        }
        // The direct link is congested for vehicles entering it at step 1, so the detour wins
        costs.set(1, 1, 6.0);

        let arrival = earliest_arrival(&network, &costs, 1.0, 0, 0.0);
        assert_approx_eq!(arrival[2], 1.0);
        assert_approx_eq!(arrival[4], 2.0);
        assert_approx_eq!(arrival[3], 4.0);
        assert_approx_eq!(arrival[1], 5.0);

        let arrival = earliest_arrival(&network, &costs, 1.0, 0, 2.0);
        assert_approx_eq!(arrival[1], 6.0);
    }
}
