//! Time-dependent route choice.
//!
//! For every destination, an arrival map holds the time remaining to reach the
//! destination when departing a node at each time point. The maps are kept up to
//! date with a backward label-correcting sweep over the steps, and every vehicle
//! takes the turn that minimises its remaining time (all-or-nothing).

pub mod dijkstra;

use crate::config::RouteChoiceConfig;
use crate::demand::DynamicDemand;
use crate::network::Network;
use crate::table::{Fractions, LinkTable};
use crate::time::SimulationTime;
use crate::util::sample_series;
use log::debug;
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// The route choice state: arrival maps, link costs and the derived turning fractions.
#[derive(Clone, Debug)]
pub struct AonState {
    time: SimulationTime,
    config: RouteChoiceConfig,
    /// Destination nodes, in commodity order.
    destinations: Vec<usize>,
    /// Origin nodes.
    origins: Vec<usize>,
    /// Destination × step × node remaining travel time.
    arrival_maps: Fractions,
    /// The link costs the arrival maps are based on.
    costs: LinkTable,
    /// Destination × step × turn.
    turning_fractions: Fractions,
    /// Destination × step × link; only the out-links of origins are used.
    connector_choice: Fractions,
    /// The number of updates applied so far.
    updates: usize,
}

/// The read-only inputs of a single destination's update.
struct Sweep<'a> {
    network: &'a Network,
    origins: &'a [usize],
    costs: &'a LinkTable,
    previous_costs: &'a LinkTable,
    tot_time_steps: usize,
    step_size: f64,
    delta: f64,
    offset: f64,
    weight: f64,
}

impl AonState {
    /// Initialises the arrival maps with free flow travel times and routes every
    /// vehicle along its free flow shortest path.
    pub fn new(
        network: &Network,
        demand: &DynamicDemand,
        time: SimulationTime,
        config: RouteChoiceConfig,
    ) -> Self {
        let tot_time_steps = time.tot_time_steps();
        let free_flow = network
            .iter_links()
            .map(|l| l.free_flow_time())
            .collect::<Vec<_>>();
        let mut costs = LinkTable::new(tot_time_steps, network.tot_links(), 0.0);
        for t in 0..tot_time_steps {
            for (link, &tt) in free_flow.iter().enumerate() {
                costs.set(t, link, tt);
            }
        }

        let destinations = demand.all_destinations().to_vec();
        let tot_d = destinations.len();
        let mut arrival_maps = Fractions::new(tot_d, tot_time_steps, network.tot_nodes(), 0.0);
        let chunk_len = arrival_maps.chunk_len();
        destination_chunks(arrival_maps.as_mut_slice(), chunk_len, tot_d)
            .into_par_iter()
            .zip(destinations.par_iter())
            .for_each(|(maps, &destination)| {
                let labels = dijkstra::shortest_distances(
                    network.backward_star(),
                    &free_flow,
                    destination,
                    |n| network.is_centroid(n),
                );
                for step in maps.chunks_mut(labels.len().max(1)) {
                    step.copy_from_slice(&labels);
                }
            });

        let mut state = Self {
            time,
            config,
            destinations,
            origins: demand.all_origins().to_vec(),
            arrival_maps,
            costs: costs.clone(),
            turning_fractions: Fractions::new(tot_d, tot_time_steps, network.tot_turns(), 0.0),
            connector_choice: Fractions::new(tot_d, tot_time_steps, network.tot_links(), 0.0),
            updates: 0,
        };
        state.sweep(network, costs, 1.0);
        state
    }

    /// Updates the arrival maps with new link costs and blends the resulting
    /// all-or-nothing turning fractions into the current ones.
    pub fn update(&mut self, network: &Network, costs: &LinkTable) {
        self.updates += 1;
        let weight = if self.config.smooth_turning_fractions {
            1.0 / (self.updates as f64 + 1.0)
        } else {
            1.0
        };
        self.sweep(network, costs.clone(), weight);
    }

    fn sweep(&mut self, network: &Network, costs: LinkTable, weight: f64) {
        let previous_costs = std::mem::replace(&mut self.costs, costs);
        let tot_d = self.destinations.len();
        let sweep = Sweep {
            network,
            origins: &self.origins,
            costs: &self.costs,
            previous_costs: &previous_costs,
            tot_time_steps: self.time.tot_time_steps(),
            step_size: self.time.step_size(),
            delta: self.config.delta,
            offset: self.config.departure_time_offset,
            weight,
        };

        let chunk_lens = (
            self.arrival_maps.chunk_len(),
            self.turning_fractions.chunk_len(),
            self.connector_choice.chunk_len(),
        );
        let maps = destination_chunks(self.arrival_maps.as_mut_slice(), chunk_lens.0, tot_d);
        let fractions =
            destination_chunks(self.turning_fractions.as_mut_slice(), chunk_lens.1, tot_d);
        let choices = destination_chunks(self.connector_choice.as_mut_slice(), chunk_lens.2, tot_d);
        let relabelled: usize = maps
            .into_par_iter()
            .zip(fractions)
            .zip(choices)
            .zip(self.destinations.par_iter())
            .map(|(((maps, fractions), choices), &destination)| {
                let relabelled = sweep.update_arrival_map(destination, maps);
                sweep.update_turning_fractions(destination, maps, fractions);
                sweep.update_connector_choice(destination, maps, choices);
                relabelled
            })
            .sum();
        debug!(
            "Route choice update {} relabelled {} (step, node) pairs",
            self.updates, relabelled
        );
    }

    /// Gets the remaining travel time to a destination when departing a node at a time point.
    pub fn arrival_map(&self, destination: usize, time_step: usize, node: usize) -> f64 {
        self.arrival_maps.get(destination, time_step, node)
    }

    /// Destination × step × turn.
    pub fn turning_fractions(&self) -> &Fractions {
        &self.turning_fractions
    }

    /// Destination × step × link.
    pub fn connector_choice(&self) -> &Fractions {
        &self.connector_choice
    }

    /// The link costs used by the latest update.
    pub fn costs(&self) -> &LinkTable {
        &self.costs
    }

    pub fn destinations(&self) -> &[usize] {
        &self.destinations
    }

    /// The demand-weighted remaining time of all vehicles at their departure,
    /// according to the current arrival maps.
    pub fn shortest_total_time(&self, demand: &DynamicDemand) -> f64 {
        let tot_time_steps = self.time.tot_time_steps();
        demand
            .snapshots()
            .iter()
            .flat_map(|snapshot| {
                snapshot.origins().iter().flat_map(move |&origin| {
                    snapshot.from_origin(origin).map(move |(destination, vehicles)| {
                        (snapshot.time_step(), origin, destination, vehicles)
                    })
                })
            })
            .filter_map(|(t, origin, destination, vehicles)| {
                let d = demand.destination_index(destination)?;
                let label = sample_series(
                    |s| self.arrival_maps.get(d, s, origin),
                    tot_time_steps,
                    t as f64 + self.config.departure_time_offset,
                );
                Some(vehicles * label)
            })
            .sum()
    }
}

impl Sweep<'_> {
    /// The remaining time when entering a link at fractional step `at`, or infinity if
    /// the link leads into a centroid that is not the destination.
    fn via_link(&self, destination: usize, maps: &[f64], link: usize, at: f64) -> f64 {
        let tot_nodes = self.network.tot_nodes();
        let next = self.network.link(link).to_node;
        if next != destination && self.network.is_centroid(next) {
            return f64::INFINITY;
        }
        let cost = sample_series(|t| self.costs.get(t, link), self.tot_time_steps, at);
        let remaining = sample_series(
            |t| maps[t * tot_nodes + next],
            self.tot_time_steps,
            at + cost / self.step_size,
        );
        cost + remaining
    }

    /// Brings the arrival map of a destination in line with the new link costs,
    /// sweeping backwards in time. Returns the number of labels that changed.
    fn update_arrival_map(&self, destination: usize, maps: &mut [f64]) -> usize {
        let network = self.network;
        let tot_nodes = network.tot_nodes();
        let mut relabelled = 0;
        let mut carried = vec![false; tot_nodes];
        let mut queued = vec![false; tot_nodes];
        let mut heap = BinaryHeap::new();

        for t in (0..self.tot_time_steps).rev() {
            for node in (0..tot_nodes).filter(|&n| carried[n]) {
                enqueue(&mut heap, &mut queued, node, maps[t * tot_nodes + node]);
            }
            for (link, attributes) in network.iter_links().enumerate() {
                let change = self.costs.get(t, link) - self.previous_costs.get(t, link);
                if change.abs() > self.delta {
                    let node = attributes.from_node;
                    enqueue(&mut heap, &mut queued, node, maps[t * tot_nodes + node]);
                }
            }

            while let Some(Reverse((_, node))) = heap.pop() {
                queued[node] = false;
                if node == destination {
                    continue;
                }
                let label = network
                    .out_links(node)
                    .iter()
                    .map(|&link| self.via_link(destination, maps, link, t as f64))
                    .fold(f64::INFINITY, f64::min);
                let old = maps[t * tot_nodes + node];
                let changed = if label.is_finite() && old.is_finite() {
                    (label - old).abs() > self.delta
                } else {
                    label.is_finite() != old.is_finite()
                };
                if !changed {
                    continue;
                }
                maps[t * tot_nodes + node] = label;
                relabelled += 1;
                if network.is_centroid(node) {
                    continue;
                }
                for &link in network.in_links(node) {
                    let previous = network.link(link).from_node;
                    carried[previous] = true;
                    enqueue(&mut heap, &mut queued, previous, maps[t * tot_nodes + previous]);
                }
            }
        }
        relabelled
    }

    /// Routes every vehicle on an in-link of an intersection onto its quickest turn.
    fn update_turning_fractions(&self, destination: usize, maps: &[f64], fractions: &mut [f64]) {
        let network = self.network;
        let tot_turns = network.tot_turns();
        for t in 0..self.tot_time_steps {
            let at = t as f64 + self.offset;
            let step = &mut fractions[t * tot_turns..(t + 1) * tot_turns];
            for &node in network.turn_nodes() {
                for &in_link in network.in_links(node) {
                    let chosen = quickest(network.out_turns(in_link), |to_link| {
                        self.via_link(destination, maps, to_link, at)
                    });
                    for (turn, _) in network.out_turns(in_link) {
                        let aon = if chosen == Some(turn) { 1.0 } else { 0.0 };
                        step[turn] = (1.0 - self.weight) * step[turn] + self.weight * aon;
                    }
                }
            }
        }
    }

    /// Sends the demand of every origin onto its quickest out-link.
    fn update_connector_choice(&self, destination: usize, maps: &[f64], choices: &mut [f64]) {
        let network = self.network;
        let tot_links = network.tot_links();
        for t in 0..self.tot_time_steps {
            let at = t as f64 + self.offset;
            let step = &mut choices[t * tot_links..(t + 1) * tot_links];
            for &origin in self.origins.iter().filter(|&&o| o != destination) {
                let out_links = network.out_links(origin);
                let chosen = quickest(out_links.iter().map(|&l| (l, l)), |link| {
                    self.via_link(destination, maps, link, at)
                })
                .or_else(|| out_links.first().copied());
                for &link in out_links {
                    let aon = if chosen == Some(link) { 1.0 } else { 0.0 };
                    step[link] = (1.0 - self.weight) * step[link] + self.weight * aon;
                }
            }
        }
    }
}

fn enqueue(
    heap: &mut BinaryHeap<Reverse<(OrderedFloat<f64>, usize)>>,
    queued: &mut [bool],
    node: usize,
    label: f64,
) {
    if !queued[node] {
        queued[node] = true;
        heap.push(Reverse((OrderedFloat(label), node)));
    }
}

/// Picks the key of the option with the smallest finite remaining time. Ties go to the
/// first option.
fn quickest(
    options: impl Iterator<Item = (usize, usize)>,
    remaining: impl Fn(usize) -> f64,
) -> Option<usize> {
    options
        .map(|(key, link)| (key, remaining(link)))
        .filter(|(_, time)| time.is_finite())
        .min_by_key(|&(_, time)| OrderedFloat(time))
        .map(|(key, _)| key)
}

/// Splits a destination-major array into one chunk per destination.
fn destination_chunks(
    data: &mut [f64],
    chunk_len: usize,
    tot_destinations: usize,
) -> Vec<&mut [f64]> {
    if chunk_len == 0 {
        (0..tot_destinations).map(|_| Default::default()).collect()
    } else {
        data.chunks_mut(chunk_len).collect()
    }
}
