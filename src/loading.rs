//! Dynamic network loading with the iterative link transmission model (I-LTM).
//!
//! Every link is described by two cumulative vehicle curves per destination: the
//! number of vehicles that entered it (`cvn_up`) and left it (`cvn_down`) by each
//! time point. Steps are solved in order. Within a step, every flagged node reads
//! the sending flow of its in-links and the receiving flow of its out-links, splits
//! the flow among its turns with a [NodeModel] and writes the counts at the end of
//! the step. Writes that change a count flag the nodes that read it, so that a
//! reloading with slightly different turning fractions only revisits what changed.

pub mod node_model;
pub mod travel_time;

use crate::config::LoadingConfig;
#[cfg(feature = "debug")]
use crate::debug::debug_loading;
use crate::demand::DynamicDemand;
use crate::network::Network;
use crate::table::{CumulativeCounts, Fractions, LinkTable};
use crate::time::SimulationTime;
use log::{debug, warn};
use node_model::{NodeModel, NodeModelInput};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use travel_time::TravelTimeMethod;

/// Local turning fractions whose sum is below this hold their commodity back.
const ROUTED_EPS: f64 = 1e-9;

/// Statistics gathered during a single loading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LoadingStats {
    /// The number of (step, node) updates performed.
    pub node_updates: usize,
    /// The number of steps cut short by the inner iteration limit.
    pub capped_steps: usize,
}

/// The results of the network loading, kept between loadings so that they can be
/// updated incrementally.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LoadingState {
    tot_time_steps: usize,
    tot_links: usize,
    tot_nodes: usize,
    tot_destinations: usize,
    /// Vehicles that entered each link, per time point and destination.
    cvn_up: CumulativeCounts,
    /// Vehicles that left each link, per time point and destination.
    cvn_down: CumulativeCounts,
    /// Whether the inflow of a link was constrained during a step, per step and link.
    con_up: Vec<bool>,
    /// Whether the outflow of a link was constrained during a step, per step and link.
    con_down: Vec<bool>,
    /// The (step, node) pairs which must be recomputed.
    nodes_2_update: Vec<bool>,
    /// The turning fractions used by the previous loading.
    last_turning_fractions: Option<Fractions>,
}

impl LoadingState {
    /// Creates an empty state in which every node needs updating.
    pub fn new(
        tot_time_steps: usize,
        tot_links: usize,
        tot_nodes: usize,
        tot_destinations: usize,
    ) -> Self {
        let tot_points = tot_time_steps + 1;
        Self {
            tot_time_steps,
            tot_links,
            tot_nodes,
            tot_destinations,
            cvn_up: CumulativeCounts::new(tot_points, tot_links, tot_destinations),
            cvn_down: CumulativeCounts::new(tot_points, tot_links, tot_destinations),
            con_up: vec![false; tot_time_steps * tot_links],
            con_down: vec![false; tot_time_steps * tot_links],
            nodes_2_update: vec![true; tot_time_steps * tot_nodes],
            last_turning_fractions: None,
        }
    }

    pub fn cvn_up(&self) -> &CumulativeCounts {
        &self.cvn_up
    }

    pub fn cvn_down(&self) -> &CumulativeCounts {
        &self.cvn_down
    }

    /// Whether the inflow of the link was held back by its receiving flow during the step.
    pub fn con_up(&self, time_step: usize, link: usize) -> bool {
        self.con_up[time_step * self.tot_links + link]
    }

    /// Whether the outflow of the link was held back during the step.
    pub fn con_down(&self, time_step: usize, link: usize) -> bool {
        self.con_down[time_step * self.tot_links + link]
    }

    /// Whether the node is flagged for an update at the step.
    pub fn needs_update(&self, time_step: usize, node: usize) -> bool {
        self.nodes_2_update[time_step * self.tot_nodes + node]
    }

    fn mark(&mut self, time_step: usize, node: usize) {
        if time_step < self.tot_time_steps {
            self.nodes_2_update[time_step * self.tot_nodes + node] = true;
        }
    }

    fn take_flag(&mut self, time_step: usize, node: usize) -> bool {
        std::mem::take(&mut self.nodes_2_update[time_step * self.tot_nodes + node])
    }

    fn flags(&mut self, time_step: usize) -> &mut [bool] {
        let start = time_step * self.tot_nodes;
        &mut self.nodes_2_update[start..start + self.tot_nodes]
    }

    /// The sending flow of a link per destination, ignoring its capacity.
    fn raw_sending(&self, network: &Network, time_step: usize, link: usize, out: &mut [f64]) {
        let delay = network.free_flow(link);
        let down = self.cvn_down.get(time_step, link);
        for (d, sending) in out.iter_mut().enumerate() {
            let up = delay.read(|p| self.cvn_up.get(p, link)[d], time_step);
            *sending = (up - down[d]).max(0.0);
        }
    }

    /// The receiving flow of a link.
    fn receiving(
        &self,
        network: &Network,
        time_step: usize,
        link: usize,
        step_capacity: f64,
    ) -> f64 {
        match network.queue(link) {
            None => step_capacity,
            Some(delay) => {
                let down = delay.read(|p| self.cvn_down.total(p, link), time_step);
                let space = down + network.storage(link) - self.cvn_up.total(time_step, link);
                space.clamp(0.0, step_capacity)
            }
        }
    }

    /// Stores the inflow count of a link at the end of a step, flagging its readers if it changed.
    fn write_up(&mut self, inputs: &Inputs, time_step: usize, link: usize, values: &[f64]) {
        let point = time_step + 1;
        if self.store(point, link, values, true) > inputs.precision {
            let attributes = inputs.network.link(link);
            self.mark(point, attributes.from_node);
            for step in inputs.network.free_flow(link).readers(point) {
                self.mark(step, attributes.to_node);
            }
        }
    }

    /// Stores the outflow count of a link at the end of a step, flagging its readers if it changed.
    fn write_down(&mut self, inputs: &Inputs, time_step: usize, link: usize, values: &[f64]) {
        let point = time_step + 1;
        if self.store(point, link, values, false) > inputs.precision {
            let attributes = inputs.network.link(link);
            self.mark(point, attributes.to_node);
            if let Some(delay) = inputs.network.queue(link) {
                for step in delay.readers(point) {
                    self.mark(step, attributes.from_node);
                }
            }
        }
    }

    /// Overwrites the counts at a point, returning the total absolute change.
    fn store(&mut self, point: usize, link: usize, values: &[f64], up: bool) -> f64 {
        let slot = if up {
            self.cvn_up.get_mut(point, link)
        } else {
            self.cvn_down.get_mut(point, link)
        };
        let change = slot.iter().zip(values).map(|(a, b)| (a - b).abs()).sum();
        slot.copy_from_slice(values);
        change
    }

    /// Inserts the demand of an origin and discharges the vehicles arriving at a destination.
    fn update_centroid(
        &mut self,
        inputs: &Inputs,
        buffers: &mut NodeBuffers,
        t: usize,
        node: usize,
    ) {
        let network = inputs.network;
        let tot_d = self.tot_destinations;
        buffers.counts.resize(tot_d, 0.0);
        buffers.sending.resize(tot_d, 0.0);

        let snapshot = inputs.demand.get_demand(t);
        for &link in network.out_links(node) {
            buffers.counts.copy_from_slice(self.cvn_up.get(t, link));
            if let Some(snapshot) = snapshot {
                for (destination, vehicles) in snapshot.from_origin(node) {
                    if let Some(d) = inputs.demand.destination_index(destination) {
                        buffers.counts[d] += vehicles * inputs.connector_choice.get(d, t, link);
                    }
                }
            }
            let inflow = buffers.counts.iter().sum::<f64>() - self.cvn_up.total(t, link);
            self.con_up[t * self.tot_links + link] = inflow >= inputs.step_capacity(link);
            self.write_up(inputs, t, link, &buffers.counts);
        }

        let sink = inputs.demand.destination_index(node);
        for &link in network.in_links(node) {
            buffers.counts.copy_from_slice(self.cvn_down.get(t, link));
            let mut constrained = false;
            if let Some(d) = sink {
                self.raw_sending(network, t, link, &mut buffers.sending);
                let unconstrained: f64 = buffers.sending.iter().sum();
                let capacity = inputs.step_capacity(link);
                let scale = if unconstrained > capacity {
                    capacity / unconstrained
                } else {
                    1.0
                };
                let discharged = buffers.sending[d] * scale;
                buffers.counts[d] += discharged;
                constrained = unconstrained > discharged + inputs.precision;
            }
            self.con_down[t * self.tot_links + link] = constrained;
            self.write_down(inputs, t, link, &buffers.counts);
        }
    }

    /// Moves vehicles from the in-links to the out-links of an intersection.
    fn update_node(
        &mut self,
        inputs: &Inputs,
        node_model: &dyn NodeModel,
        buffers: &mut NodeBuffers,
        t: usize,
        node: usize,
    ) {
        let network = inputs.network;
        let in_links = network.in_links(node);
        let out_links = network.out_links(node);
        let (tot_in, tot_out, tot_d) = (in_links.len(), out_links.len(), self.tot_destinations);
        buffers.prepare(tot_in, tot_out, tot_d);
        let local = |i: usize, j: usize, d: usize| (i * tot_out + j) * tot_d + d;

        for (turn, (i, j)) in network.node_turns(node) {
            for d in 0..tot_d {
                buffers.local[local(i, j, d)] = if tot_out == 1 {
                    1.0
                } else {
                    inputs.turning_fractions.get(d, t, turn)
                };
            }
        }

        // Sending flows
        for (i, &link) in in_links.iter().enumerate() {
            let sending = &mut buffers.sending[i * tot_d..(i + 1) * tot_d];
            self.raw_sending(network, t, link, sending);
            for (d, s) in sending.iter_mut().enumerate() {
                let routed: f64 = (0..tot_out).map(|j| buffers.local[local(i, j, d)]).sum();
                if routed <= ROUTED_EPS {
                    *s = 0.0;
                } else {
                    for j in 0..tot_out {
                        buffers.local[local(i, j, d)] /= routed;
                    }
                }
            }
            let unconstrained: f64 = sending.iter().sum();
            let capacity = inputs.step_capacity(link);
            if unconstrained > capacity {
                sending.iter_mut().for_each(|s| *s *= capacity / unconstrained);
            }
            let total = unconstrained.min(capacity);
            buffers.unconstrained[i] = unconstrained;
            buffers.capacity[i] = capacity;
            buffers.total[i] = total;
            if total > 0.0 {
                for j in 0..tot_out {
                    let flow: f64 = (0..tot_d)
                        .map(|d| sending[d] * buffers.local[local(i, j, d)])
                        .sum();
                    buffers.fractions[i * tot_out + j] = flow / total;
                }
            }
        }

        // Receiving flows
        for (j, &link) in out_links.iter().enumerate() {
            buffers.receiving[j] = self.receiving(network, t, link, inputs.step_capacity(link));
        }

        node_model.solve(
            &NodeModelInput {
                sending: &buffers.total,
                capacity: &buffers.capacity,
                fractions: &buffers.fractions,
                receiving: &buffers.receiving,
            },
            &mut buffers.flows,
        );

        for (j, &link) in out_links.iter().enumerate() {
            buffers.new_up[j * tot_d..(j + 1) * tot_d].copy_from_slice(self.cvn_up.get(t, link));
        }
        for (i, &link) in in_links.iter().enumerate() {
            let realised: f64 = buffers.flows[i * tot_out..(i + 1) * tot_out].iter().sum();
            let ratio = if buffers.total[i] > 0.0 {
                (realised / buffers.total[i]).min(1.0)
            } else {
                0.0
            };
            self.con_down[t * self.tot_links + link] =
                buffers.unconstrained[i] > realised + inputs.precision;

            buffers.counts.clear();
            buffers.counts.extend_from_slice(self.cvn_down.get(t, link));
            for d in 0..tot_d {
                let moved = buffers.sending[i * tot_d + d] * ratio;
                buffers.counts[d] += moved;
                for j in 0..tot_out {
                    buffers.new_up[j * tot_d + d] += moved * buffers.local[local(i, j, d)];
                }
            }
            self.write_down(inputs, t, link, &buffers.counts);
        }
        for (j, &link) in out_links.iter().enumerate() {
            let values = &buffers.new_up[j * tot_d..(j + 1) * tot_d];
            let inflow = values.iter().sum::<f64>() - self.cvn_up.total(t, link);
            let receiving = buffers.receiving[j];
            self.con_up[t * self.tot_links + link] = receiving
                < inputs.step_capacity(link) - inputs.precision
                && inflow >= receiving - inputs.precision;
            self.write_up(inputs, t, link, values);
        }
    }
}

/// The read-only inputs of a loading.
struct Inputs<'a> {
    network: &'a Network,
    demand: &'a DynamicDemand,
    turning_fractions: &'a Fractions,
    connector_choice: &'a Fractions,
    step_size: f64,
    precision: f64,
}

impl Inputs<'_> {
    /// The number of vehicles a link can let through in one step.
    fn step_capacity(&self, link: usize) -> f64 {
        self.network.link(link).capacity * self.step_size
    }
}

/// Scratch space for a single node update, reused between nodes.
#[derive(Clone, Debug, Default)]
struct NodeBuffers {
    /// Sending flow per in-link and destination.
    sending: Vec<f64>,
    /// Sending flow per in-link before the capacity is applied.
    unconstrained: Vec<f64>,
    /// Sending flow per in-link.
    total: Vec<f64>,
    capacity: Vec<f64>,
    /// Turning fractions per in-link, out-link and destination.
    local: Vec<f64>,
    /// Turning fractions per in-link and out-link, weighted by sending flow.
    fractions: Vec<f64>,
    receiving: Vec<f64>,
    /// Realised turning flows per in-link and out-link.
    flows: Vec<f64>,
    /// New counts per out-link and destination.
    new_up: Vec<f64>,
    counts: Vec<f64>,
}

impl NodeBuffers {
    fn prepare(&mut self, tot_in: usize, tot_out: usize, tot_d: usize) {
        let reset = |buffer: &mut Vec<f64>, len: usize| {
            buffer.clear();
            buffer.resize(len, 0.0);
        };
        reset(&mut self.sending, tot_in * tot_d);
        reset(&mut self.unconstrained, tot_in);
        reset(&mut self.total, tot_in);
        reset(&mut self.capacity, tot_in);
        reset(&mut self.local, tot_in * tot_out * tot_d);
        reset(&mut self.fractions, tot_in * tot_out);
        reset(&mut self.receiving, tot_out);
        reset(&mut self.flows, tot_in * tot_out);
        reset(&mut self.new_up, tot_out * tot_d);
        self.counts.clear();
    }
}

/// The network loading engine. Owns its [LoadingState] across loadings.
pub struct NetworkLoading {
    time: SimulationTime,
    config: LoadingConfig,
    node_model: Box<dyn NodeModel>,
    state: LoadingState,
    buffers: NodeBuffers,
}

impl NetworkLoading {
    /// Creates a loading engine for the given network and demand.
    pub fn new(
        network: &Network,
        demand: &DynamicDemand,
        time: SimulationTime,
        config: LoadingConfig,
    ) -> Self {
        let state = LoadingState::new(
            time.tot_time_steps(),
            network.tot_links(),
            network.tot_nodes(),
            demand.tot_destinations(),
        );
        Self {
            time,
            node_model: config.node_model.build(),
            config,
            state,
            buffers: Default::default(),
        }
    }

    /// Loads the demand onto the network.
    ///
    /// # Parameters
    /// * `turning_fractions` - Destination × step × turn.
    /// * `connector_choice` - Destination × step × link; the share of an origin's
    ///   demand entering each of its out-links.
    pub fn load(
        &mut self,
        network: &Network,
        demand: &DynamicDemand,
        turning_fractions: &Fractions,
        connector_choice: &Fractions,
    ) -> LoadingStats {
        let inputs = Inputs {
            network,
            demand,
            turning_fractions,
            connector_choice,
            step_size: self.time.step_size(),
            precision: self.config.precision,
        };
        self.flag_changes(network, turning_fractions);

        let mut stats = LoadingStats::default();
        for t in 0..self.time.tot_time_steps() {
            let mut passes = 0;
            while self.state.flags(t).contains(&true) {
                if passes == self.config.max_inner_iterations {
                    warn!(
                        "Step {} did not settle within {} passes, keeping the current counts",
                        t, passes
                    );
                    self.state.flags(t).fill(false);
                    stats.capped_steps += 1;
                    break;
                }
                passes += 1;
                for node in 0..network.tot_nodes() {
                    if !self.state.take_flag(t, node) {
                        continue;
                    }
                    stats.node_updates += 1;
                    if network.is_centroid(node) {
                        self.state.update_centroid(&inputs, &mut self.buffers, t, node);
                    } else {
                        self.state.update_node(
                            &inputs,
                            self.node_model.as_ref(),
                            &mut self.buffers,
                            t,
                            node,
                        );
                    }
                }
            }
        }
        self.state.last_turning_fractions = Some(turning_fractions.clone());

        debug!(
            "Loading finished after {} node updates ({} capped steps)",
            stats.node_updates, stats.capped_steps
        );
        #[cfg(feature = "debug")]
        debug_loading(&stats);
        stats
    }

    /// Flags the (step, node) pairs whose inputs changed since the previous loading.
    fn flag_changes(&mut self, network: &Network, turning_fractions: &Fractions) {
        let last = match self.state.last_turning_fractions.take() {
            Some(last) if last.tot_items() == turning_fractions.tot_items() => last,
            _ => {
                self.state.nodes_2_update.fill(true);
                return;
            }
        };
        let tot_destinations = self.state.tot_destinations;
        for t in 0..self.state.tot_time_steps {
            for node in 0..network.tot_centroids() {
                self.state.mark(t, node);
            }
            for d in 0..tot_destinations {
                let changed = last
                    .step(d, t)
                    .iter()
                    .zip(turning_fractions.step(d, t))
                    .enumerate()
                    .filter(|(_, (a, b))| a != b)
                    .map(|(turn, _)| network.turn(turn).via_node);
                for node in changed {
                    self.state.mark(t, node);
                }
            }
        }
    }

    pub fn state(&self) -> &LoadingState {
        &self.state
    }

    /// Vehicles leaving each link during each step.
    pub fn link_flows(&self) -> LinkTable {
        travel_time::link_flows(&self.state.cvn_down, self.state.tot_links)
    }

    /// Vehicles entering each link during each step.
    pub fn link_inflows(&self) -> LinkTable {
        travel_time::link_flows(&self.state.cvn_up, self.state.tot_links)
    }

    /// The travel time of each link during each step.
    pub fn travel_times(&self, network: &Network, method: TravelTimeMethod) -> LinkTable {
        travel_time::travel_times(
            network,
            &self.state.cvn_up,
            &self.state.cvn_down,
            &self.time,
            method,
        )
    }
}
