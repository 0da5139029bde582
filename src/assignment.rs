//! The outer fixed-point loop between network loading and route choice.

use crate::config::AssignmentConfig;
#[cfg(feature = "debug")]
use crate::debug::{debug_iteration, take_debug_frame};
use crate::demand::DynamicDemand;
use crate::error::{Error, Result};
use crate::gap::{average_excess_cost, flow_gap, relative_gap};
use crate::loading::NetworkLoading;
use crate::network::Network;
use crate::route_choice::AonState;
use crate::table::LinkTable;
use crate::time::SimulationTime;
use crate::verify::{self, Violation};
use log::{debug, info};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The outcome of an assignment run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AssignmentResult {
    /// Vehicles leaving each link during each step.
    pub flows: LinkTable,
    /// Vehicles entering each link during each step.
    pub inflows: LinkTable,
    /// The travel time of each link during each step.
    pub travel_times: LinkTable,
    /// The flow gap of every iteration after the first.
    pub gaps: Vec<f64>,
    /// The average time a vehicle could have saved, per iteration.
    pub excess_costs: Vec<f64>,
    /// The number of iterations performed.
    pub iterations: usize,
    /// Whether the flow gap fell below the target.
    pub converged: bool,
}

/// A dynamic traffic assignment.
///
/// Every iteration loads the network with the current turning fractions, derives
/// link travel times from the loading and moves the turning fractions towards the
/// quickest routes under those travel times.
pub struct Assignment<'a> {
    network: &'a Network,
    demand: &'a DynamicDemand,
    config: AssignmentConfig,
    loading: NetworkLoading,
    route_choice: AonState,
    /// The results of the latest loading.
    flows: LinkTable,
    inflows: LinkTable,
    travel_times: LinkTable,
    gaps: Vec<f64>,
    excess_costs: Vec<f64>,
    /// The invariant violations of the latest loading, if checked.
    violations: Vec<Violation>,
    /// The number of completed iterations.
    iteration: usize,
    converged: bool,
    /// Debugging information from the latest iteration.
    #[cfg(feature = "debug")]
    debug: serde_json::Value,
}

impl<'a> Assignment<'a> {
    /// Prepares an assignment, routing every vehicle along its free flow shortest path.
    pub fn new(
        network: &'a Network,
        demand: &'a DynamicDemand,
        time: SimulationTime,
        config: AssignmentConfig,
    ) -> Result<Self> {
        config.validate()?;
        if (network.step_size() - time.step_size()).abs() > 1e-12 {
            return Err(Error::InvalidTime(format!(
                "network built for steps of {} used with steps of {}",
                network.step_size(),
                time.step_size()
            )));
        }
        demand.check_compatible(network.tot_nodes(), network.tot_centroids(), &time)?;

        let loading = NetworkLoading::new(network, demand, time, config.loading.clone());
        let route_choice = AonState::new(network, demand, time, config.route_choice.clone());
        let empty = LinkTable::new(time.tot_time_steps(), network.tot_links(), 0.0);
        Ok(Self {
            network,
            demand,
            config,
            loading,
            route_choice,
            flows: empty.clone(),
            inflows: empty.clone(),
            travel_times: empty,
            gaps: vec![],
            excess_costs: vec![],
            violations: vec![],
            iteration: 0,
            converged: false,
            #[cfg(feature = "debug")]
            debug: serde_json::Value::Null,
        })
    }

    /// Performs one iteration, returning the flow gap to the previous one.
    /// The first iteration has nothing to compare against and returns `None`.
    pub fn iterate(&mut self) -> Option<f64> {
        let network = self.network;
        let stats = self.loading.load(
            network,
            self.demand,
            self.route_choice.turning_fractions(),
            self.route_choice.connector_choice(),
        );
        self.violations = if self.config.loading.verify {
            verify::check_loading(
                network,
                self.loading.state(),
                self.route_choice.turning_fractions(),
                self.config.loading.precision,
            )
        } else {
            vec![]
        };

        let flows = self.loading.link_flows();
        let gap = match self.iteration {
            0 => None,
            _ => Some(flow_gap(self.flows.as_slice(), flows.as_slice())),
        };
        self.flows = flows;
        self.inflows = self.loading.link_inflows();
        self.travel_times = self
            .loading
            .travel_times(network, self.config.route_choice.travel_time_method);
        self.iteration += 1;

        self.route_choice.update(network, &self.travel_times);
        let experienced = self.experienced_time();
        let shortest = self.route_choice.shortest_total_time(self.demand);
        let relative = relative_gap(experienced, shortest);
        self.excess_costs.push(average_excess_cost(
            experienced,
            shortest,
            self.demand.total_demand(),
        ));

        match gap {
            Some(gap) => {
                self.gaps.push(gap);
                self.converged = gap < self.config.target_gap;
                info!(
                    "Iteration {}: flow gap {:.3e}, relative gap {:.3e}",
                    self.iteration, gap, relative
                );
            }
            None => info!("Iteration {}: relative gap {:.3e}", self.iteration, relative),
        }
        debug!(
            "Iteration {} took {} node updates, {} invariant violations",
            self.iteration, stats.node_updates, self.violations.len()
        );

        #[cfg(feature = "debug")]
        {
            debug_iteration(self.iteration, gap, relative, self.violations.len());
            self.debug = take_debug_frame();
        }
        gap
    }

    /// Iterates until the flow gap drops below the target or the iteration limit is
    /// reached. Reaching the limit is not an error; check [AssignmentResult::converged].
    pub fn run(&mut self) -> AssignmentResult {
        while !self.converged && self.iteration < self.config.max_iterations {
            self.iterate();
        }
        if !self.converged {
            info!(
                "Stopped after {} iterations without reaching a gap of {}",
                self.iteration, self.config.target_gap
            );
        }
        self.result()
    }

    /// The results as of the latest iteration.
    pub fn result(&self) -> AssignmentResult {
        AssignmentResult {
            flows: self.flows.clone(),
            inflows: self.inflows.clone(),
            travel_times: self.travel_times.clone(),
            gaps: self.gaps.clone(),
            excess_costs: self.excess_costs.clone(),
            iterations: self.iteration,
            converged: self.converged,
        }
    }

    /// The total time spent on the network by the vehicles of the latest loading.
    fn experienced_time(&self) -> f64 {
        self.inflows
            .as_slice()
            .iter()
            .zip(self.travel_times.as_slice())
            .map(|(q, tt)| q * tt)
            .sum()
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn gaps(&self) -> &[f64] {
        &self.gaps
    }

    pub fn loading(&self) -> &NetworkLoading {
        &self.loading
    }

    pub fn route_choice(&self) -> &AonState {
        &self.route_choice
    }

    /// The invariant violations found in the latest loading. Always empty unless
    /// [LoadingConfig::verify](crate::LoadingConfig::verify) is set.
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Gets the debugging information of the latest iteration as a JSON array.
    #[cfg(feature = "debug")]
    pub fn debug(&self) -> serde_json::Value {
        self.debug.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::demand::StaticDemand;
    use crate::network::test::detour_network;

    fn demand() -> DynamicDemand {
        let snapshots = (0..3)
            .map(|t| StaticDemand::new([(0, 1, 5.0)], t, 5, 2).unwrap())
            .collect();
        DynamicDemand::new(snapshots).unwrap()
    }

    #[test]
    fn rejects_mismatched_inputs() {
        let time = SimulationTime::new(0.0, 10.0, 1.0).unwrap();
        let network = detour_network(&time);
        let demand = demand();

        let config = AssignmentConfig {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(Assignment::new(&network, &demand, time, config).is_err());

        let other = SimulationTime::new(0.0, 10.0, 0.5).unwrap();
        assert!(matches!(
            Assignment::new(&network, &demand, other, Default::default()),
            Err(Error::InvalidTime(_))
        ));

        let short = SimulationTime::new(0.0, 2.0, 1.0).unwrap();
        assert!(Assignment::new(&network, &demand, short, Default::default()).is_err());
    }

    #[test]
    fn uncongested_network_converges_at_once() {
        let time = SimulationTime::new(0.0, 10.0, 1.0).unwrap();
        let network = detour_network(&time);
        let demand = demand();
        let mut assignment = Assignment::new(&network, &demand, time, Default::default()).unwrap();

        assert_eq!(assignment.iterate(), None);
        assert_eq!(assignment.iterate(), Some(0.0));
        assert!(assignment.converged());

        let result = assignment.run();
        assert_eq!(result.iterations, 2);
        assert_eq!(result.gaps, vec![0.0]);
        let arrived: f64 = result.flows.column(4).sum();
        assert_eq!(arrived, 15.0);
        // Every vehicle drives at free flow, which is also the shortest route
        for &excess in &result.excess_costs {
            assert!(excess.abs() < 1e-9);
        }
    }

    #[test]
    fn verified_loadings_match_unverified_ones() {
        let time = SimulationTime::new(0.0, 10.0, 1.0).unwrap();
        let network = detour_network(&time);
        let demand = demand();
        let mut config = AssignmentConfig::default();
        config.loading.verify = true;

        let mut verified = Assignment::new(&network, &demand, time, config).unwrap();
        verified.iterate();
        assert!(verified.violations().is_empty());
        let result = verified.run();

        let mut unverified = Assignment::new(&network, &demand, time, Default::default()).unwrap();
        assert_eq!(unverified.run(), result);
        assert!(unverified.violations().is_empty());
    }

    #[cfg(feature = "debug")]
    #[test]
    fn debug_frame_of_latest_iteration() {
        let time = SimulationTime::new(0.0, 10.0, 1.0).unwrap();
        let network = detour_network(&time);
        let demand = demand();
        let mut assignment = Assignment::new(&network, &demand, time, Default::default()).unwrap();
        assignment.iterate();
        assignment.iterate();

        let assignment = &assignment;
        let frame = assignment.debug();
        assert_eq!(frame, assignment.debug());
        assert_eq!(frame[0]["type"], "loading");
        assert_eq!(frame[1]["type"], "iteration");
        assert_eq!(frame[1]["iteration"], 2);
        assert_eq!(frame[1]["gap"], 0.0);
    }
}
