//! Time-dependent origin-destination demand.

use crate::csr::Csr;
use crate::error::{Error, Result};
use crate::time::SimulationTime;
use itertools::Itertools;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The vehicles that start their trip during a single simulation step.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StaticDemand {
    /// The step during which the vehicles are inserted.
    time_step: usize,
    /// Origin to destination, valued with the number of vehicles.
    matrix: Csr<f64>,
    /// The origins with demand, in ascending order.
    origins: Vec<usize>,
    /// The destinations with demand, in ascending order.
    destinations: Vec<usize>,
    /// The number of centroids of the network the demand is defined on.
    tot_centroids: usize,
}

impl StaticDemand {
    /// Creates a demand snapshot from `(origin, destination, vehicles)` triples.
    ///
    /// Origins and destinations are node IDs and must be centroids. Entries with
    /// zero vehicles are dropped.
    pub fn new(
        triples: impl IntoIterator<Item = (usize, usize, f64)>,
        time_step: usize,
        tot_nodes: usize,
        tot_centroids: usize,
    ) -> Result<Self> {
        let mut entries = vec![];
        for (origin, destination, vehicles) in triples {
            if !vehicles.is_finite() || vehicles < 0.0 {
                return Err(Error::DemandMismatch(format!(
                    "{} vehicles from {} to {}",
                    vehicles, origin, destination
                )));
            }
            if vehicles == 0.0 {
                continue;
            }
            for node in [origin, destination] {
                if node >= tot_centroids {
                    return Err(Error::NotACentroid(node));
                }
            }
            if origin == destination {
                return Err(Error::IntraZonalDemand(origin));
            }
            entries.push((origin, destination, vehicles));
        }

        let matrix = Csr::from_triples(entries, (tot_nodes, tot_nodes))?;
        let origins = matrix.nonzero_rows().to_vec();
        let destinations = origins
            .iter()
            .flat_map(|&o| matrix.get_columns(o).iter().copied())
            .sorted_unstable()
            .dedup()
            .collect();
        Ok(Self {
            time_step,
            matrix,
            origins,
            destinations,
            tot_centroids,
        })
    }

    pub fn time_step(&self) -> usize {
        self.time_step
    }

    /// The origins with demand, in ascending order.
    pub fn origins(&self) -> &[usize] {
        &self.origins
    }

    /// The destinations with demand, in ascending order.
    pub fn destinations(&self) -> &[usize] {
        &self.destinations
    }

    /// The `(destination, vehicles)` pairs leaving an origin.
    pub fn from_origin(&self, origin: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.matrix.iter_row(origin)
    }

    /// The total number of vehicles in the snapshot.
    pub fn total(&self) -> f64 {
        self.origins
            .iter()
            .flat_map(|&o| self.matrix.get_row(o))
            .sum()
    }

    /// The number of nodes of the network the demand is defined on.
    pub fn tot_nodes(&self) -> usize {
        self.matrix.shape().0
    }
}

/// A sequence of demand snapshots in order of insertion.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DynamicDemand {
    snapshots: Vec<StaticDemand>,
    /// Every origin across the snapshots, ascending.
    origins: Vec<usize>,
    /// Every destination across the snapshots, ascending. A destination's
    /// position in this list is its commodity index.
    destinations: Vec<usize>,
}

impl DynamicDemand {
    /// Aggregates snapshots, which must be inserted at strictly increasing steps.
    pub fn new(snapshots: Vec<StaticDemand>) -> Result<Self> {
        if let Some((a, b)) = snapshots
            .iter()
            .tuple_windows()
            .find(|(a, b)| a.time_step >= b.time_step)
        {
            return Err(Error::NonMonotonicInsertion {
                previous: a.time_step,
                step: b.time_step,
            });
        }
        if let Some((a, b)) = snapshots
            .iter()
            .tuple_windows()
            .find(|(a, b)| a.tot_nodes() != b.tot_nodes() || a.tot_centroids != b.tot_centroids)
        {
            return Err(Error::DemandMismatch(format!(
                "snapshots at steps {} and {} are defined on different networks",
                a.time_step, b.time_step
            )));
        }

        let origins = snapshots
            .iter()
            .map(|s| s.origins.iter().copied())
            .kmerge()
            .dedup()
            .collect();
        let destinations = snapshots
            .iter()
            .map(|s| s.destinations.iter().copied())
            .kmerge()
            .dedup()
            .collect();
        Ok(Self {
            snapshots,
            origins,
            destinations,
        })
    }

    /// Builds the demand from matrices of vehicles inserted at absolute times,
    /// which must lie inside the horizon and be at least one step apart.
    pub fn from_insertion_times(
        matrices: Vec<Vec<(usize, usize, f64)>>,
        insertion_times: &[f64],
        time: &SimulationTime,
        tot_nodes: usize,
        tot_centroids: usize,
    ) -> Result<Self> {
        if matrices.len() != insertion_times.len() {
            return Err(Error::DemandMismatch(format!(
                "{} matrices for {} insertion times",
                matrices.len(),
                insertion_times.len()
            )));
        }
        let min_spacing = time.step_size() * (1.0 - 1e-9);
        let mut snapshots = Vec::with_capacity(matrices.len());
        let mut previous: Option<(f64, usize)> = None;
        for (triples, &at) in matrices.into_iter().zip(insertion_times) {
            let step = time.step_of(at).ok_or_else(|| {
                Error::InvalidTime(format!(
                    "demand inserted at {} lies outside [{}, {}]",
                    at,
                    time.start(),
                    time.end()
                ))
            })?;
            if let Some((last, last_step)) = previous {
                if at - last < min_spacing {
                    return Err(Error::NonMonotonicInsertion {
                        previous: last_step,
                        step,
                    });
                }
            }
            previous = Some((at, step));
            snapshots.push(StaticDemand::new(triples, step, tot_nodes, tot_centroids)?);
        }
        Self::new(snapshots)
    }

    /// Returns true if vehicles are inserted during the step.
    pub fn is_loading(&self, time_step: usize) -> bool {
        self.get_demand(time_step).is_some()
    }

    /// Gets the snapshot inserted during the step, if any.
    pub fn get_demand(&self, time_step: usize) -> Option<&StaticDemand> {
        self.snapshots
            .binary_search_by_key(&time_step, |s| s.time_step)
            .ok()
            .map(|i| &self.snapshots[i])
    }

    pub fn snapshots(&self) -> &[StaticDemand] {
        &self.snapshots
    }

    pub fn all_origins(&self) -> &[usize] {
        &self.origins
    }

    pub fn all_destinations(&self) -> &[usize] {
        &self.destinations
    }

    pub fn tot_destinations(&self) -> usize {
        self.destinations.len()
    }

    /// Gets the commodity index of a destination node.
    pub fn destination_index(&self, node: usize) -> Option<usize> {
        self.destinations.binary_search(&node).ok()
    }

    /// The total number of vehicles over all snapshots.
    pub fn total_demand(&self) -> f64 {
        self.snapshots.iter().map(StaticDemand::total).sum()
    }

    /// Checks that the demand is defined on a network with the given dimensions
    /// and that every vehicle is inserted inside the horizon.
    pub(crate) fn check_compatible(
        &self,
        tot_nodes: usize,
        tot_centroids: usize,
        time: &SimulationTime,
    ) -> Result<()> {
        for snapshot in &self.snapshots {
            if snapshot.tot_nodes() != tot_nodes || snapshot.tot_centroids > tot_centroids {
                return Err(Error::DemandMismatch(format!(
                    "demand for {} nodes ({} centroids) on a network of {} nodes ({} centroids)",
                    snapshot.tot_nodes(),
                    snapshot.tot_centroids,
                    tot_nodes,
                    tot_centroids
                )));
            }
            if snapshot.time_step >= time.tot_time_steps() {
                return Err(Error::InvalidTime(format!(
                    "demand inserted at step {} of a {} step horizon",
                    snapshot.time_step,
                    time.tot_time_steps()
                )));
            }
        }
        Ok(())
    }
}
