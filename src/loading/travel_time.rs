//! Conversion of cumulative counts into link flows and travel times.

use crate::network::Network;
use crate::table::{CumulativeCounts, LinkTable};
use crate::time::SimulationTime;
use crate::util::first_crossing;
use log::warn;
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Counts closer than this are treated as the same vehicle.
const VEHICLE_EPS: f64 = 1e-9; // veh

/// How a link travel time is attributed to a step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TravelTimeMethod {
    /// The travel time of the vehicle entering the link at the start of the step.
    #[default]
    Forward,
    /// The travel time of the vehicle leaving the link at the end of the step.
    Backward,
}

/// The number of vehicles crossing a point of each link during each step.
pub fn link_flows(counts: &CumulativeCounts, tot_links: usize) -> LinkTable {
    let tot_time_steps = counts.tot_points().saturating_sub(1);
    let mut flows = LinkTable::new(tot_time_steps, tot_links, 0.0);
    for t in 0..tot_time_steps {
        for link in 0..tot_links {
            let flow = counts.total(t + 1, link) - counts.total(t, link);
            flows.set(t, link, flow.max(0.0));
        }
    }
    flows
}

/// Derives the travel time of every link during every step from its cumulative
/// inflow and outflow curves. Travel times never drop below free flow.
pub fn travel_times(
    network: &Network,
    cvn_up: &CumulativeCounts,
    cvn_down: &CumulativeCounts,
    time: &SimulationTime,
    method: TravelTimeMethod,
) -> LinkTable {
    let tot_time_steps = time.tot_time_steps();
    let tot_links = network.tot_links();
    let columns = (0..tot_links)
        .into_par_iter()
        .map(|link| {
            let up = cvn_up.total_curve(link);
            let down = cvn_down.total_curve(link);
            let free_flow = network.link(link).free_flow_time();
            link_travel_times(link, &up, &down, free_flow, time.step_size(), method)
        })
        .collect::<Vec<_>>();

    let mut table = LinkTable::new(tot_time_steps, tot_links, 0.0);
    for (link, column) in columns.iter().enumerate() {
        for (t, &tt) in column.iter().enumerate().take(tot_time_steps) {
            table.set(t, link, tt);
        }
    }
    table
}

fn link_travel_times(
    link: usize,
    up: &[f64],
    down: &[f64],
    free_flow: f64,
    step_size: f64,
    method: TravelTimeMethod,
) -> Vec<f64> {
    let tot_time_steps = up.len().saturating_sub(1);
    let mut times = Vec::with_capacity(tot_time_steps);
    let mut stuck = false;
    for t in 0..tot_time_steps {
        let travel_time = match method {
            TravelTimeMethod::Forward => {
                let vehicle = up[t];
                first_crossing(down, vehicle - VEHICLE_EPS, t)
                    .map(|exit| (exit - t as f64) * step_size)
            }
            TravelTimeMethod::Backward => {
                let vehicle = down[t + 1];
                if up[t + 1] - vehicle <= VEHICLE_EPS && vehicle - down[t] <= VEHICLE_EPS {
                    Some(free_flow)
                } else {
                    first_crossing(up, vehicle - VEHICLE_EPS, 0)
                        .map(|entry| (t as f64 + 1.0 - entry) * step_size)
                }
            }
        };
        let travel_time = match travel_time {
            Some(tt) => tt.max(free_flow),
            None => {
                if !stuck {
                    warn!(
                        "Vehicles entering link {} at step {} do not leave it before the end of the horizon",
                        link, t
                    );
                    stuck = true;
                }
                times.last().copied().unwrap_or(free_flow)
            }
        };
        times.push(travel_time);
    }
    times
}
