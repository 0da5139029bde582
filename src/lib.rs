pub use assignment::{Assignment, AssignmentResult};
pub use config::{AssignmentConfig, LoadingConfig, RouteChoiceConfig};
pub use csr::Csr;
pub use demand::{DynamicDemand, StaticDemand};
pub use error::{Error, Result};
pub use loading::node_model::{NodeModel, NodeModelInput, NodeModelKind, OrcaNodeModel};
pub use loading::travel_time::TravelTimeMethod;
pub use loading::{LoadingState, LoadingStats, NetworkLoading};
pub use network::{Delay, LinkAttributes, LinkType, Network, NetworkBuilder, Turn};
pub use route_choice::AonState;
pub use table::{CumulativeCounts, Fractions, LinkTable};
pub use time::SimulationTime;
pub use util::Interval;
pub use verify::Violation;

mod assignment;
mod config;
pub mod csr;
mod debug;
mod demand;
mod error;
pub mod gap;
pub mod loading;
mod network;
pub mod route_choice;
mod table;
mod time;
mod util;
pub mod verify;
