//! Parameters of an assignment run.

use crate::error::{Error, Result};
use crate::loading::node_model::NodeModelKind;
use crate::loading::travel_time::TravelTimeMethod;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The parameters of an [Assignment](crate::Assignment).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct AssignmentConfig {
    /// The flow gap below which the assignment has converged.
    pub target_gap: f64,
    /// The maximum number of outer iterations.
    pub max_iterations: usize,
    pub loading: LoadingConfig,
    pub route_choice: RouteChoiceConfig,
}

/// The parameters of the network loading.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct LoadingConfig {
    /// Changes in cumulative counts smaller than this, in vehicles, do not trigger updates.
    /// Also the tolerance of the invariant checks.
    pub precision: f64,
    /// The maximum number of passes over the nodes of a single step.
    pub max_inner_iterations: usize,
    /// The node model used at merges and diverges.
    pub node_model: NodeModelKind,
    /// Whether to check the loading invariants after every loading.
    pub verify: bool,
}

/// The parameters of the route choice.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct RouteChoiceConfig {
    /// Label changes smaller than this, in units of time, are not propagated.
    pub delta: f64,
    /// Where within a step route choices are evaluated, between 0 (start) and 1 (end).
    pub departure_time_offset: f64,
    /// Blend new turning fractions into the previous ones with MSA weights.
    pub smooth_turning_fractions: bool,
    /// How link travel times are derived from the cumulative counts.
    pub travel_time_method: TravelTimeMethod,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            target_gap: 1e-4,
            max_iterations: 1000,
            loading: Default::default(),
            route_choice: Default::default(),
        }
    }
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            precision: 1e-6,
            max_inner_iterations: 100,
            node_model: NodeModelKind::Orca,
            verify: false,
        }
    }
}

impl Default for RouteChoiceConfig {
    fn default() -> Self {
        Self {
            delta: 1e-6,
            departure_time_offset: 0.5,
            smooth_turning_fractions: true,
            travel_time_method: TravelTimeMethod::Forward,
        }
    }
}

impl AssignmentConfig {
    /// Checks that every parameter is in range.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("target gap", self.target_gap),
            ("loading precision", self.loading.precision),
            ("route choice delta", self.route_choice.delta),
        ];
        for (name, value) in positive {
            if value.is_nan() || value <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.max_iterations == 0 || self.loading.max_inner_iterations == 0 {
            return Err(Error::InvalidConfig(
                "iteration limits must be at least 1".into(),
            ));
        }
        let offset = self.route_choice.departure_time_offset;
        if !(0.0..=1.0).contains(&offset) {
            return Err(Error::InvalidConfig(format!(
                "departure time offset must lie in [0, 1], got {}",
                offset
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AssignmentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_iterations, 1000);
        assert_eq!(config.loading.node_model, NodeModelKind::Orca);
        assert_eq!(
            config.route_choice.travel_time_method,
            TravelTimeMethod::Forward
        );
    }

    #[test]
    fn rejects_out_of_range() {
        let mut config = AssignmentConfig::default();
        config.route_choice.departure_time_offset = 1.5;
        assert!(config.validate().is_err());

        let mut config = AssignmentConfig::default();
        config.loading.precision = 0.0;
        assert!(config.validate().is_err());

        let config = AssignmentConfig {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
