//! Measures of how far an assignment is from equilibrium.

/// The relative change between two flow vectors, `Σ|new - old| / Σ old`.
///
/// Zero when both vectors are zero, infinite when only the old one is.
pub fn flow_gap(old: &[f64], new: &[f64]) -> f64 {
    let change: f64 = old.iter().zip(new).map(|(a, b)| (b - a).abs()).sum();
    let total: f64 = old.iter().sum();
    if change == 0.0 {
        0.0
    } else if total == 0.0 {
        f64::INFINITY
    } else {
        change / total
    }
}

/// The share of the experienced travel time that vehicles could have saved by
/// taking their shortest route.
pub fn relative_gap(experienced: f64, shortest: f64) -> f64 {
    if experienced <= 0.0 {
        0.0
    } else {
        (experienced - shortest) / experienced
    }
}

/// The time each vehicle could have saved on average by taking its shortest route.
pub fn average_excess_cost(experienced: f64, shortest: f64, total_demand: f64) -> f64 {
    if total_demand <= 0.0 {
        0.0
    } else {
        (experienced - shortest) / total_demand
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn flow_gaps() {
        assert_approx_eq!(flow_gap(&[4.0, 6.0], &[5.0, 4.0]), 0.3);
        assert_eq!(flow_gap(&[3.0, 1.0], &[3.0, 1.0]), 0.0);
        assert_eq!(flow_gap(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert!(flow_gap(&[0.0], &[2.0]).is_infinite());
    }

    #[test]
    fn excess_costs() {
        assert_approx_eq!(relative_gap(120.0, 90.0), 0.25);
        assert_eq!(relative_gap(0.0, 0.0), 0.0);
        assert_approx_eq!(average_excess_cost(120.0, 90.0, 15.0), 2.0);
        assert_eq!(average_excess_cost(10.0, 5.0, 0.0), 0.0);
    }
}
