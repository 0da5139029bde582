use crate::error::{Error, Result};
use crate::util::Interval;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tolerance applied when rounding the number of steps up, in steps.
const STEP_ROUNDING: f64 = 1e-9;

/// The time horizon of an assignment, discretised into equal steps.
///
/// Step `t` covers the time points `t` and `t + 1`, so a horizon of `T` steps
/// has `T + 1` time points.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationTime {
    /// The start and end of the horizon.
    span: Interval<f64>,
    /// The length of a single step.
    step_size: f64,
    /// The number of steps in the horizon.
    tot_time_steps: usize,
}

impl SimulationTime {
    /// Creates a new time horizon. All values share the same unit, such as hours.
    pub fn new(start: f64, end: f64, step_size: f64) -> Result<Self> {
        if !(start.is_finite() && end.is_finite()) || end <= start {
            return Err(Error::InvalidTime(format!(
                "end {} must come after start {}",
                end, start
            )));
        }
        if !step_size.is_finite() || step_size <= 0.0 {
            return Err(Error::InvalidTime(format!(
                "step size {} must be positive",
                step_size
            )));
        }
        let span = Interval::new(start, end);
        let tot_time_steps = (span.length() / step_size - STEP_ROUNDING).ceil().max(1.0) as usize;
        Ok(Self {
            span,
            step_size,
            tot_time_steps,
        })
    }

    /// The start of the horizon.
    pub fn start(&self) -> f64 {
        self.span.min
    }

    /// The end of the horizon.
    pub fn end(&self) -> f64 {
        self.span.max
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// The number of simulated steps.
    pub fn tot_time_steps(&self) -> usize {
        self.tot_time_steps
    }

    /// Gets the step during which the given absolute time falls, if it is inside the horizon.
    pub fn step_of(&self, time: f64) -> Option<usize> {
        if !self.span.contains(time) {
            return None;
        }
        let step = ((time - self.span.min) / self.step_size + STEP_ROUNDING).floor() as usize;
        Some(step.min(self.tot_time_steps - 1))
    }

    /// The absolute time of a time point.
    pub fn time_of(&self, point: usize) -> f64 {
        self.span.min + point as f64 * self.step_size
    }
}

#[cfg(test)]
mod test {
    use super::SimulationTime;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn step_count() {
        assert_eq!(SimulationTime::new(0.0, 10.0, 1.0).unwrap().tot_time_steps(), 10);
        assert_eq!(SimulationTime::new(0.0, 1.0, 0.1).unwrap().tot_time_steps(), 10);
        assert_eq!(SimulationTime::new(0.0, 1.05, 0.1).unwrap().tot_time_steps(), 11);
        assert_eq!(SimulationTime::new(7.0, 9.0, 0.25).unwrap().tot_time_steps(), 8);
    }

    #[test]
    fn invalid() {
        assert!(SimulationTime::new(1.0, 1.0, 0.1).is_err());
        assert!(SimulationTime::new(0.0, 1.0, 0.0).is_err());
        assert!(SimulationTime::new(0.0, f64::INFINITY, 0.1).is_err());
    }

    #[test]
    fn steps_and_points() {
        let time = SimulationTime::new(6.0, 8.0, 0.5).unwrap();
        assert_eq!(time.step_of(6.0), Some(0));
        assert_eq!(time.step_of(6.5), Some(1));
        assert_eq!(time.step_of(7.99), Some(3));
        assert_eq!(time.step_of(8.0), Some(3));
        assert_eq!(time.step_of(8.5), None);
        assert_approx_eq!(time.time_of(3), 7.5);
    }
}
