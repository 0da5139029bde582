//! Miscellaneous utility structs and functions.

use std::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An interval on the real number line.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Interval<T> {
    pub min: T,
    pub max: T,
}

impl<T> Interval<T> {
    /// Creates a new interval.
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl<T: std::cmp::PartialOrd> Interval<T> {
    /// Returns true if this interval contains the value.
    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }
}

impl<T: std::ops::Sub<T, Output = T> + Copy> Interval<T> {
    /// Gets the magnitude of the interval.
    pub fn length(&self) -> T {
        self.max - self.min
    }
}

impl Interval<f64> {
    pub fn lerp(&self, t: f64) -> f64 {
        self.min + t * (self.max - self.min)
    }

    /// The inverse of [Self::lerp]. Degenerate intervals map to 1.
    pub fn inv_lerp(&self, value: f64) -> f64 {
        let len = self.length();
        if len > 0.0 {
            (value - self.min) / len
        } else {
            1.0
        }
    }
}

impl<T: Debug> Debug for Interval<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interval({:?}, {:?})", &self.min, &self.max)
    }
}

/// Interpolates between two arrival-map labels, either of which may be infinite.
pub(crate) fn lerp_labels(lo: f64, hi: f64, frac: f64) -> f64 {
    if frac <= 0.0 {
        lo
    } else if frac >= 1.0 {
        hi
    } else if lo.is_infinite() || hi.is_infinite() {
        f64::INFINITY
    } else {
        Interval::new(lo, hi).lerp(frac)
    }
}

/// Samples a time-indexed series at a fractional index, clamping to its last entry.
pub(crate) fn sample_series(series: impl Fn(usize) -> f64, len: usize, at: f64) -> f64 {
    let last = len - 1;
    if at >= last as f64 {
        return series(last);
    }
    let at = at.max(0.0);
    let lo = at.floor() as usize;
    lerp_labels(series(lo), series(lo + 1), at - lo as f64)
}

/// Finds the first fractional time point at which a non-decreasing cumulative curve
/// reaches `value`, searching no earlier than point `from`.
pub(crate) fn first_crossing(curve: &[f64], value: f64, from: usize) -> Option<f64> {
    let from = from.min(curve.len());
    let k = from + curve[from..].partition_point(|&n| n < value);
    if k >= curve.len() {
        None
    } else if k == 0 || k == from {
        Some(k as f64)
    } else {
        let segment = Interval::new(curve[k - 1], curve[k]);
        Some((k - 1) as f64 + segment.inv_lerp(value))
    }
}
