//! Dense arrays indexed by time.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A dense time × link matrix, such as flows or travel times.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinkTable {
    tot_time_steps: usize,
    tot_links: usize,
    data: Vec<f64>,
}

impl LinkTable {
    /// Creates a table filled with a value.
    pub fn new(tot_time_steps: usize, tot_links: usize, value: f64) -> Self {
        Self {
            tot_time_steps,
            tot_links,
            data: vec![value; tot_time_steps * tot_links],
        }
    }

    pub fn tot_time_steps(&self) -> usize {
        self.tot_time_steps
    }

    pub fn tot_links(&self) -> usize {
        self.tot_links
    }

    pub fn get(&self, time_step: usize, link: usize) -> f64 {
        self.data[time_step * self.tot_links + link]
    }

    pub fn set(&mut self, time_step: usize, link: usize, value: f64) {
        self.data[time_step * self.tot_links + link] = value;
    }

    /// The values of every link during a step.
    pub fn row(&self, time_step: usize) -> &[f64] {
        &self.data[time_step * self.tot_links..(time_step + 1) * self.tot_links]
    }

    /// The values of a link over time.
    pub fn column(&self, link: usize) -> impl Iterator<Item = f64> + '_ {
        self.data
            .iter()
            .skip(link)
            .step_by(self.tot_links.max(1))
            .copied()
    }

    /// Every value, step by step.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// Per-commodity values of a set of items (turns or links) over time, laid out
/// so that every destination owns one contiguous chunk.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Fractions {
    tot_time_steps: usize,
    tot_items: usize,
    data: Vec<f64>,
}

impl Fractions {
    pub fn new(
        tot_destinations: usize,
        tot_time_steps: usize,
        tot_items: usize,
        value: f64,
    ) -> Self {
        Self {
            tot_time_steps,
            tot_items,
            data: vec![value; tot_destinations * tot_time_steps * tot_items],
        }
    }

    pub fn tot_time_steps(&self) -> usize {
        self.tot_time_steps
    }

    pub fn tot_items(&self) -> usize {
        self.tot_items
    }

    pub fn get(&self, destination: usize, time_step: usize, item: usize) -> f64 {
        self.data[self.offset(destination, time_step) + item]
    }

    pub fn set(&mut self, destination: usize, time_step: usize, item: usize, value: f64) {
        let offset = self.offset(destination, time_step);
        self.data[offset + item] = value;
    }

    /// The values of every item for a destination during a step.
    pub fn step(&self, destination: usize, time_step: usize) -> &[f64] {
        let offset = self.offset(destination, time_step);
        &self.data[offset..offset + self.tot_items]
    }

    /// The number of values owned by a single destination.
    pub(crate) fn chunk_len(&self) -> usize {
        self.tot_time_steps * self.tot_items
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    fn offset(&self, destination: usize, time_step: usize) -> usize {
        (destination * self.tot_time_steps + time_step) * self.tot_items
    }
}

/// Cumulative vehicle numbers per time point, link and destination.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CumulativeCounts {
    tot_points: usize,
    tot_links: usize,
    tot_destinations: usize,
    data: Vec<f64>,
}

impl CumulativeCounts {
    /// Creates counts for `tot_points` time points, all zero.
    pub fn new(tot_points: usize, tot_links: usize, tot_destinations: usize) -> Self {
        Self {
            tot_points,
            tot_links,
            tot_destinations,
            data: vec![0.0; tot_points * tot_links * tot_destinations],
        }
    }

    /// The per-destination counts of a link at a time point.
    pub fn get(&self, point: usize, link: usize) -> &[f64] {
        let offset = self.offset(point, link);
        &self.data[offset..offset + self.tot_destinations]
    }

    pub(crate) fn get_mut(&mut self, point: usize, link: usize) -> &mut [f64] {
        let offset = self.offset(point, link);
        &mut self.data[offset..offset + self.tot_destinations]
    }

    /// The count of a link at a time point, summed over destinations.
    pub fn total(&self, point: usize, link: usize) -> f64 {
        self.get(point, link).iter().sum()
    }

    pub fn tot_points(&self) -> usize {
        self.tot_points
    }

    pub fn tot_links(&self) -> usize {
        self.tot_links
    }

    pub fn tot_destinations(&self) -> usize {
        self.tot_destinations
    }

    /// The total count curve of a link over every time point.
    pub fn total_curve(&self, link: usize) -> Vec<f64> {
        (0..self.tot_points())
            .map(|p| self.total(p, link))
            .collect()
    }

    fn offset(&self, point: usize, link: usize) -> usize {
        (point * self.tot_links + link) * self.tot_destinations
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn link_table() {
        let mut table = LinkTable::new(3, 2, 0.0);
        table.set(1, 1, 4.0);
        table.set(2, 1, 5.0);
        assert_eq!(table.get(1, 1), 4.0);
        assert_eq!(table.row(1), &[0.0, 4.0]);
        assert_eq!(table.column(1).collect::<Vec<_>>(), vec![0.0, 4.0, 5.0]);
        assert_eq!(table.tot_time_steps(), 3);
    }

    #[test]
    fn fractions_are_chunked_by_destination() {
        let mut fractions = Fractions::new(2, 3, 4, 0.0);
        fractions.set(1, 0, 2, 1.0);
        assert_eq!(fractions.chunk_len(), 12);
        assert_eq!(fractions.as_mut_slice()[12 + 2], 1.0);
        assert_eq!(fractions.step(1, 0), &[0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn cumulative_counts() {
        let mut counts = CumulativeCounts::new(4, 2, 3);
        counts.get_mut(2, 1).copy_from_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(counts.total(2, 1), 6.0);
        assert_eq!(counts.tot_points(), 4);
        assert_eq!(counts.total_curve(1), vec![0.0, 0.0, 6.0, 0.0]);
    }
}
